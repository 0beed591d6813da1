//! Fixtures for the `#[dsa_test]` harness: an in memory DIT seeded with a small
//! organisation, a steppable clock, and builders for the DSE shapes tests need.

use std::sync::atomic::{AtomicU64, Ordering};
use std::str::FromStr;

use async_trait::async_trait;

use crate::be::memory::MemoryStore;
use crate::dit::{AdministrativePoint, AliasRecord, ShadowRecord, SubentryRecord, ROOT_ID};
use crate::prelude::*;
use crate::server::access::{
    AciItem, CredentialVerifier, Credentials, Permissions, ProtectedItemSpec, UserClass,
};
use crate::server::dispatch::OperationDispatcher;

pub struct TestConfiguration {
    pub eager_subordinates: usize,
    pub fast_path_threshold: usize,
    pub batch_size: usize,
    /// Milliseconds the clock moves on every read. Zero freezes it.
    pub clock_step_ms: u64,
    pub iteration_ceiling: usize,
    pub max_alias_chain: usize,
}

impl Default for TestConfiguration {
    fn default() -> Self {
        TestConfiguration {
            eager_subordinates: 10,
            fast_path_threshold: DEFAULT_FAST_PATH_SUBORDINATE_THRESHOLD,
            batch_size: DEFAULT_SUBORDINATE_BATCH_SIZE,
            clock_step_ms: 0,
            iteration_ceiling: DEFAULT_FIND_DSE_ITERATION_CEILING,
            max_alias_chain: DEFAULT_MAX_ALIAS_CHAIN,
        }
    }
}

/// A clock that starts at the epoch and only moves when read or advanced.
#[derive(Debug)]
pub struct TestClock {
    millis: AtomicU64,
    step_ms: u64,
}

impl TestClock {
    pub fn new(step_ms: u64) -> Self {
        TestClock {
            millis: AtomicU64::new(0),
            step_ms,
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(by, Ordering::AcqRel);
    }
}

impl Clock for TestClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.fetch_add(self.step_ms, Ordering::AcqRel))
    }
}

/// Accepts every bind.
#[derive(Debug, Default)]
pub struct StaticCredentials;

#[async_trait]
impl CredentialVerifier for StaticCredentials {
    async fn verify(&self, _credentials: &Credentials) -> Result<bool, OperationError> {
        Ok(true)
    }
}

#[allow(clippy::expect_used)]
pub fn dn(s: &str) -> DistinguishedName {
    DistinguishedName::from_str(s).expect("invalid test dn")
}

fn access_point(ae: &str) -> AccessPoint {
    let name = dn(ae);
    let host = name
        .last_rdn()
        .and_then(|rdn| rdn.avas().first())
        .map(|ava| ava.value.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| "root".to_string());
    AccessPoint {
        ae_title: name,
        address: vec![format!("{host}.example.com:102")],
        protocol_information: Vec::new(),
    }
}

fn person(name: &str) -> Dse {
    Dse::new(DseType::ENTRY)
        .with_attribute(ATTR_OBJECTCLASS, &[OC_TOP, "person"])
        .with_attribute(ATTR_CN, &[name])
        .with_attribute("sn", &["Smith"])
}

fn alias_for(rdn: &Rdn, target: &str) -> Dse {
    let mut dse = Dse::new(DseType::ALIAS).with_attribute(ATTR_OBJECTCLASS, &[OC_TOP, OC_ALIAS]);
    for ava in rdn.avas() {
        let value = ava.value.to_string_lossy();
        dse = dse.with_attribute(ava.atype.as_str(), &[value.as_ref()]);
    }
    dse = dse.with_attribute(ATTR_ALIASED_ENTRY_NAME, &[target]);
    dse.alias = Some(AliasRecord {
        aliased_entry_name: dn(target),
    });
    dse
}

pub struct TestDsa {
    pub store: Arc<MemoryStore>,
    pub ctx: DsaContext,
    pub clock: Arc<TestClock>,
    pub dispatcher: OperationDispatcher,
    next_invoke_id: AtomicU64,
}

#[allow(clippy::expect_used)]
impl TestDsa {
    pub async fn verify(&self) -> Vec<OperationError> {
        self.store.verify()
    }

    pub fn session(&self) -> Session {
        Session::new(
            self.ctx.limits().max_paged_queries_per_connection,
            self.clock.clone(),
        )
    }

    pub fn invocation(&self) -> Invocation {
        self.invocation_with_time_limit(Duration::from_secs(30))
    }

    pub fn invocation_with_time_limit(&self, limit: Duration) -> Invocation {
        let id = self.next_invoke_id.fetch_add(1, Ordering::Relaxed);
        Invocation::new(
            id,
            None,
            AuthenticationLevel::None,
            self.clock.now() + limit,
            self.clock.clone(),
        )
    }

    pub fn state(&self, operation: OperationCode, name: &str) -> OperationDispatcherState {
        OperationDispatcherState::new(
            operation,
            dn(name),
            ServiceControls::default(),
            ChainingArguments::default(),
        )
    }

    pub fn id_of(&self, name: &str) -> Option<EntryId> {
        self.store.lookup(&dn(name))
    }

    fn require(&self, name: &str) -> EntryId {
        self.id_of(name).expect("no such test dse")
    }

    fn insert(&self, parent: &str, rdn: Rdn, dse: Dse) -> EntryId {
        let parent = self.require(parent);
        let mut txn = self.store.write();
        let id = txn.add(parent, rdn, dse).expect("failed to add test dse");
        txn.commit();
        id
    }

    fn modify<F>(&self, name: &str, f: F)
    where
        F: FnOnce(&mut Dse),
    {
        let id = self.require(name);
        let mut txn = self.store.write();
        txn.modify(id, f).expect("failed to modify test dse");
        txn.commit();
    }

    fn descendants(&self, id: EntryId, into: &mut Vec<EntryId>) {
        for child in self.store.subordinate_ids(id) {
            self.descendants(child, into);
            into.push(child);
        }
    }

    /// A person when the naming attribute is `cn`, otherwise a bare entry.
    pub fn add_entry(&self, parent: &str, atype: &str, value: &str) -> EntryId {
        let dse = if atype.eq_ignore_ascii_case(ATTR_CN) {
            person(value)
        } else {
            Dse::new(DseType::ENTRY)
                .with_attribute(ATTR_OBJECTCLASS, &[OC_TOP])
                .with_attribute(atype, &[value])
        };
        self.insert(parent, Rdn::single(atype, value), dse)
    }

    pub fn add_alias(&self, parent: &str, atype: &str, value: &str, target: &str) -> EntryId {
        let rdn = Rdn::single(atype, value);
        let dse = alias_for(&rdn, target);
        self.insert(parent, rdn, dse)
    }

    /// Swap a leaf entry for an alias of the same name.
    pub fn replace_with_alias(&self, name: &str, target: &str) {
        let name = dn(name);
        let rdn = name.last_rdn().cloned().expect("root can not be an alias");
        let parent = name.parent().unwrap_or_default().to_string();
        self.remove_subtree(&name.to_string());
        let dse = alias_for(&rdn, target);
        self.insert(&parent, rdn, dse);
    }

    pub fn add_subordinate_reference(&self, parent: &str, atype: &str, value: &str, ae: &str) {
        let mut dse = Dse::new(DseType::SUBR).with_attribute(atype, &[value]);
        dse.specific_knowledge
            .push(MasterOrShadowAccessPoint::master(access_point(ae)));
        self.insert(parent, Rdn::single(atype, value), dse);
    }

    pub fn add_shadow_knowledge(&self, name: &str, ae: &str) {
        self.modify(name, |dse| {
            dse.specific_knowledge
                .push(MasterOrShadowAccessPoint::shadow(access_point(ae)))
        });
    }

    pub fn add_glue(&self, parent: &str, atype: &str, value: &str) {
        self.insert(parent, Rdn::single(atype, value), Dse::new(DseType::GLUE));
    }

    pub fn add_family_member(&self, parent: &str, atype: &str, value: &str) {
        let dse = Dse::new(DseType::ENTRY | DseType::FAMILY_MEMBER)
            .with_attribute(ATTR_OBJECTCLASS, &[OC_TOP, OC_CHILD])
            .with_attribute(atype, &[value]);
        self.insert(parent, Rdn::single(atype, value), dse);
    }

    pub fn remove_subtree(&self, name: &str) {
        let top = self.require(name);
        let mut doomed = Vec::new();
        self.descendants(top, &mut doomed);
        doomed.push(top);
        let mut txn = self.store.write();
        for id in doomed {
            txn.remove(id).expect("failed to remove test dse");
        }
        txn.commit();
    }

    pub fn make_admin_point(&self, name: &str, roles: AdministrativeRoles, scheme: Option<&str>) {
        self.modify(name, |dse| {
            dse.dse_type |= DseType::ADM_POINT;
            dse.admin_point = Some(AdministrativePoint {
                roles,
                access_control_scheme: scheme.map(str::to_string),
                subentry_aci: Vec::new(),
            });
        });
    }

    /// An autonomous access control specific area under basic access control. Its
    /// subentries are readable by anyone.
    pub fn make_access_control_area(&self, name: &str) {
        self.make_admin_point(
            name,
            AdministrativeRoles::AUTONOMOUS | AdministrativeRoles::ACCESS_CONTROL_SPECIFIC,
            Some(BASIC_ACCESS_CONTROL_SCHEME),
        );
        self.modify(name, |dse| {
            if let Some(point) = dse.admin_point.as_mut() {
                point.subentry_aci = vec![AciItem::grant("subentries", 0, vec![UserClass::AllUsers])
                    .protecting(vec![ProtectedItemSpec::Entry])
                    .granting(Permissions::BROWSE | Permissions::RETURN_DN | Permissions::READ)];
            }
        });
    }

    pub fn add_prescriptive_aci(&self, admin: &str, aci: Vec<AciItem>) {
        let mut dse = Dse::new(DseType::SUBENTRY)
            .with_attribute(ATTR_OBJECTCLASS, &[OC_TOP, OC_SUBENTRY])
            .with_attribute(ATTR_CN, &["policy"]);
        dse.subentry = Some(SubentryRecord {
            subtree_specification: Vec::new(),
            prescriptive_aci: aci,
        });
        self.insert(admin, Rdn::single(ATTR_CN, "policy"), dse);
    }

    pub fn set_entry_aci(&self, name: &str, aci: Vec<AciItem>) {
        self.modify(name, |dse| dse.entry_aci = aci);
    }

    /// Turn a subtree into a complete shadow copy supplied by `master`.
    pub fn make_shadow(&self, name: &str, master: &str) {
        let top = self.require(name);
        let mut ids = vec![top];
        self.descendants(top, &mut ids);
        let record = ShadowRecord {
            supplier_knowledge: vec![MasterOrShadowAccessPoint::master(access_point(master))],
            subordinate_complete: true,
            attribute_complete: true,
        };
        let mut txn = self.store.write();
        for id in ids {
            let record = record.clone();
            txn.modify(id, move |dse| {
                dse.dse_type |= DseType::SHADOW;
                if id == top {
                    dse.dse_type |= DseType::CP;
                }
                dse.shadow = Some(record);
            })
            .expect("failed to shadow test dse");
        }
        txn.commit();
    }

    /// The shadow at `name` no longer holds all of its subordinates.
    pub fn make_shadow_partial(&self, name: &str) {
        self.modify(name, |dse| {
            if let Some(shadow) = dse.shadow.as_mut() {
                shadow.subordinate_complete = false;
            }
        });
    }

    pub fn add_nssr(&self, name: &str, aes: &[&str]) {
        self.modify(name, |dse| {
            dse.dse_type |= DseType::NSSR;
            dse.non_specific_knowledge.extend(
                aes.iter()
                    .map(|ae| vec![MasterOrShadowAccessPoint::master(access_point(ae))]),
            );
        });
    }

    pub fn add_root_nssr(&self, aes: &[&str]) {
        self.add_nssr("", aes);
    }

    /// A context for a DSA that is not first level.
    pub fn ctx_with_superior(&self, ae: &str) -> DsaContext {
        let mut config = (*self.ctx.config).clone();
        config.superior_knowledge = vec![access_point(ae)];
        DsaContext {
            config: Arc::new(config),
            ..self.ctx.clone()
        }
    }
}

#[allow(clippy::expect_used)]
pub async fn setup_test(config: TestConfiguration) -> TestDsa {
    sketching::test_init();

    let store = Arc::new(MemoryStore::new(config.eager_subordinates));
    {
        let mut txn = store.write();
        let country = txn
            .add(
                ROOT_ID,
                Rdn::single("c", "US"),
                Dse::new(DseType::ENTRY)
                    .with_attribute(ATTR_OBJECTCLASS, &[OC_TOP, "country"])
                    .with_attribute("c", &["US"]),
            )
            .expect("failed to seed c=US");
        let org = txn
            .add(
                country,
                Rdn::single("o", "Example"),
                Dse::new(DseType::ENTRY)
                    .with_attribute(ATTR_OBJECTCLASS, &[OC_TOP, "organization"])
                    .with_attribute("o", &["Example"]),
            )
            .expect("failed to seed o=Example");
        for name in ["Alice", "Bob", "Carol"] {
            txn.add(org, Rdn::single(ATTR_CN, name), person(name))
                .expect("failed to seed person");
        }
        txn.commit();
    }

    let mut dsa_config = DsaConfiguration::new_for_test();
    dsa_config.limits.fast_path_subordinate_threshold = config.fast_path_threshold;
    dsa_config.limits.subordinate_batch_size = config.batch_size;
    dsa_config.limits.find_dse_iteration_ceiling = config.iteration_ceiling;
    dsa_config.limits.max_alias_chain = config.max_alias_chain;

    let clock = Arc::new(TestClock::new(config.clock_step_ms));
    let ctx = DsaContext::new(Arc::new(dsa_config), store.clone()).with_clock(clock.clone());
    let dispatcher = OperationDispatcher::new(ctx.clone());

    TestDsa {
        store,
        ctx,
        clock,
        dispatcher,
        next_invoke_id: AtomicU64::new(1),
    }
}
