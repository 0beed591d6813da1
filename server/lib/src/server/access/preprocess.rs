use std::str::FromStr;

use async_trait::async_trait;

use super::acdf::{AcdfTuple, AcdfTupleExtended};
use super::aci::{AciItem, UserClass};
use crate::prelude::*;

/// Answers whether a user is a member of a group. `None` means the question cannot be
/// decided, such as when the named group is not a group at all.
#[async_trait]
pub trait GroupMembershipChecker: Send + Sync {
    async fn is_member(
        &self,
        group: &DistinguishedName,
        user: &DistinguishedName,
    ) -> Result<Option<bool>, OperationError>;
}

#[async_trait]
pub trait TuplePreprocessor: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn preprocess(
        &self,
        scheme: &str,
        aci: &[AciItem],
        requester: Option<&DistinguishedName>,
        authentication_level: AuthenticationLevel,
        target: &DistinguishedName,
        groups: &dyn GroupMembershipChecker,
        registry: &MatchingRuleRegistry,
    ) -> Result<Vec<AcdfTupleExtended>, OperationError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Anonymous,
    Simple {
        name: DistinguishedName,
        password: Vec<u8>,
    },
    Strong {
        name: DistinguishedName,
    },
}

impl Credentials {
    pub fn name(&self) -> Option<&DistinguishedName> {
        match self {
            Credentials::Anonymous => None,
            Credentials::Simple { name, .. } | Credentials::Strong { name } => Some(name),
        }
    }

    pub fn authentication_level(&self) -> AuthenticationLevel {
        match self {
            Credentials::Anonymous => AuthenticationLevel::None,
            Credentials::Simple { .. } => AuthenticationLevel::Simple,
            Credentials::Strong { .. } => AuthenticationLevel::Strong,
        }
    }
}

/// Decides whether presented credentials are valid. How they are checked is entirely up
/// to the implementation.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, credentials: &Credentials) -> Result<bool, OperationError>;
}

#[derive(Debug, Default, Clone)]
pub struct BasicTuplePreprocessor;

impl BasicTuplePreprocessor {
    async fn class_applies(
        class: &UserClass,
        requester: Option<&DistinguishedName>,
        target: &DistinguishedName,
        groups: &dyn GroupMembershipChecker,
        registry: &MatchingRuleRegistry,
    ) -> Result<bool, OperationError> {
        let Some(requester) = requester else {
            return Ok(matches!(class, UserClass::AllUsers));
        };
        Ok(match class {
            UserClass::AllUsers => true,
            UserClass::ThisEntry => registry.dn_equal(requester, target),
            UserClass::Name(name) => registry.dn_equal(requester, name),
            UserClass::Subtree(base) => registry.dn_is_prefix(base, requester),
            UserClass::UserGroup(group) => groups
                .is_member(group, requester)
                .await?
                .unwrap_or(false),
        })
    }
}

#[async_trait]
impl TuplePreprocessor for BasicTuplePreprocessor {
    async fn preprocess(
        &self,
        scheme: &str,
        aci: &[AciItem],
        requester: Option<&DistinguishedName>,
        authentication_level: AuthenticationLevel,
        target: &DistinguishedName,
        groups: &dyn GroupMembershipChecker,
        registry: &MatchingRuleRegistry,
    ) -> Result<Vec<AcdfTupleExtended>, OperationError> {
        if scheme != BASIC_ACCESS_CONTROL_SCHEME && scheme != SIMPLIFIED_ACCESS_CONTROL_SCHEME {
            security_error!(%scheme, "unsupported access control scheme, nothing is granted");
            return Ok(Vec::new());
        }

        let mut tuples = Vec::with_capacity(aci.len());
        for item in aci {
            let mut user_class_precedence = None;
            for class in item.user_classes.iter() {
                if Self::class_applies(class, requester, target, groups, registry).await? {
                    user_class_precedence =
                        user_class_precedence.max(Some(class.specificity()));
                }
            }
            let Some(user_class_precedence) = user_class_precedence else {
                continue;
            };

            // Grants need the requester to be authenticated at least as strongly as the
            // item asks for. Denials always apply.
            let grants = if authentication_level >= item.authentication_level {
                item.grants
            } else {
                security_debug!(tag = %item.identification_tag, "grants dropped, authentication too weak");
                Default::default()
            };
            if grants.is_empty() && item.denials.is_empty() {
                continue;
            }

            tuples.push(AcdfTupleExtended {
                tuple: AcdfTuple {
                    tag: item.identification_tag.clone(),
                    user_classes: item.user_classes.clone(),
                    authentication_level: item.authentication_level,
                    protected_items: item.protected_items.clone(),
                    grants,
                    denials: item.denials,
                    precedence: item.precedence,
                },
                user_class_precedence,
            });
        }
        Ok(tuples)
    }
}

/// Group membership read from the `member` and `uniqueMember` attributes of entries in
/// the local store.
pub struct StoreGroupMembership {
    store: Arc<dyn DitStore>,
    registry: Arc<MatchingRuleRegistry>,
}

impl StoreGroupMembership {
    pub fn new(store: Arc<dyn DitStore>, registry: Arc<MatchingRuleRegistry>) -> Self {
        StoreGroupMembership { store, registry }
    }
}

#[async_trait]
impl GroupMembershipChecker for StoreGroupMembership {
    async fn is_member(
        &self,
        group: &DistinguishedName,
        user: &DistinguishedName,
    ) -> Result<Option<bool>, OperationError> {
        let Some(vertex) = self.store.find_by_dn(group).await? else {
            return Ok(None);
        };

        let members = [ATTR_MEMBER, ATTR_UNIQUE_MEMBER]
            .iter()
            .filter_map(|a| vertex.dse.get(a))
            .flatten()
            .collect::<Vec<_>>();
        if members.is_empty()
            && !vertex.dse.has_object_class("groupOfNames")
            && !vertex.dse.has_object_class("groupOfUniqueNames")
        {
            return Ok(None);
        }

        Ok(Some(members.iter().any(|value| {
            // uniqueMember may carry an optional uid after a '#'.
            let text = value.to_string_lossy();
            let name = text.split('#').next().unwrap_or_default();
            DistinguishedName::from_str(name)
                .map(|dn| self.registry.dn_equal(&dn, user))
                .unwrap_or(false)
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::access::Permissions;

    struct NoGroups;

    #[async_trait]
    impl GroupMembershipChecker for NoGroups {
        async fn is_member(
            &self,
            _group: &DistinguishedName,
            _user: &DistinguishedName,
        ) -> Result<Option<bool>, OperationError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_preprocess_user_classes() {
        let reg = MatchingRuleRegistry::default();
        let alice = dn!("cn=Alice,o=Example,c=US");
        let aci = vec![
            AciItem::grant("all", 1, vec![UserClass::AllUsers])
                .granting(Permissions::BROWSE),
            AciItem::grant("alice", 1, vec![UserClass::Name(dn!("CN=alice,o=example,c=us"))])
                .granting(Permissions::READ),
            AciItem::grant("strong", 1, vec![UserClass::Subtree(dn!("o=Example,c=US"))])
                .granting(Permissions::MODIFY)
                .requiring(AuthenticationLevel::Strong),
        ];

        let tuples = BasicTuplePreprocessor
            .preprocess(
                BASIC_ACCESS_CONTROL_SCHEME,
                &aci,
                Some(&alice),
                AuthenticationLevel::Simple,
                &alice,
                &NoGroups,
                &reg,
            )
            .await
            .expect("preprocess");
        let tags: Vec<&str> = tuples.iter().map(|t| t.tuple.tag.as_str()).collect();
        assert_eq!(tags, vec!["all", "alice"]);
        assert_eq!(tuples[1].user_class_precedence, 3);

        let anonymous = BasicTuplePreprocessor
            .preprocess(
                BASIC_ACCESS_CONTROL_SCHEME,
                &aci,
                None,
                AuthenticationLevel::None,
                &alice,
                &NoGroups,
                &reg,
            )
            .await
            .expect("preprocess");
        assert_eq!(anonymous.len(), 1);

        let unknown = BasicTuplePreprocessor
            .preprocess("1.2.3", &aci, Some(&alice), AuthenticationLevel::Strong, &alice, &NoGroups, &reg)
            .await
            .expect("preprocess");
        assert!(unknown.is_empty());
    }
}
