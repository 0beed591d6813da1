//! Find DSE. Resolve a distinguished name one RDN at a time against the local DIT.
//!
//! The walk either reaches a DSE that can carry out the operation, which is recorded as
//! `found` in the [OperationDispatcherState], or it records the continuation references
//! another DSA must be asked to finish with. Everything else is an error.
//!
//! Resolution is strictly sequential. Administrative points and shadowed context prefixes
//! passed at shallower levels decide the access control and references at deeper ones.

use std::future::Future;
use std::pin::Pin;

use crate::prelude::*;
use crate::server::access::push_admin_point;
use crate::server::continuation::{
    nssr_references, specific_reference, superior_reference, supplier_reference,
};
use crate::server::suitability::Suitability;

pub type FindDseFuture<'a> = Pin<Box<dyn Future<Output = Result<(), OperationError>> + Send + 'a>>;

/// Resolve `state.name`. Boxed, since dereferencing an alias resolves the aliased name
/// with a recursive call.
pub fn find_dse<'a>(
    ctx: &'a DsaContext,
    inv: &'a Invocation,
    state: &'a mut OperationDispatcherState,
) -> FindDseFuture<'a> {
    Box::pin(find_dse_inner(ctx, inv, state))
}

#[instrument(level = "debug", skip_all, fields(name = %state.name, op = ?state.operation))]
async fn find_dse_inner(
    ctx: &DsaContext,
    inv: &Invocation,
    state: &mut OperationDispatcherState,
) -> Result<(), OperationError> {
    let root = ctx.store.root().await?;

    if state.name.is_root() {
        return if state.operation.is_enumerative() {
            resolve_trace!("resolved to the root DSE");
            state.found = Some(root);
            state.entry_suitable = true;
            state.chaining = state.chaining.with_progress(OperationProgress::completed());
            Ok(())
        } else {
            Err(OperationError::no_such_object(DistinguishedName::root()))
        };
    }

    let mut t = Traversal::new(ctx, inv, state.name.clone(), root);
    loop {
        match t.step(state).await? {
            Step::Continue => {}
            Step::Done => return Ok(()),
        }
    }
}

enum Step {
    Continue,
    Done,
}

/// The mutable state of one walk down the DIT. An alias resolution gets its own.
struct Traversal<'a> {
    ctx: &'a DsaContext,
    inv: &'a Invocation,
    name: DistinguishedName,
    root: Arc<Vertex>,
    /// The deepest DSE matched so far.
    dse_i: Arc<Vertex>,
    /// Number of RDNs of `name` matched so far.
    i: usize,
    last_entry: Option<Arc<Vertex>>,
    last_entry_found: usize,
    /// The closest shadowed context prefix passed.
    last_cp: Option<Arc<Vertex>>,
    candidate_refs: Vec<ContinuationReference>,
    iterations: usize,
}

impl<'a> Traversal<'a> {
    fn new(
        ctx: &'a DsaContext,
        inv: &'a Invocation,
        name: DistinguishedName,
        root: Arc<Vertex>,
    ) -> Self {
        Traversal {
            ctx,
            inv,
            name,
            dse_i: root.clone(),
            root,
            i: 0,
            last_entry: None,
            last_entry_found: 0,
            last_cp: None,
            candidate_refs: Vec::new(),
            iterations: 0,
        }
    }

    fn m(&self) -> usize {
        self.name.len()
    }

    async fn step(&mut self, state: &mut OperationDispatcherState) -> Result<Step, OperationError> {
        self.iterations += 1;
        if self.iterations > self.ctx.limits().find_dse_iteration_ceiling {
            security_error!(name = %self.name, "name resolution iteration ceiling reached");
            return Err(OperationError::Service(ServiceProblem::LoopDetected));
        }
        self.inv.check()?;

        if self.i == self.m() {
            return self.complete(state).await;
        }

        let rdn = self.name.rdns()[self.i].clone();
        let Some(child) = self.match_subordinate(&rdn).await? else {
            resolve_trace!(%rdn, under = %self.dse_i.dn, "no subordinate matched");
            return self.target_not_found(state);
        };

        let access = self
            .ctx
            .access_at(self.inv, &state.adm_points, &child)
            .await?;
        if !access.may_discover() {
            security_access!(dn = %child.dn, "denied ❌ - may not discover during name resolution");
            return Err(if access.may_disclose_on_error() {
                OperationError::Security(SecurityProblem::InsufficientAccessRights)
            } else {
                OperationError::no_such_object(self.dse_i.dn.clone())
            });
        }

        self.i += 1;
        self.dse_i = child.clone();
        state.matched = child.dn.clone();
        state.rdns_resolved = self.i;
        resolve_trace!(dn = %child.dn, i = self.i, "matched");

        push_admin_point(&mut state.adm_points, &child);

        if child.is(DseType::SHADOW) && child.is(DseType::CP) {
            self.last_cp = Some(child.clone());
        }

        if let Some(cr) = specific_reference(
            &child,
            self.name.clone(),
            OperationProgress::proceeding(self.i),
            state.operation,
        ) {
            resolve_trace!(dn = %child.dn, reference = ?cr.reference_type, "candidate reference");
            self.candidate_refs.push(cr);
        }

        if child.is(DseType::SUBENTRY) {
            if self.i == self.m() {
                return self.target_found(state).await;
            }
            return Err(OperationError::no_such_object(child.dn.clone()));
        }

        if child.is(DseType::ALIAS) {
            return self.dereference_alias(state, child).await;
        }

        if child.dse.is_entry() {
            if self.i == self.m() {
                return self.target_found(state).await;
            }
            self.last_entry = Some(child);
            self.last_entry_found = self.i;
        }

        Ok(Step::Continue)
    }

    /// Find the subordinate of `dse_i` named `rdn`. Small resident sets are scanned with
    /// the naming matchers. Otherwise the store's index is tried first, and since it
    /// compares bytes, a miss falls back to a paged scan.
    async fn match_subordinate(&self, rdn: &Rdn) -> Result<Option<Arc<Vertex>>, OperationError> {
        let registry = &self.ctx.registry;
        let matches = |v: &Arc<Vertex>| {
            v.rdn()
                .map(|r| registry.rdn_matches(r, rdn))
                .unwrap_or(false)
        };

        if let Some(subs) = self.dse_i.loaded_subordinates() {
            if subs.len() < self.ctx.limits().fast_path_subordinate_threshold {
                return Ok(subs.iter().find(|v| matches(v)).cloned());
            }
        }

        if let Some(v) = self
            .ctx
            .store
            .find_subordinate_by_rdn(&self.dse_i, rdn)
            .await?
        {
            return Ok(Some(v));
        }

        let batch = self.ctx.limits().subordinate_batch_size;
        let mut after = None;
        loop {
            self.inv.check()?;
            let page = self
                .ctx
                .store
                .list_subordinates(&self.dse_i, batch, after, SubordinateFilter::All)
                .await?;
            if let Some(v) = page.iter().find(|v| matches(v)) {
                return Ok(Some(v.clone()));
            }
            if page.len() < batch {
                return Ok(None);
            }
            after = page.last().map(|v| v.id);
        }
    }

    async fn dereference_alias(
        &mut self,
        state: &mut OperationDispatcherState,
        alias: Arc<Vertex>,
    ) -> Result<Step, OperationError> {
        if state.visited_aliases.contains(&alias.id)
            || state.alias_depth >= self.ctx.limits().max_alias_chain
        {
            security_error!(alias = %alias.dn, depth = state.alias_depth, "alias loop detected");
            return Err(OperationError::Service(ServiceProblem::LoopDetected));
        }

        let at_end = self.i == self.m();
        let dont_deref = state
            .service_controls
            .has(ServiceControlOptions::DONT_DEREFERENCE_ALIASES)
            || (at_end && !state.operation.dereferences_final_alias());
        if dont_deref {
            if at_end {
                return self.target_found(state).await;
            }
            return Err(OperationError::name(
                NameProblem::AliasDereferencingProblem,
                alias.dn.clone(),
            ));
        }

        let Some(aliased) = alias.dse.alias.as_ref() else {
            admin_warn!(alias = %alias.dn, "alias without an aliased entry name");
            return Err(OperationError::name(NameProblem::AliasProblem, alias.dn.clone()));
        };

        state.visited_aliases.insert(alias.id);
        let target = aliased
            .aliased_entry_name
            .concat(&self.name.rdns()[self.i..]);
        let mut inner = state.derive_for_alias(target, aliased.aliased_entry_name.len());
        resolve_info!(alias = %alias.dn, target = %inner.name, "dereferencing alias");

        match find_dse(self.ctx, self.inv, &mut inner).await {
            Ok(()) => {
                state.merge_alias_resolution(inner);
                Ok(Step::Done)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                resolve_warn!(alias = %alias.dn, ?e, "alias target could not be resolved");
                Err(OperationError::name(NameProblem::AliasProblem, alias.dn.clone()))
            }
        }
    }

    /// The name is consumed at a DSE that is not an entry, such as glue or a reference.
    async fn complete(&mut self, state: &mut OperationDispatcherState) -> Result<Step, OperationError> {
        if state
            .service_controls
            .has(ServiceControlOptions::MANAGE_DSAIT)
        {
            resolve_trace!(dn = %self.dse_i.dn, "manageDSAIT, using the DSE as found");
            self.resolved(state, false);
            return Ok(Step::Done);
        }

        if state.operation.is_enumerative() {
            let prefixes = self
                .ctx
                .store
                .count_subordinates(self.dse_i.id, SubordinateFilter::ContextPrefixes)
                .await?;
            if prefixes > 0 {
                resolve_trace!(dn = %self.dse_i.dn, prefixes, "base with subordinate context prefixes");
                self.resolved(state, false);
                return Ok(Step::Done);
            }
        }

        self.target_not_found(state)
    }

    async fn target_found(&mut self, state: &mut OperationDispatcherState) -> Result<Step, OperationError> {
        match self.ctx.suitability.check(state, &self.dse_i) {
            Suitability::Suitable => {
                self.resolved(state, false);
                Ok(Step::Done)
            }
            Suitability::UnavailableCriticalExtension => Err(OperationError::Service(
                ServiceProblem::UnavailableCriticalExtension,
            )),
            Suitability::Unsuitable => {
                let shadowed = if self.dse_i.dse.shadow.is_some() {
                    Some(self.dse_i.clone())
                } else {
                    self.last_cp.clone()
                };
                if let Some(cr) = shadowed.and_then(|v| {
                    supplier_reference(
                        &v,
                        self.name.clone(),
                        OperationProgress::proceeding(v.dn.len()),
                        state.operation,
                    )
                }) {
                    self.candidate_refs.push(cr);
                }
                self.target_not_found(state)
            }
        }
    }

    fn resolved(&self, state: &mut OperationDispatcherState, partial: bool) {
        let found = if partial {
            self.last_entry.clone().unwrap_or_else(|| self.dse_i.clone())
        } else {
            self.dse_i.clone()
        };
        resolve_info!(dn = %found.dn, partial, "name resolved");
        state.found = Some(found);
        state.partial_name = partial;
        state.entry_suitable = true;
        state.rdns_resolved = self.i;
        state.chaining = state
            .chaining
            .with_progress(OperationProgress::completed());
    }

    fn refer(&self, state: &mut OperationDispatcherState, refs: Vec<ContinuationReference>) -> Step {
        for cr in refs.iter() {
            resolve_info!(target = %cr.target_object, reference = ?cr.reference_type, "continuing elsewhere");
        }
        state.nr_continuation.extend(refs);
        Step::Done
    }

    fn target_not_found(&mut self, state: &mut OperationDispatcherState) -> Result<Step, OperationError> {
        let progress = state.chaining.operation_progress;
        match progress.phase {
            NameResolutionPhase::NotStarted => {
                if let Some(cr) = self.candidate_refs.pop() {
                    return Ok(self.refer(state, vec![cr]));
                }
                if self.last_entry_found == 0 {
                    // Nothing of the name is held here, so it is someone else's.
                    if let Some(cr) =
                        superior_reference(&self.ctx.config, self.name.clone(), state.operation)
                    {
                        return Ok(self.refer(state, vec![cr]));
                    }
                    if self.ctx.config.is_first_level() {
                        let refs = nssr_references(
                            &self.root,
                            &self.name,
                            OperationProgress::not_started(),
                            state.operation,
                        );
                        if !refs.is_empty() {
                            return Ok(self.refer(state, refs));
                        }
                    }
                }
                self.fallback(state)
            }
            NameResolutionPhase::Proceeding => {
                let next = progress.next_rdn_to_be_resolved.unwrap_or_default();
                if self.i >= next {
                    self.fallback(state)
                } else if state.chaining.reference_type == Some(ReferenceType::NonSpecificSubordinate) {
                    // Every non-specific subordinate is asked, most of them will not hold it.
                    resolve_trace!(name = %self.name, "not held by this non-specific subordinate");
                    Err(OperationError::Service(ServiceProblem::UnableToProceed))
                } else {
                    request_warn!(name = %self.name, next, matched = self.i, "reference pointed at a DSA that does not hold the name");
                    Err(OperationError::Service(ServiceProblem::InvalidReference))
                }
            }
            NameResolutionPhase::Completed => {
                request_warn!(name = %self.name, "completed name resolution did not find a target");
                Err(OperationError::Service(ServiceProblem::InvalidReference))
            }
        }
    }

    fn fallback(&mut self, state: &mut OperationDispatcherState) -> Result<Step, OperationError> {
        if let Some(cr) = self.candidate_refs.pop() {
            return Ok(self.refer(state, vec![cr]));
        }

        if self.dse_i.is(DseType::SHADOW) {
            let incomplete = self
                .last_cp
                .as_ref()
                .and_then(|cp| cp.dse.shadow.as_ref())
                .map(|s| !s.subordinate_complete)
                .unwrap_or(false);
            if incomplete {
                if let Some(cr) = self.last_cp.as_ref().and_then(|cp| {
                    supplier_reference(
                        cp,
                        self.name.clone(),
                        OperationProgress::proceeding(cp.dn.len()),
                        state.operation,
                    )
                }) {
                    return Ok(self.refer(state, vec![cr]));
                }
            }
        }

        let refs = nssr_references(
            &self.dse_i,
            &self.name,
            OperationProgress::proceeding(self.i),
            state.operation,
        );
        if !refs.is_empty() {
            return Ok(self.refer(state, refs));
        }

        if state
            .service_controls
            .has(ServiceControlOptions::PARTIAL_NAME_RESOLUTION)
            && self.last_entry.is_some()
        {
            self.resolved(state, true);
            return Ok(Step::Done);
        }

        let matched = self
            .last_entry
            .as_ref()
            .map(|v| v.dn.clone())
            .unwrap_or_else(DistinguishedName::root);
        Err(OperationError::no_such_object(matched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::access::{AciItem, Permissions, ProtectedItemSpec, UserClass};
    use crate::testkit::TestDsa;

    async fn resolve(
        test_dsa: &TestDsa,
        op: OperationCode,
        name: &str,
    ) -> (Result<(), OperationError>, OperationDispatcherState) {
        let inv = test_dsa.invocation();
        let mut state = test_dsa.state(op, name);
        let r = find_dse(&test_dsa.ctx, &inv, &mut state).await;
        (r, state)
    }

    #[dsa_test]
    async fn test_find_dse_resolves_entry(test_dsa: &TestDsa) {
        let (r, state) = resolve(test_dsa, OperationCode::Read, "cn=Alice,o=Example,c=US").await;
        assert!(r.is_ok());
        let found = state.found.clone().expect("found");
        assert_eq!(found.dn, dn!("cn=Alice,o=Example,c=US"));
        assert_eq!(
            state.chaining.operation_progress.phase,
            NameResolutionPhase::Completed
        );
        assert_eq!(state.rdns_resolved, 3);
        assert!(state.nr_continuation.is_empty());
        assert!(!state.alias_dereferenced());
    }

    #[dsa_test]
    async fn test_find_dse_is_deterministic(test_dsa: &TestDsa) {
        for name in ["cn=ALICE,o=example,c=us", "cn=Dave,o=Example,c=US"] {
            let (a, sa) = resolve(test_dsa, OperationCode::Read, name).await;
            let (b, sb) = resolve(test_dsa, OperationCode::Read, name).await;
            assert_eq!(a, b);
            assert_eq!(
                sa.found.as_ref().map(|v| v.id),
                sb.found.as_ref().map(|v| v.id)
            );
        }
    }

    #[dsa_test]
    async fn test_find_dse_missing_superior(test_dsa: &TestDsa) {
        test_dsa.remove_subtree("o=Example,c=US");
        let (r, _) = resolve(test_dsa, OperationCode::Read, "cn=Alice,o=Example,c=US").await;
        assert_name_error!(r, NameProblem::NoSuchObject, "c=US");

        let (r, _) = resolve(test_dsa, OperationCode::Read, "c=FR").await;
        assert_name_error!(r, NameProblem::NoSuchObject, "");
    }

    #[dsa_test]
    async fn test_find_dse_partial_name_resolution(test_dsa: &TestDsa) {
        let inv = test_dsa.invocation();
        let mut state = test_dsa.state(OperationCode::Read, "cn=Zed,cn=Alice,o=Example,c=US");
        state.service_controls.options |= ServiceControlOptions::PARTIAL_NAME_RESOLUTION;
        find_dse(&test_dsa.ctx, &inv, &mut state)
            .await
            .expect("partial");
        assert!(state.partial_name);
        assert_eq!(
            state.found.as_ref().map(|v| v.dn.clone()),
            Some(dn!("cn=Alice,o=Example,c=US"))
        );
    }

    #[dsa_test]
    async fn test_find_dse_root(test_dsa: &TestDsa) {
        let (r, state) = resolve(test_dsa, OperationCode::Search, "").await;
        assert!(r.is_ok());
        assert!(state.found.as_ref().map(|v| v.is(DseType::ROOT)).unwrap_or(false));
        let (r, _) = resolve(test_dsa, OperationCode::Read, "").await;
        assert_name_error!(r, NameProblem::NoSuchObject, "");
    }

    #[dsa_test]
    async fn test_find_dse_alias_transparency(test_dsa: &TestDsa) {
        test_dsa.replace_with_alias("cn=Bob,o=Example,c=US", "cn=Alice,o=Example,c=US");
        let (r, state) = resolve(test_dsa, OperationCode::Read, "cn=Bob,o=Example,c=US").await;
        assert!(r.is_ok());
        assert!(state.alias_dereferenced());
        assert_eq!(
            state.found.as_ref().map(|v| v.dn.clone()),
            Some(dn!("cn=Alice,o=Example,c=US"))
        );

        // An alias to a superior, with the rest of the name carried across.
        test_dsa.add_alias("c=US", "o", "Alias", "o=Example,c=US");
        let (direct, ds) = resolve(test_dsa, OperationCode::Read, "cn=Carol,o=Example,c=US").await;
        let (via, vs) = resolve(test_dsa, OperationCode::Read, "cn=Carol,o=Alias,c=US").await;
        assert!(direct.is_ok() && via.is_ok());
        assert_eq!(
            ds.found.as_ref().map(|v| v.id),
            vs.found.as_ref().map(|v| v.id)
        );
    }

    #[dsa_test]
    async fn test_find_dse_alias_not_dereferenced(test_dsa: &TestDsa) {
        test_dsa.replace_with_alias("cn=Bob,o=Example,c=US", "cn=Alice,o=Example,c=US");

        let inv = test_dsa.invocation();
        let mut state = test_dsa.state(OperationCode::Read, "cn=Bob,o=Example,c=US");
        state.service_controls.options |= ServiceControlOptions::DONT_DEREFERENCE_ALIASES;
        find_dse(&test_dsa.ctx, &inv, &mut state).await.expect("alias itself");
        assert!(state.found.as_ref().map(|v| v.is(DseType::ALIAS)).unwrap_or(false));

        let mut state = test_dsa.state(OperationCode::Read, "cn=x,cn=Bob,o=Example,c=US");
        state.service_controls.options |= ServiceControlOptions::DONT_DEREFERENCE_ALIASES;
        let r = find_dse(&test_dsa.ctx, &inv, &mut state).await;
        assert_name_error!(r, NameProblem::AliasDereferencingProblem, "cn=Bob,o=Example,c=US");

        // Updates act on the alias entry itself.
        let (r, state) = resolve(test_dsa, OperationCode::RemoveEntry, "cn=Bob,o=Example,c=US").await;
        assert!(r.is_ok());
        assert!(state.found.as_ref().map(|v| v.is(DseType::ALIAS)).unwrap_or(false));
    }

    #[dsa_test]
    async fn test_find_dse_alias_loop_terminates(test_dsa: &TestDsa) {
        test_dsa.add_alias("o=Example,c=US", "cn", "A", "cn=B,o=Example,c=US");
        test_dsa.add_alias("o=Example,c=US", "cn", "B", "cn=A,o=Example,c=US");
        let (r, _) = resolve(test_dsa, OperationCode::Read, "cn=A,o=Example,c=US").await;
        assert_eq!(r, Err(OperationError::Service(ServiceProblem::LoopDetected)));

        // A dangling alias is an alias problem, the inner failure is not leaked.
        test_dsa.add_alias("o=Example,c=US", "cn", "Dangling", "cn=Nobody,o=Example,c=US");
        let (r, _) = resolve(test_dsa, OperationCode::Read, "cn=Dangling,o=Example,c=US").await;
        assert_name_error!(r, NameProblem::AliasProblem, "cn=Dangling,o=Example,c=US");
    }

    #[dsa_test(max_alias_chain = 2)]
    async fn test_find_dse_alias_chain_limit(test_dsa: &TestDsa) {
        test_dsa.add_alias("o=Example,c=US", "cn", "A1", "cn=A2,o=Example,c=US");
        test_dsa.add_alias("o=Example,c=US", "cn", "A2", "cn=A3,o=Example,c=US");
        test_dsa.add_alias("o=Example,c=US", "cn", "A3", "cn=Alice,o=Example,c=US");
        let (r, _) = resolve(test_dsa, OperationCode::Read, "cn=A2,o=Example,c=US").await;
        assert!(r.is_ok());
        let (r, _) = resolve(test_dsa, OperationCode::Read, "cn=A1,o=Example,c=US").await;
        assert_eq!(r, Err(OperationError::Service(ServiceProblem::LoopDetected)));
    }

    #[dsa_test]
    async fn test_find_dse_access_denied_hides_descendants(test_dsa: &TestDsa) {
        test_dsa.make_access_control_area("c=US");
        test_dsa.add_prescriptive_aci(
            "c=US",
            vec![AciItem::grant("browse", 10, vec![UserClass::AllUsers])
                .protecting(vec![ProtectedItemSpec::Entry])
                .granting(Permissions::BROWSE | Permissions::RETURN_DN | Permissions::READ)],
        );
        test_dsa.set_entry_aci(
            "o=Example,c=US",
            vec![AciItem::grant("hide", 20, vec![UserClass::AllUsers])
                .protecting(vec![ProtectedItemSpec::Entry])
                .denying(Permissions::BROWSE)],
        );

        for name in ["o=Example,c=US", "cn=Alice,o=Example,c=US"] {
            let (r, state) = resolve(test_dsa, OperationCode::Read, name).await;
            assert_name_error!(r, NameProblem::NoSuchObject, "c=US");
            assert!(state.found.is_none());
        }

        // With disclose on error the requester is told the truth.
        test_dsa.set_entry_aci(
            "o=Example,c=US",
            vec![
                AciItem::grant("hide", 20, vec![UserClass::AllUsers])
                    .protecting(vec![ProtectedItemSpec::Entry])
                    .denying(Permissions::BROWSE),
                AciItem::grant("disclose", 20, vec![UserClass::AllUsers])
                    .protecting(vec![ProtectedItemSpec::Entry])
                    .granting(Permissions::DISCLOSE_ON_ERROR),
            ],
        );
        let (r, _) = resolve(test_dsa, OperationCode::Read, "cn=Alice,o=Example,c=US").await;
        assert_eq!(
            r,
            Err(OperationError::Security(SecurityProblem::InsufficientAccessRights))
        );
    }

    #[dsa_test]
    async fn test_find_dse_subordinate_reference(test_dsa: &TestDsa) {
        test_dsa.add_subordinate_reference("o=Example,c=US", "ou", "Remote", "cn=dsa2");
        let (r, state) = resolve(test_dsa, OperationCode::Read, "cn=Zoe,ou=Remote,o=Example,c=US").await;
        assert!(r.is_ok());
        assert!(state.found.is_none());
        assert_eq!(state.nr_continuation.len(), 1);
        let cr = &state.nr_continuation[0];
        assert_eq!(cr.reference_type, ReferenceType::Subordinate);
        assert_eq!(cr.operation_progress, OperationProgress::proceeding(3));
        assert_eq!(cr.access_points[0].access_point.ae_title, dn!("cn=dsa2"));

        // At the end of the name a list may use the reference as its base only under
        // manageDSAIT.
        let (r, state) = resolve(test_dsa, OperationCode::List, "ou=Remote,o=Example,c=US").await;
        assert!(r.is_ok());
        assert!(state.found.is_none());
        assert_eq!(state.nr_continuation.len(), 1);

        let inv = test_dsa.invocation();
        let mut state = test_dsa.state(OperationCode::List, "ou=Remote,o=Example,c=US");
        state.service_controls.options |= ServiceControlOptions::MANAGE_DSAIT;
        find_dse(&test_dsa.ctx, &inv, &mut state).await.expect("manage");
        assert!(state.found.as_ref().map(|v| v.is(DseType::SUBR)).unwrap_or(false));
        assert!(state.nr_continuation.is_empty());
    }

    #[dsa_test]
    async fn test_find_dse_glue_with_subordinate_prefixes(test_dsa: &TestDsa) {
        test_dsa.add_glue("c=US", "o", "Glue");
        test_dsa.add_subordinate_reference("o=Glue,c=US", "ou", "Far", "cn=dsa3");
        let (r, state) = resolve(test_dsa, OperationCode::Search, "o=Glue,c=US").await;
        assert!(r.is_ok());
        assert_eq!(
            state.found.as_ref().map(|v| v.dn.clone()),
            Some(dn!("o=Glue,c=US"))
        );

        let (r, _) = resolve(test_dsa, OperationCode::Read, "o=Glue,c=US").await;
        assert_name_error!(r, NameProblem::NoSuchObject, "c=US");
    }

    #[dsa_test]
    async fn test_find_dse_superior_reference(test_dsa: &TestDsa) {
        let ctx = test_dsa.ctx_with_superior("cn=superior");
        let inv = test_dsa.invocation();
        let mut state = test_dsa.state(OperationCode::Read, "c=FR");
        find_dse(&ctx, &inv, &mut state).await.expect("refer");
        assert_eq!(state.nr_continuation.len(), 1);
        assert_eq!(state.nr_continuation[0].reference_type, ReferenceType::Superior);

        // Something of the name is held here, so the superior is not asked.
        let mut state = test_dsa.state(OperationCode::Read, "o=Nowhere,c=US");
        let r = find_dse(&ctx, &inv, &mut state).await;
        assert_name_error!(r, NameProblem::NoSuchObject, "c=US");
    }

    #[dsa_test]
    async fn test_find_dse_root_nssr_on_first_level(test_dsa: &TestDsa) {
        test_dsa.add_root_nssr(&["cn=dsa4", "cn=dsa5"]);
        let (r, state) = resolve(test_dsa, OperationCode::Read, "c=FR").await;
        assert!(r.is_ok());
        assert_eq!(state.nr_continuation.len(), 2);
        assert!(state
            .nr_continuation
            .iter()
            .all(|cr| cr.reference_type == ReferenceType::NonSpecificSubordinate));
    }

    #[dsa_test]
    async fn test_find_dse_phase_checks(test_dsa: &TestDsa) {
        let inv = test_dsa.invocation();
        let mut state = test_dsa.state(OperationCode::Read, "cn=Nobody,o=Example,c=US");
        state.chaining = state.chaining.with_progress(OperationProgress::completed());
        let r = find_dse(&test_dsa.ctx, &inv, &mut state).await;
        assert_eq!(r, Err(OperationError::Service(ServiceProblem::InvalidReference)));

        let mut state = test_dsa.state(OperationCode::Read, "cn=x,o=Elsewhere,c=US");
        state.chaining = state.chaining.with_progress(OperationProgress::proceeding(2));
        let r = find_dse(&test_dsa.ctx, &inv, &mut state).await;
        assert_eq!(r, Err(OperationError::Service(ServiceProblem::InvalidReference)));

        let mut state = test_dsa.state(OperationCode::Read, "cn=x,o=Elsewhere,c=US");
        state.chaining = state.chaining.with_progress(OperationProgress::proceeding(2));
        state.chaining.reference_type = Some(ReferenceType::NonSpecificSubordinate);
        let r = find_dse(&test_dsa.ctx, &inv, &mut state).await;
        assert_eq!(r, Err(OperationError::Service(ServiceProblem::UnableToProceed)));
    }

    #[dsa_test]
    async fn test_find_dse_unsuitable_shadow(test_dsa: &TestDsa) {
        test_dsa.make_shadow("o=Example,c=US", "cn=master");
        let inv = test_dsa.invocation();
        let mut state = test_dsa.state(OperationCode::Read, "cn=Alice,o=Example,c=US");
        state.service_controls.options |= ServiceControlOptions::DONT_USE_COPY;
        find_dse(&test_dsa.ctx, &inv, &mut state).await.expect("refer");
        assert!(state.found.is_none());
        assert_eq!(state.nr_continuation.len(), 1);
        assert_eq!(state.nr_continuation[0].reference_type, ReferenceType::Master);
        assert!(state.nr_continuation[0].name_resolution_on_master);

        let (r, state) = resolve(test_dsa, OperationCode::Read, "cn=Alice,o=Example,c=US").await;
        assert!(r.is_ok());
        assert!(state.found.is_some());
    }

    #[dsa_test(fast_path_threshold = 0, batch_size = 1)]
    async fn test_find_dse_fast_path_falls_back_to_scan(test_dsa: &TestDsa) {
        // The store index is exact, the naming matchers fold case.
        let (r, state) = resolve(test_dsa, OperationCode::Read, "CN=carol,O=EXAMPLE,C=us").await;
        assert!(r.is_ok());
        assert_eq!(
            state.found.as_ref().map(|v| v.dn.clone()),
            Some(dn!("cn=Carol,o=Example,c=US"))
        );
    }

    #[dsa_test(eager_subordinates = 0)]
    async fn test_find_dse_lazy_subordinates(test_dsa: &TestDsa) {
        let (r, state) = resolve(test_dsa, OperationCode::Read, "cn=Bob,o=Example,c=US").await;
        assert!(r.is_ok());
        let found = state.found.expect("found");
        assert_eq!(found.dn, dn!("cn=Bob,o=Example,c=US"));
        assert_eq!(found.parent_id, test_dsa.id_of("o=Example,c=US"));
    }

    #[dsa_test(iteration_ceiling = 2)]
    async fn test_find_dse_iteration_ceiling(test_dsa: &TestDsa) {
        let (r, _) = resolve(test_dsa, OperationCode::Read, "cn=Alice,o=Example,c=US").await;
        assert_eq!(r, Err(OperationError::Service(ServiceProblem::LoopDetected)));
    }

    #[dsa_test]
    async fn test_find_dse_abandon_and_time(test_dsa: &TestDsa) {
        let inv = test_dsa.invocation();
        inv.abandon();
        let mut state = test_dsa.state(OperationCode::Read, "cn=Alice,o=Example,c=US");
        let r = find_dse(&test_dsa.ctx, &inv, &mut state).await;
        assert_eq!(r, Err(OperationError::Abandoned));

        let inv = test_dsa.invocation_with_time_limit(Duration::ZERO);
        let mut state = test_dsa.state(OperationCode::Read, "cn=Alice,o=Example,c=US");
        let r = find_dse(&test_dsa.ctx, &inv, &mut state).await;
        assert_eq!(r, Err(OperationError::Service(ServiceProblem::TimeLimitExceeded)));
    }

    #[dsa_test]
    async fn test_find_dse_subentry(test_dsa: &TestDsa) {
        test_dsa.make_access_control_area("o=Example,c=US");
        test_dsa.add_prescriptive_aci("o=Example,c=US", vec![]);
        let (r, state) =
            resolve(test_dsa, OperationCode::Read, "cn=policy,o=Example,c=US").await;
        assert!(r.is_ok());
        assert!(state.found.as_ref().map(|v| v.is(DseType::SUBENTRY)).unwrap_or(false));

        let (r, _) = resolve(test_dsa, OperationCode::Read, "cn=x,cn=policy,o=Example,c=US").await;
        assert_name_error!(r, NameProblem::NoSuchObject, "cn=policy,o=Example,c=US");
    }
}
