use hashbrown::HashSet;

use crate::prelude::*;

/// The accumulator for one client operation, passed by reference through name
/// resolution and the list and search procedures.
#[derive(Debug, Clone)]
pub struct OperationDispatcherState {
    pub operation: OperationCode,
    pub service_controls: ServiceControls,
    pub chaining: ChainingArguments,
    /// The progress the request arrived with. Name resolution moves `chaining` on, this
    /// stays put.
    pub received_progress: OperationProgress,
    /// The name being resolved. For an alias this is the aliased name plus whatever of
    /// the original name was left.
    pub name: DistinguishedName,
    pub found: Option<Arc<Vertex>>,
    /// Set when resolution stopped short of the full name under partial name resolution.
    pub partial_name: bool,
    pub entry_suitable: bool,
    /// Administrative points passed on the way to `found`, closest last.
    pub adm_points: Vec<Arc<Vertex>>,
    /// References produced while resolving the name.
    pub nr_continuation: Vec<ContinuationReference>,
    /// References produced while listing or searching below the resolved name.
    pub sr_continuation: Vec<ContinuationReference>,
    pub visited_aliases: HashSet<EntryId>,
    pub rdns_resolved: usize,
    pub alias_depth: usize,
    /// The deepest name matched so far, for error diagnostics.
    pub matched: DistinguishedName,
}

impl OperationDispatcherState {
    pub fn new(
        operation: OperationCode,
        name: DistinguishedName,
        service_controls: ServiceControls,
        chaining: ChainingArguments,
    ) -> Self {
        OperationDispatcherState {
            operation,
            service_controls,
            received_progress: chaining.operation_progress,
            chaining,
            name,
            found: None,
            partial_name: false,
            entry_suitable: false,
            adm_points: Vec::new(),
            nr_continuation: Vec::new(),
            sr_continuation: Vec::new(),
            visited_aliases: HashSet::new(),
            rdns_resolved: 0,
            alias_depth: 0,
            matched: DistinguishedName::root(),
        }
    }

    /// A fresh accumulator to resolve the target of an alias. Only the operation, its
    /// controls and the aliases already visited carry over. The chaining arguments are
    /// derived, so the caller's copy stays as it was.
    pub fn derive_for_alias(&self, target: DistinguishedName, aliased_rdns: usize) -> Self {
        let mut inner = OperationDispatcherState::new(
            self.operation,
            target.clone(),
            self.service_controls.clone(),
            self.chaining.dereferenced_alias(target, aliased_rdns),
        );
        inner.visited_aliases = self.visited_aliases.clone();
        inner.alias_depth = self.alias_depth + 1;
        inner
    }

    /// Take the outcome of a successful alias resolution as our own.
    ///
    /// Replaced: `found`, `partial_name`, `entry_suitable`, `adm_points`,
    /// `nr_continuation`, `chaining`, `rdns_resolved`, `name` and `matched`.
    /// Unioned: `visited_aliases`. Left alone: `operation`, `service_controls`,
    /// `sr_continuation` and `alias_depth`.
    pub fn merge_alias_resolution(&mut self, inner: OperationDispatcherState) {
        self.found = inner.found;
        self.partial_name = inner.partial_name;
        self.entry_suitable = inner.entry_suitable;
        self.adm_points = inner.adm_points;
        self.nr_continuation = inner.nr_continuation;
        self.chaining = inner.chaining;
        self.rdns_resolved = inner.rdns_resolved;
        self.name = inner.name;
        self.matched = inner.matched;
        self.visited_aliases.extend(inner.visited_aliases);
    }

    pub fn alias_dereferenced(&self) -> bool {
        self.chaining.alias_dereferenced
    }

    /// True when a superior DSA already completed name resolution before chaining the
    /// request here. Client requests never are.
    pub fn arrived_resolved(&self) -> bool {
        self.received_progress.phase == NameResolutionPhase::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_derivation_is_isolated() {
        let mut outer = OperationDispatcherState::new(
            OperationCode::Read,
            dn!("cn=Bob,o=Example,c=US"),
            ServiceControls::default(),
            ChainingArguments::default(),
        );
        outer.visited_aliases.insert(7);
        outer.nr_continuation.push(ContinuationReference::new(
            dn!("c=US"),
            OperationProgress::not_started(),
            ReferenceType::Superior,
            Vec::new(),
        ));

        let mut inner = outer.derive_for_alias(dn!("cn=Alice,o=Example,c=US"), 3);
        assert!(inner.nr_continuation.is_empty());
        assert!(inner.adm_points.is_empty());
        assert!(inner.visited_aliases.contains(&7));
        assert!(inner.chaining.alias_dereferenced);
        assert!(!outer.chaining.alias_dereferenced);
        assert_eq!(inner.alias_depth, 1);

        inner.visited_aliases.insert(8);
        inner.rdns_resolved = 3;
        outer.merge_alias_resolution(inner);
        assert!(outer.alias_dereferenced());
        assert!(outer.nr_continuation.is_empty());
        assert_eq!(outer.rdns_resolved, 3);
        assert!(outer.visited_aliases.contains(&8));
        assert_eq!(outer.alias_depth, 0);
        assert_eq!(outer.name, dn!("cn=Alice,o=Example,c=US"));
        assert!(!outer.arrived_resolved());
    }

    #[test]
    fn test_received_progress_survives_resolution() {
        let mut state = OperationDispatcherState::new(
            OperationCode::Search,
            dn!("c=US"),
            ServiceControls::default(),
            ChainingArguments::default(),
        );
        state.chaining = state.chaining.with_progress(OperationProgress::completed());
        assert!(!state.arrived_resolved());

        let chained = ChainingArguments::default().with_progress(OperationProgress::completed());
        let state = OperationDispatcherState::new(
            OperationCode::Search,
            dn!("c=US"),
            ServiceControls::default(),
            chained,
        );
        assert!(state.arrived_resolved());
    }
}
