//! Paged results state, one table per connection.

use std::collections::VecDeque;

use base64::{engine::general_purpose, Engine as _};
use itertools::Itertools;
use rand::Rng;

use crate::prelude::*;

/// Where a paged list stopped.
#[derive(Debug, Clone)]
pub struct ListCursor {
    pub request: ListArgument,
    pub page_size: usize,
    /// The last subordinate returned, by entry id.
    pub after: Option<EntryId>,
}

/// One level of a paged subtree search, indexed by depth below the base.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchLevel {
    /// The last subordinate at this depth whose whole subtree is done.
    pub after: Option<EntryId>,
    /// A subordinate already visited whose subtree was cut off by the end of a page. The
    /// next level down records how far into it the search got.
    pub current: Option<EntryId>,
}

/// Where a paged search stopped.
#[derive(Debug, Clone)]
pub struct SearchCursor {
    pub request: SearchArgument,
    pub page_size: usize,
    pub base_done: bool,
    pub levels: Vec<SearchLevel>,
    /// Entries found through an alias that did not fit on the page they were found on.
    pub pending: VecDeque<EntryInformation>,
    /// Names already searched through aliases, so no subtree is returned twice.
    pub covered: Vec<DistinguishedName>,
}

#[derive(Debug, Clone)]
pub enum PagedState {
    List(ListCursor),
    Search(SearchCursor),
}

pub fn render_reference(reference: &[u8]) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(reference)
}

/// Sort keys are accepted but results stay in entry id order. Too many keys, or the same
/// attribute twice, is refused.
pub fn validate_sort_keys(limits: &Limits, sort_keys: &[SortKey]) -> Result<(), OperationError> {
    if sort_keys.len() > limits.max_sort_keys {
        request_warn!(keys = sort_keys.len(), max = limits.max_sort_keys, "too many sort keys");
        return Err(OperationError::Service(ServiceProblem::UnwillingToPerform));
    }
    if let Some(dup) = sort_keys.iter().map(|k| &k.atype).duplicates().next() {
        request_warn!(%dup, "duplicate sort key");
        return Err(OperationError::Service(ServiceProblem::UnwillingToPerform));
    }
    Ok(())
}

/// A bounded table of paged query state. When it is full, the oldest query is forgotten.
#[derive(Debug)]
pub struct PagedResultsTable {
    entries: VecDeque<(Vec<u8>, PagedState)>,
    capacity: usize,
}

impl PagedResultsTable {
    pub fn new(capacity: usize) -> Self {
        PagedResultsTable {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn allocate_reference(&self) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        loop {
            let mut reference = [0u8; QUERY_REFERENCE_LEN];
            rng.fill(&mut reference);
            if self.get(&reference).is_none() {
                return reference.to_vec();
            }
        }
    }

    /// Store state for `reference`, replacing any state already held for it.
    pub fn insert(&mut self, reference: Vec<u8>, state: PagedState) {
        if let Some(slot) = self.entries.iter_mut().find(|(r, _)| *r == reference) {
            slot.1 = state;
            return;
        }
        self.entries.push_back((reference, state));
        while self.entries.len() > self.capacity {
            if let Some((evicted, _)) = self.entries.pop_front() {
                request_warn!(reference = %render_reference(&evicted), "paged query evicted");
            }
        }
    }

    pub fn get(&self, reference: &[u8]) -> Option<&PagedState> {
        self.entries
            .iter()
            .find(|(r, _)| r.as_slice() == reference)
            .map(|(_, s)| s)
    }

    pub fn remove(&mut self, reference: &[u8]) -> Option<PagedState> {
        let idx = self
            .entries
            .iter()
            .position(|(r, _)| r.as_slice() == reference)?;
        self.entries.remove(idx).map(|(_, s)| s)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_state(n: u64) -> PagedState {
        PagedState::List(ListCursor {
            request: ListArgument::new(DistinguishedName::root()),
            page_size: 2,
            after: Some(n),
        })
    }

    #[test]
    fn test_paging_table_evicts_oldest() {
        let mut table = PagedResultsTable::new(2);
        let refs: Vec<Vec<u8>> = (0..3).map(|_| table.allocate_reference()).collect();
        for (n, r) in refs.iter().enumerate() {
            assert_eq!(r.len(), QUERY_REFERENCE_LEN);
            table.insert(r.clone(), list_state(n as u64));
        }
        assert_eq!(table.len(), 2);
        assert!(table.get(&refs[0]).is_none());
        assert!(table.get(&refs[2]).is_some());

        // Replacing state does not count as a new query.
        table.insert(refs[1].clone(), list_state(9));
        assert_eq!(table.len(), 2);
        assert!(matches!(
            table.get(&refs[1]),
            Some(PagedState::List(ListCursor { after: Some(9), .. }))
        ));

        assert!(table.remove(&refs[1]).is_some());
        assert!(table.remove(&refs[1]).is_none());
        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn test_sort_key_validation() {
        let limits = Limits {
            max_sort_keys: 2,
            ..Default::default()
        };
        let key = |t: &str| SortKey {
            atype: AttributeType::new(t),
            ordering_rule: None,
        };
        assert!(validate_sort_keys(&limits, &[key("cn"), key("sn")]).is_ok());
        assert!(validate_sort_keys(&limits, &[key("cn"), key("sn"), key("o")]).is_err());
        assert!(validate_sort_keys(&limits, &[key("cn"), key("CN")]).is_err());
    }
}
