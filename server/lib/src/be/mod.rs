//! The backend. This is the seam between the name resolution core and whatever persists
//! entries. The core only ever reads through [DitStore] while it traverses.

use async_trait::async_trait;

use crate::prelude::*;

pub mod memory;

pub use self::memory::{EntryRecord, MemoryStore, MemoryStoreWriteTransaction};

/// Which subordinates a listing should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubordinateFilter {
    All,
    /// Everything except subentries.
    Entries,
    Subentries,
    /// Context prefixes and the subordinate references that stand in for them.
    ContextPrefixes,
}

impl SubordinateFilter {
    pub fn accepts(self, dse: &Dse) -> bool {
        match self {
            SubordinateFilter::All => true,
            SubordinateFilter::Entries => !dse.is(DseType::SUBENTRY),
            SubordinateFilter::Subentries => dse.is(DseType::SUBENTRY),
            SubordinateFilter::ContextPrefixes => dse.is_any(DseType::CP | DseType::SUBR),
        }
    }
}

#[async_trait]
pub trait DitStore: Send + Sync {
    async fn root(&self) -> Result<Arc<Vertex>, OperationError>;

    /// Exact lookup of one subordinate by RDN through the store's index. The RDN is
    /// compared byte for byte, so callers that need matching rule semantics must fall
    /// back to [DitStore::list_subordinates] when this misses.
    async fn find_subordinate_by_rdn(
        &self,
        parent: &Arc<Vertex>,
        rdn: &Rdn,
    ) -> Result<Option<Arc<Vertex>>, OperationError>;

    /// A page of subordinates in ascending entry id order, starting strictly after
    /// `after`. Returned vertices are linked to `parent` as their superior.
    async fn list_subordinates(
        &self,
        parent: &Arc<Vertex>,
        limit: usize,
        after: Option<EntryId>,
        filter: SubordinateFilter,
    ) -> Result<Vec<Arc<Vertex>>, OperationError>;

    async fn count_subordinates(
        &self,
        parent: EntryId,
        filter: SubordinateFilter,
    ) -> Result<usize, OperationError>;

    /// Load one vertex by id. It is not linked to a superior.
    async fn load_vertex(&self, id: EntryId) -> Result<Option<Arc<Vertex>>, OperationError>;

    /// Exact lookup of a vertex by its full name.
    async fn find_by_dn(
        &self,
        dn: &DistinguishedName,
    ) -> Result<Option<Arc<Vertex>>, OperationError>;
}
