//! The local model of the DIT. A [Vertex] is one DSE as this DSA holds it, linked weakly
//! to its immediate superior and owning (or deferring to the store for) its subordinates.

mod dse;
mod vertex;

pub use self::dse::{
    AdministrativePoint, AdministrativeRoles, AliasRecord, Dse, DseType, ShadowRecord,
    SubentryRecord, SubtreeSpecification,
};
pub use self::vertex::{EntryId, SubentryInfo, Subordinates, Vertex, ROOT_ID};
