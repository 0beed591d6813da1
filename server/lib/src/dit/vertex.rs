use std::fmt;
use std::sync::Weak;

use crate::prelude::*;
use crate::server::access::AciItem;

use super::{Dse, SubtreeSpecification};

pub type EntryId = u64;

pub const ROOT_ID: EntryId = 0;

/// Where the subordinates of a vertex are.
pub enum Subordinates {
    /// Already resident, in ascending entry id order.
    Loaded(Vec<Arc<Vertex>>),
    /// Only in the store, fetch on demand.
    InStore,
}

/// What an administrative point needs to know about one of its subentries.
#[derive(Debug, Clone)]
pub struct SubentryInfo {
    pub id: EntryId,
    pub dn: DistinguishedName,
    pub subtree_specification: Vec<SubtreeSpecification>,
    pub prescriptive_aci: Vec<AciItem>,
}

pub struct Vertex {
    pub id: EntryId,
    pub parent_id: Option<EntryId>,
    pub dn: DistinguishedName,
    pub superior: Option<Weak<Vertex>>,
    pub subordinates: Subordinates,
    /// Only populated for administrative points.
    pub subentries: Vec<SubentryInfo>,
    pub dse: Dse,
}

impl Vertex {
    pub fn rdn(&self) -> Option<&Rdn> {
        self.dn.last_rdn()
    }

    pub fn immediate_superior(&self) -> Option<Arc<Vertex>> {
        self.superior.as_ref().and_then(Weak::upgrade)
    }

    pub fn is(&self, dse_type: DseType) -> bool {
        self.dse.is(dse_type)
    }

    /// Rebuild the name of this vertex by walking the superior links. This is None when
    /// a superior is no longer resident, in which case only the cached name is known.
    pub fn reconstruct_dn(&self) -> Option<DistinguishedName> {
        let mut rdns = Vec::new();
        let mut parent_id = self.parent_id;
        if let Some(rdn) = self.rdn() {
            rdns.push(rdn.clone());
        }
        let mut cursor = self.immediate_superior();
        while let Some(vertex) = cursor {
            if Some(vertex.id) != parent_id {
                return None;
            }
            if let Some(rdn) = vertex.rdn() {
                rdns.push(rdn.clone());
            }
            parent_id = vertex.parent_id;
            cursor = vertex.immediate_superior();
        }
        if parent_id.is_some() {
            // The chain stopped before reaching the root.
            return None;
        }
        rdns.reverse();
        Some(DistinguishedName::from_rdns(rdns))
    }

    pub fn loaded_subordinates(&self) -> Option<&[Arc<Vertex>]> {
        match &self.subordinates {
            Subordinates::Loaded(subs) => Some(subs.as_slice()),
            Subordinates::InStore => None,
        }
    }
}

impl fmt::Debug for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vertex")
            .field("id", &self.id)
            .field("dn", &self.dn.to_string())
            .field("dse_type", &self.dse.dse_type)
            .finish()
    }
}

impl fmt::Display for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.dn, self.id)
    }
}
