//! An in memory store. Readers take a snapshot of the whole DIT through a copy on write
//! cell, so a traversal never observes a half applied write.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Weak;

use async_trait::async_trait;
use concread::cowcell::{CowCell, CowCellWriteTxn};

use super::{DitStore, SubordinateFilter};
use crate::dit::{SubentryInfo, ROOT_ID};
use crate::prelude::*;

/// One stored DSE, keyed by entry id with a parent id column.
#[derive(Debug, Clone)]
pub struct EntryRecord {
    pub id: EntryId,
    pub parent_id: Option<EntryId>,
    pub rdn: Option<Rdn>,
    pub dse: Dse,
}

#[derive(Debug, Clone, Default)]
struct DitSnapshot {
    entries: BTreeMap<EntryId, EntryRecord>,
    children: BTreeMap<EntryId, BTreeSet<EntryId>>,
    rdn_index: BTreeMap<(EntryId, Rdn), EntryId>,
    next_id: EntryId,
}

// A vertex with everything fallible already done, so it can be assembled inside
// `Arc::new_cyclic`.
struct PreparedVertex {
    id: EntryId,
    parent_id: Option<EntryId>,
    dn: DistinguishedName,
    subentries: Vec<SubentryInfo>,
    dse: Dse,
    child_ids: Vec<EntryId>,
}

impl PreparedVertex {
    fn into_vertex(self, superior: Option<Weak<Vertex>>, subordinates: Subordinates) -> Vertex {
        Vertex {
            id: self.id,
            parent_id: self.parent_id,
            dn: self.dn,
            superior,
            subordinates,
            subentries: self.subentries,
            dse: self.dse,
        }
    }
}

impl DitSnapshot {
    fn new(root: Dse) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            ROOT_ID,
            EntryRecord {
                id: ROOT_ID,
                parent_id: None,
                rdn: None,
                dse: root,
            },
        );
        DitSnapshot {
            entries,
            children: BTreeMap::new(),
            rdn_index: BTreeMap::new(),
            next_id: ROOT_ID + 1,
        }
    }

    fn record(&self, id: EntryId) -> Result<&EntryRecord, OperationError> {
        self.entries
            .get(&id)
            .ok_or(OperationError::InvalidEntryId(id))
    }

    fn child_ids(&self, id: EntryId) -> impl Iterator<Item = EntryId> + '_ {
        self.children.get(&id).into_iter().flatten().copied()
    }

    /// The name of an entry from the parent id column.
    fn dn_of(&self, id: EntryId) -> Result<DistinguishedName, OperationError> {
        let mut rdns = Vec::new();
        let mut cursor = Some(id);
        // A parent chain longer than the number of entries is a cycle.
        let mut remaining = self.entries.len();
        while let Some(cid) = cursor {
            let record = self.record(cid)?;
            match (&record.rdn, record.parent_id) {
                (Some(rdn), Some(parent)) => {
                    rdns.push(rdn.clone());
                    cursor = Some(parent);
                }
                (None, None) => cursor = None,
                _ => return Err(OperationError::CorruptedEntry(cid)),
            }
            remaining = remaining
                .checked_sub(1)
                .ok_or(OperationError::CorruptedEntry(id))?;
        }
        rdns.reverse();
        Ok(DistinguishedName::from_rdns(rdns))
    }

    fn subentries_of(
        &self,
        id: EntryId,
        dn: &DistinguishedName,
    ) -> Result<Vec<SubentryInfo>, OperationError> {
        self.child_ids(id)
            .filter_map(|cid| self.entries.get(&cid))
            .filter(|record| record.dse.is(DseType::SUBENTRY))
            .map(|record| {
                let rdn = record
                    .rdn
                    .clone()
                    .ok_or(OperationError::CorruptedEntry(record.id))?;
                let subentry = record.dse.subentry.clone().unwrap_or_default();
                Ok(SubentryInfo {
                    id: record.id,
                    dn: dn.child(rdn),
                    subtree_specification: subentry.subtree_specification,
                    prescriptive_aci: subentry.prescriptive_aci,
                })
            })
            .collect()
    }

    fn prepare(&self, id: EntryId) -> Result<PreparedVertex, OperationError> {
        let record = self.record(id)?;
        let dn = self.dn_of(id)?;
        let subentries = if record.dse.is(DseType::ADM_POINT) {
            self.subentries_of(id, &dn)?
        } else {
            Vec::new()
        };
        Ok(PreparedVertex {
            id,
            parent_id: record.parent_id,
            dn,
            subentries,
            dse: record.dse.clone(),
            child_ids: self.child_ids(id).collect(),
        })
    }

    fn build(
        &self,
        id: EntryId,
        superior: Option<&Arc<Vertex>>,
        eager_threshold: usize,
    ) -> Result<Arc<Vertex>, OperationError> {
        let prepared = self.prepare(id)?;
        let superior = superior.map(Arc::downgrade);

        if prepared.child_ids.is_empty() {
            return Ok(Arc::new(
                prepared.into_vertex(superior, Subordinates::Loaded(Vec::new())),
            ));
        }

        if prepared.child_ids.len() > eager_threshold {
            return Ok(Arc::new(prepared.into_vertex(superior, Subordinates::InStore)));
        }

        let children = prepared
            .child_ids
            .iter()
            .map(|cid| self.prepare(*cid))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Arc::new_cyclic(|weak_self| {
            let subordinates = children
                .into_iter()
                .map(|child| {
                    let grandchildren = if child.child_ids.is_empty() {
                        Subordinates::Loaded(Vec::new())
                    } else {
                        Subordinates::InStore
                    };
                    Arc::new(child.into_vertex(Some(weak_self.clone()), grandchildren))
                })
                .collect();
            prepared.into_vertex(superior, Subordinates::Loaded(subordinates))
        }))
    }

    fn find_by_dn(&self, dn: &DistinguishedName) -> Option<EntryId> {
        dn.rdns().iter().try_fold(ROOT_ID, |parent, rdn| {
            self.rdn_index.get(&(parent, rdn.clone())).copied()
        })
    }
}

pub struct MemoryStore {
    inner: CowCell<DitSnapshot>,
    eager_threshold: usize,
}

pub struct MemoryStoreWriteTransaction<'a> {
    inner: CowCellWriteTxn<'a, DitSnapshot>,
}

impl MemoryStore {
    /// A store holding only the root DSE. Vertices with at most `eager_threshold`
    /// subordinates are handed out with their subordinates already resident.
    pub fn new(eager_threshold: usize) -> Self {
        MemoryStore {
            inner: CowCell::new(DitSnapshot::new(Dse::new(DseType::ROOT))),
            eager_threshold,
        }
    }

    pub fn write(&self) -> MemoryStoreWriteTransaction<'_> {
        MemoryStoreWriteTransaction {
            inner: self.inner.write(),
        }
    }

    pub fn record(&self, id: EntryId) -> Option<EntryRecord> {
        self.inner.read().entries.get(&id).cloned()
    }

    /// The id of the entry at exactly `dn`, compared byte for byte.
    pub fn lookup(&self, dn: &DistinguishedName) -> Option<EntryId> {
        self.inner.read().find_by_dn(dn)
    }

    pub fn subordinate_ids(&self, id: EntryId) -> Vec<EntryId> {
        self.inner.read().child_ids(id).collect()
    }

    /// Check that the parent id column, the child index, the RDN index and the names
    /// rebuilt from superior links all agree.
    pub fn verify(&self) -> Vec<OperationError> {
        let snap = self.inner.read();
        let mut errors = Vec::new();

        for (id, record) in snap.entries.iter() {
            if let (Some(parent), Some(rdn)) = (record.parent_id, &record.rdn) {
                let listed = snap
                    .children
                    .get(&parent)
                    .map(|c| c.contains(id))
                    .unwrap_or(false);
                let indexed = snap.rdn_index.get(&(parent, rdn.clone())) == Some(id);
                if !snap.entries.contains_key(&parent) || !listed || !indexed {
                    admin_error!(?id, ?parent, "entry is not consistent with its parent");
                    errors.push(OperationError::CorruptedEntry(*id));
                    continue;
                }
            } else if *id != ROOT_ID {
                errors.push(OperationError::CorruptedEntry(*id));
                continue;
            }

            let dn = match snap.dn_of(*id) {
                Ok(dn) => dn,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };

            // Walk down from the root with real superior links, then walk back up.
            let mut vertex = match snap.build(ROOT_ID, None, self.eager_threshold) {
                Ok(v) => v,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            let mut chain = vec![vertex.clone()];
            for rdn in dn.rdns() {
                let next = snap
                    .rdn_index
                    .get(&(vertex.id, rdn.clone()))
                    .ok_or(OperationError::CorruptedEntry(*id))
                    .and_then(|cid| snap.build(*cid, Some(&vertex), self.eager_threshold));
                match next {
                    Ok(v) => {
                        chain.push(v.clone());
                        vertex = v;
                    }
                    Err(e) => {
                        errors.push(e);
                        break;
                    }
                }
            }
            if vertex.id == *id && vertex.reconstruct_dn().as_ref() != Some(&dn) {
                admin_error!(?id, %dn, "rebuilt name does not match the parent id column");
                errors.push(OperationError::CorruptedEntry(*id));
            }
            drop(chain);
        }

        for (parent, children) in snap.children.iter() {
            for child in children {
                if snap.entries.get(child).and_then(|r| r.parent_id) != Some(*parent) {
                    errors.push(OperationError::CorruptedEntry(*child));
                }
            }
        }

        errors
    }
}

impl MemoryStoreWriteTransaction<'_> {
    pub fn add(&mut self, parent: EntryId, rdn: Rdn, dse: Dse) -> Result<EntryId, OperationError> {
        let snap = self.inner.get_mut();
        if !snap.entries.contains_key(&parent) {
            return Err(OperationError::InvalidEntryId(parent));
        }
        if snap.rdn_index.contains_key(&(parent, rdn.clone())) {
            return Err(OperationError::InvalidState(format!(
                "an entry named {rdn} already exists under {parent}"
            )));
        }
        let id = snap.next_id;
        snap.next_id += 1;
        snap.entries.insert(
            id,
            EntryRecord {
                id,
                parent_id: Some(parent),
                rdn: Some(rdn.clone()),
                dse,
            },
        );
        snap.children.entry(parent).or_default().insert(id);
        snap.rdn_index.insert((parent, rdn), id);
        Ok(id)
    }

    pub fn update(&mut self, id: EntryId, dse: Dse) -> Result<(), OperationError> {
        let snap = self.inner.get_mut();
        let record = snap
            .entries
            .get_mut(&id)
            .ok_or(OperationError::InvalidEntryId(id))?;
        record.dse = dse;
        Ok(())
    }

    pub fn modify<F>(&mut self, id: EntryId, f: F) -> Result<(), OperationError>
    where
        F: FnOnce(&mut Dse),
    {
        let snap = self.inner.get_mut();
        let record = snap
            .entries
            .get_mut(&id)
            .ok_or(OperationError::InvalidEntryId(id))?;
        f(&mut record.dse);
        Ok(())
    }

    /// Remove a leaf entry.
    pub fn remove(&mut self, id: EntryId) -> Result<(), OperationError> {
        let snap = self.inner.get_mut();
        if snap.child_ids(id).next().is_some() {
            return Err(OperationError::InvalidState(format!(
                "entry {id} still has subordinates"
            )));
        }
        let record = snap
            .entries
            .remove(&id)
            .ok_or(OperationError::InvalidEntryId(id))?;
        if let (Some(parent), Some(rdn)) = (record.parent_id, record.rdn) {
            if let Some(children) = snap.children.get_mut(&parent) {
                children.remove(&id);
            }
            snap.rdn_index.remove(&(parent, rdn));
        }
        snap.children.remove(&id);
        Ok(())
    }

    pub fn commit(self) {
        self.inner.commit();
    }
}

#[async_trait]
impl DitStore for MemoryStore {
    async fn root(&self) -> Result<Arc<Vertex>, OperationError> {
        self.inner.read().build(ROOT_ID, None, self.eager_threshold)
    }

    async fn find_subordinate_by_rdn(
        &self,
        parent: &Arc<Vertex>,
        rdn: &Rdn,
    ) -> Result<Option<Arc<Vertex>>, OperationError> {
        let snap = self.inner.read();
        snap.rdn_index
            .get(&(parent.id, rdn.clone()))
            .map(|cid| snap.build(*cid, Some(parent), self.eager_threshold))
            .transpose()
    }

    async fn list_subordinates(
        &self,
        parent: &Arc<Vertex>,
        limit: usize,
        after: Option<EntryId>,
        filter: SubordinateFilter,
    ) -> Result<Vec<Arc<Vertex>>, OperationError> {
        let snap = self.inner.read();
        let Some(children) = snap.children.get(&parent.id) else {
            return Ok(Vec::new());
        };
        let lower = match after {
            Some(after) => Bound::Excluded(after),
            None => Bound::Unbounded,
        };
        children
            .range((lower, Bound::Unbounded))
            .filter(|cid| {
                snap.entries
                    .get(cid)
                    .map(|r| filter.accepts(&r.dse))
                    .unwrap_or(false)
            })
            .take(limit)
            .map(|cid| snap.build(*cid, Some(parent), self.eager_threshold))
            .collect()
    }

    async fn count_subordinates(
        &self,
        parent: EntryId,
        filter: SubordinateFilter,
    ) -> Result<usize, OperationError> {
        let snap = self.inner.read();
        Ok(snap
            .child_ids(parent)
            .filter_map(|cid| snap.entries.get(&cid))
            .filter(|r| filter.accepts(&r.dse))
            .count())
    }

    async fn load_vertex(&self, id: EntryId) -> Result<Option<Arc<Vertex>>, OperationError> {
        let snap = self.inner.read();
        if !snap.entries.contains_key(&id) {
            return Ok(None);
        }
        snap.build(id, None, self.eager_threshold).map(Some)
    }

    async fn find_by_dn(
        &self,
        dn: &DistinguishedName,
    ) -> Result<Option<Arc<Vertex>>, OperationError> {
        let snap = self.inner.read();
        snap.find_by_dn(dn)
            .map(|id| snap.build(id, None, self.eager_threshold))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> Dse {
        Dse::new(DseType::ENTRY)
    }

    #[tokio::test]
    async fn test_eager_and_lazy_subordinates() {
        let store = MemoryStore::new(2);
        let mut txn = store.write();
        let us = txn.add(ROOT_ID, rdn!("c", "US"), entry()).expect("add");
        let example = txn.add(us, rdn!("o", "Example"), entry()).expect("add");
        for name in ["Alice", "Bob", "Carol"] {
            txn.add(example, rdn!("cn", name), entry()).expect("add");
        }
        txn.commit();

        let root = store.root().await.expect("root");
        // One child, so it is resident and linked back to the root.
        let subs = root.loaded_subordinates().expect("eager");
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].immediate_superior().map(|v| v.id), Some(ROOT_ID));
        let us_v = subs[0].clone();
        assert_eq!(us_v.reconstruct_dn(), Some(dn!("c=US")));

        let example_v = store
            .find_subordinate_by_rdn(&us_v, &rdn!("o", "Example"))
            .await
            .expect("lookup")
            .expect("present");
        // Three children is over the threshold.
        assert!(matches!(example_v.subordinates, Subordinates::InStore));

        let page = store
            .list_subordinates(&example_v, 2, None, SubordinateFilter::All)
            .await
            .expect("list");
        assert_eq!(page.len(), 2);
        let rest = store
            .list_subordinates(&example_v, 2, Some(page[1].id), SubordinateFilter::All)
            .await
            .expect("list");
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].dn, dn!("cn=Carol,o=Example,c=US"));
        assert_eq!(rest[0].reconstruct_dn(), Some(rest[0].dn.clone()));
        assert!(store.verify().is_empty());
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = MemoryStore::new(10);
        let mut txn = store.write();
        txn.add(ROOT_ID, rdn!("c", "US"), entry()).expect("add");
        assert!(store
            .find_by_dn(&dn!("c=US"))
            .await
            .expect("lookup")
            .is_none());
        txn.commit();
        assert!(store
            .find_by_dn(&dn!("c=US"))
            .await
            .expect("lookup")
            .is_some());
    }

    #[test]
    fn test_remove_requires_leaf() {
        let store = MemoryStore::new(10);
        let mut txn = store.write();
        let us = txn.add(ROOT_ID, rdn!("c", "US"), entry()).expect("add");
        let ex = txn.add(us, rdn!("o", "Example"), entry()).expect("add");
        assert!(txn.remove(us).is_err());
        assert!(txn.remove(ex).is_ok());
        assert!(txn.remove(us).is_ok());
        assert!(txn.add(us, rdn!("o", "Gone"), entry()).is_err());
        txn.commit();
        assert!(store.verify().is_empty());
    }
}
