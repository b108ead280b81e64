//! A single DAG store for one logical perspective inside the shared KV
//! store: key encoding, indexes, append/validate, and iteration.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use perspectivedb_store::{Column, Database, Direction};
use perspectivedb_types::{Id, Item, Perspective, Version, CONFLICT_BIT, DELETE_BIT};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::codec;
use crate::error::TreeError;
use crate::key::{self, Key};

/// The outcome of appending a single item.
#[derive(Debug)]
pub enum AppendOutcome {
    /// The item was new and is now stored with its assigned `i`.
    Inserted(Item),
    /// A item with this version already existed for the same id; the
    /// write path treats this as a no-op and returns the stored copy.
    AlreadyExists(Item),
}

impl AppendOutcome {
    #[must_use]
    pub fn into_item(self) -> Item {
        match self {
            Self::Inserted(item) | Self::AlreadyExists(item) => item,
        }
    }

    #[must_use]
    pub fn was_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Selects which heads [`Tree::iterate_heads`] visits.
#[derive(Clone, Debug, Default)]
pub struct HeadFilter {
    pub id: Option<Id>,
    pub skip_conflicts: bool,
    pub skip_deletes: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStats {
    pub heads: usize,
    pub conflict_heads: usize,
    pub deleted_heads: usize,
    pub item_count: usize,
}

/// A content-addressed, append-only DAG store for one perspective, backed
/// by a shared ordered KV store and namespaced by its own key prefix.
///
/// Single-writer per tree is enforced at compile time: every mutating
/// operation takes `&mut self`, while reads take `&self` and may run
/// concurrently with each other (though never concurrently with a write,
/// since that would require an aliasing `&mut` borrow to exist too).
#[derive(Debug)]
pub struct Tree {
    db: Arc<dyn Database>,
    name: Vec<u8>,
    i_size: usize,
    v_size: usize,
    next_i: Option<u64>,
}

impl Tree {
    #[must_use]
    pub fn new(db: Arc<dyn Database>, name: impl AsRef<[u8]>, i_size: usize, v_size: usize) -> Self {
        Self {
            db,
            name: name.as_ref().to_vec(),
            i_size,
            v_size,
            next_i: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    #[must_use]
    pub fn i_size(&self) -> usize {
        self.i_size
    }

    #[must_use]
    pub fn v_size(&self) -> usize {
        self.v_size
    }

    /// Opens a lazy, insertion-order stream over this tree's items.
    pub fn insertion_order_stream(
        &self,
        options: crate::stream::StreamOptions,
    ) -> Result<crate::stream::InsertionOrderStream, TreeError> {
        crate::stream::InsertionOrderStream::new(
            Arc::clone(&self.db),
            self.name.clone(),
            self.i_size,
            self.v_size,
            options,
        )
    }

    /// Appends one item. See [`Tree::append_many`] for the full contract.
    pub fn append(&mut self, item: Item) -> Result<AppendOutcome, TreeError> {
        let mut outcomes = self.append_many(vec![item])?;
        Ok(outcomes.remove(0))
    }

    /// Validates then atomically writes a group of items.
    ///
    /// Parents missing from the store but present earlier in the same
    /// batch are accepted (intra-batch resolution); a later item cannot
    /// satisfy an earlier one's parent. Validation runs for every item
    /// before any write happens, so a failure never leaves a partial batch
    /// committed.
    #[instrument(level = "debug", skip(self, items), fields(tree = %String::from_utf8_lossy(&self.name), n = items.len()))]
    pub fn append_many(&mut self, items: Vec<Item>) -> Result<Vec<AppendOutcome>, TreeError> {
        self.append_many_impl(items, true)
    }

    /// Appends one item without validating that its parents (or, for a
    /// root, the absence of a live head) exist within this tree's own
    /// keyspace.
    ///
    /// Used by [`crate::merge_tree::MergeTree`] to stage and promote merge
    /// results, whose parents were already resolved across whichever of
    /// local/stage/remote trees holds each one — re-checking them against
    /// this single tree's keyspace would reject every multi-parent or
    /// cross-perspective item.
    pub fn append_trusted(&mut self, item: Item) -> Result<AppendOutcome, TreeError> {
        let mut outcomes = self.append_many_impl(vec![item], false)?;
        Ok(outcomes.remove(0))
    }

    fn append_many_impl(&mut self, items: Vec<Item>, validate: bool) -> Result<Vec<AppendOutcome>, TreeError> {
        let mut batch = perspectivedb_store::Batch::new();
        let mut outcomes = Vec::with_capacity(items.len());
        let mut pending: HashMap<Vec<u8>, Id> = HashMap::new();
        let mut superseded_in_batch: HashSet<Vec<u8>> = HashSet::new();

        for item in items {
            let id_label = format!("{:?}", item.header.id);
            let v = item.header.v.clone().ok_or_else(|| TreeError::InvalidHeader {
                id: id_label.clone(),
                reason: "item has no assigned version".to_owned(),
            })?;

            if let Some(existing) = self.lookup_version(&v)? {
                if existing.header.id == item.header.id {
                    debug!(version = %v.to_base64(), "version already present, skipping write");
                    outcomes.push(AppendOutcome::AlreadyExists(existing));
                    continue;
                }
                return Err(TreeError::version_exists_for_different_id(
                    &v,
                    &id_label,
                    &format!("{:?}", existing.header.id),
                ));
            }

            if validate {
                if item.header.pa.is_empty() {
                    self.validate_root(&item.header.id, &superseded_in_batch)?;
                } else {
                    self.validate_parents(&item, &pending)?;
                }
            }
            if !item.header.pa.is_empty() {
                for parent in &item.header.pa {
                    let _ = superseded_in_batch.insert(parent.as_bytes().to_vec());
                }
            }

            let i = self.allocate_i()?;
            let mut stored = item;
            stored.header.i = Some(i);

            self.stage_write(&mut batch, &stored);

            let _ = pending.insert(v.as_bytes().to_vec(), stored.header.id.clone());
            outcomes.push(AppendOutcome::Inserted(stored));
        }

        if !batch.is_empty() {
            self.db.apply_batch(batch).map_err(TreeError::Io)?;
        }

        Ok(outcomes)
    }

    fn validate_parents(
        &self,
        item: &Item,
        pending: &HashMap<Vec<u8>, Id>,
    ) -> Result<(), TreeError> {
        let id_label = format!("{:?}", item.header.id);
        let mut missing = Vec::new();

        for parent in &item.header.pa {
            let parent_bytes = parent.as_bytes().to_vec();

            if let Some(pending_id) = pending.get(&parent_bytes) {
                if *pending_id != item.header.id {
                    return Err(TreeError::InvalidHeader {
                        id: id_label.clone(),
                        reason: format!(
                            "parent {} belongs to a different id earlier in this batch",
                            parent.to_base64()
                        ),
                    });
                }
                continue;
            }

            match self.lookup_version(parent)? {
                Some(parent_item) if parent_item.header.id == item.header.id => {}
                Some(parent_item) => {
                    return Err(TreeError::InvalidHeader {
                        id: id_label.clone(),
                        reason: format!(
                            "parent {} belongs to id {:?}, not {:?}",
                            parent.to_base64(),
                            parent_item.header.id,
                            item.header.id
                        ),
                    });
                }
                None => missing.push(parent.to_base64()),
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(TreeError::MissingParents(missing))
        }
    }

    /// A root item may be appended only when no head exists for the same
    /// id, or when every remaining head (after simulating this batch's own
    /// supersessions) is a tombstone.
    fn validate_root(&self, id: &Id, superseded_in_batch: &HashSet<Vec<u8>>) -> Result<(), TreeError> {
        let (start, end) = key::headkey_range(&self.name, id);
        let iter = self
            .db
            .range(Column::Default, &start, &end, Direction::Forward)
            .map_err(TreeError::Io)?;

        for entry in iter {
            let (k, headval) = entry.map_err(TreeError::Io)?;
            let Some(Key::Headkey { v, .. }) = Key::parse(&k, self.i_size, self.v_size) else {
                continue;
            };
            if superseded_in_batch.contains(v.as_bytes()) {
                continue;
            }
            let (opt_byte, _) = key::decode_headval(&headval);
            if opt_byte & DELETE_BIT == 0 {
                return Err(TreeError::RootWhileHeadExists(format!("{id:?}")));
            }
        }

        Ok(())
    }

    fn stage_write(&self, batch: &mut perspectivedb_store::Batch, item: &Item) {
        let v = item.header.v.as_ref().expect("version assigned before staging");
        let i = item.header.i.expect("i assigned before staging");

        let ds_key = key::dskey(&self.name, &item.header.id, self.i_size, i);
        batch.put(Column::Default, ds_key.clone(), codec::encode_item(item));

        let v_key = key::vkey(&self.name, self.v_size, v);
        batch.put(Column::Default, v_key, ds_key.clone());

        let head_key = key::headkey(&self.name, &item.header.id, self.v_size, v);
        let headval = key::encode_headval(item.header.opt_byte(), self.i_size, i);
        batch.put(Column::Default, head_key.clone(), headval);

        let i_key = key::ikey(&self.name, self.i_size, i);
        batch.put(Column::Default, i_key, head_key);

        for parent in &item.header.pa {
            let parent_head_key = key::headkey(&self.name, &item.header.id, self.v_size, parent);
            batch.delete(Column::Default, parent_head_key);
        }

        if let Some(pe) = &item.header.pe {
            let us_key = key::uskey(&self.name, pe, self.i_size, i);
            let v_key = key::vkey(&self.name, self.v_size, v);
            batch.put(Column::Default, us_key, v_key);
        }
    }

    fn allocate_i(&mut self) -> Result<u64, TreeError> {
        if self.next_i.is_none() {
            let (start, end) = key::ikey_range_all(&self.name);
            let mut last = 0_u64;
            let mut iter = self
                .db
                .range(Column::Default, &start, &end, Direction::Reverse)
                .map_err(TreeError::Io)?;
            if let Some(entry) = iter.next() {
                let (k, _) = entry.map_err(TreeError::Io)?;
                if let Some(Key::Ikey { i }) = Key::parse(&k, self.i_size, self.v_size) {
                    last = i;
                }
            }
            self.next_i = Some(last + 1);
        }

        let i = self.next_i.expect("populated above");
        self.next_i = Some(i + 1);
        Ok(i)
    }

    fn lookup_version(&self, v: &Version) -> Result<Option<Item>, TreeError> {
        Ok(self.load_by_version(v)?.map(|(item, _)| item))
    }

    fn load_by_version(&self, v: &Version) -> Result<Option<(Item, Vec<u8>)>, TreeError> {
        let vk = key::vkey(&self.name, self.v_size, v);
        let Some(ds_key) = self.db.get(Column::Default, &vk).map_err(TreeError::Io)? else {
            return Ok(None);
        };
        let Some(bytes) = self
            .db
            .get(Column::Default, ds_key.as_ref())
            .map_err(TreeError::Io)?
        else {
            return Err(TreeError::Io(eyre::eyre!(
                "vkey for {} points at a missing dskey",
                v.to_base64()
            )));
        };
        let item = codec::decode_item(bytes.as_ref(), self.v_size)?;
        Ok(Some((item, Vec::from(ds_key.into_boxed()))))
    }

    pub fn get_by_version(&self, v: &Version) -> Result<Option<Item>, TreeError> {
        self.lookup_version(v)
    }

    pub fn head_versions(&self, id: &Id) -> Result<Vec<Version>, TreeError> {
        let (start, end) = key::headkey_range(&self.name, id);
        let mut out = Vec::new();
        for entry in self
            .db
            .range(Column::Default, &start, &end, Direction::Forward)
            .map_err(TreeError::Io)?
        {
            let (k, _) = entry.map_err(TreeError::Io)?;
            if let Some(Key::Headkey { v, .. }) = Key::parse(&k, self.i_size, self.v_size) {
                out.push(v);
            }
        }
        Ok(out)
    }

    /// Visits every head matching `filter` in headkey order, invoking `f`
    /// with the resolved item. Returning `false` from `f` stops iteration.
    pub fn iterate_heads(
        &self,
        filter: &HeadFilter,
        mut f: impl FnMut(Item) -> bool,
    ) -> Result<(), TreeError> {
        let (start, end) = match &filter.id {
            Some(id) => key::headkey_range(&self.name, id),
            None => key::headkey_range_all(&self.name),
        };

        for entry in self
            .db
            .range(Column::Default, &start, &end, Direction::Forward)
            .map_err(TreeError::Io)?
        {
            let (k, headval) = entry.map_err(TreeError::Io)?;
            let Some(Key::Headkey { v, .. }) = Key::parse(&k, self.i_size, self.v_size) else {
                continue;
            };
            let (opt_byte, _) = key::decode_headval(&headval);
            if filter.skip_conflicts && opt_byte & CONFLICT_BIT != 0 {
                continue;
            }
            if filter.skip_deletes && opt_byte & DELETE_BIT != 0 {
                continue;
            }
            let Some(item) = self.lookup_version(&v)? else {
                continue;
            };
            if !f(item) {
                break;
            }
        }

        Ok(())
    }

    /// Returns every item with `i > last_i`, in insertion order. Used by
    /// [`crate::merge_tree::MergeTree::start_merge`] to resume scanning a
    /// remote tree from where the previous merge pass left off.
    pub fn items_since(&self, last_i: u64) -> Result<Vec<Item>, TreeError> {
        let (start, end) = key::ikey_range_from(&self.name, self.i_size, last_i + 1);
        let mut out = Vec::new();
        for entry in self
            .db
            .range(Column::Default, &start, &end, Direction::Forward)
            .map_err(TreeError::Io)?
        {
            let (_, head_key_bytes) = entry.map_err(TreeError::Io)?;
            let Some(Key::Headkey { v, .. }) = Key::parse(&head_key_bytes, self.i_size, self.v_size) else {
                continue;
            };
            if let Some(item) = self.lookup_version(&v)? {
                out.push(item);
            }
        }
        Ok(out)
    }

    pub fn last_version(&self) -> Result<Option<Version>, TreeError> {
        let (start, end) = key::ikey_range_all(&self.name);
        let mut iter = self
            .db
            .range(Column::Default, &start, &end, Direction::Reverse)
            .map_err(TreeError::Io)?;
        let Some(entry) = iter.next() else {
            return Ok(None);
        };
        let (_, head_key_bytes) = entry.map_err(TreeError::Io)?;
        match Key::parse(&head_key_bytes, self.i_size, self.v_size) {
            Some(Key::Headkey { v, .. }) => Ok(Some(v)),
            _ => Ok(None),
        }
    }

    pub fn last_by_perspective(&self, pe: &Perspective) -> Result<Option<Version>, TreeError> {
        let (start, end) = key::uskey_range(&self.name, pe);
        let mut iter = self
            .db
            .range(Column::Default, &start, &end, Direction::Reverse)
            .map_err(TreeError::Io)?;
        let Some(entry) = iter.next() else {
            return Ok(None);
        };
        let (_, v_key_bytes) = entry.map_err(TreeError::Io)?;
        match Key::parse(&v_key_bytes, self.i_size, self.v_size) {
            Some(Key::Vkey { v }) => Ok(Some(v)),
            _ => Ok(None),
        }
    }

    /// Writes (or rewrites) the uskey entry for `pe` to point at `v`,
    /// without otherwise touching the store. Used when a remote item is
    /// found already present under a new version's identity: the item
    /// itself needs no new write, but replication progress for that
    /// perspective still has to advance.
    pub fn touch_uskey(&mut self, pe: &Perspective, v: &Version, i: u64) -> Result<(), TreeError> {
        let us_key = key::uskey(&self.name, pe, self.i_size, i);
        let v_key = key::vkey(&self.name, self.v_size, v);
        self.db.put(Column::Default, &us_key, &v_key).map_err(TreeError::Io)
    }

    /// Sets the conflict bit on `v`'s headval and stored item. No-op if
    /// already set.
    pub fn set_conflict(&mut self, v: &Version) -> Result<(), TreeError> {
        warn!(version = %v.to_base64(), "flagging version as conflicted");
        self.flip_bit(v, true, false)
    }

    /// Sets the delete (tombstone) bit on `v`'s headval and stored item.
    /// No-op if already set.
    pub fn set_delete(&mut self, v: &Version) -> Result<(), TreeError> {
        self.flip_bit(v, false, true)
    }

    fn flip_bit(&mut self, v: &Version, conflict: bool, delete: bool) -> Result<(), TreeError> {
        let (mut item, _) = self
            .load_by_version(v)?
            .ok_or_else(|| TreeError::NotFound(v.to_base64()))?;

        let already_set = (conflict && item.header.c) || (delete && item.header.d);
        if already_set {
            return Ok(());
        }

        if conflict {
            item.header.c = true;
        }
        if delete {
            item.header.d = true;
        }

        let i = item.header.i.expect("stored items always carry i");
        let ds_key = key::dskey(&self.name, &item.header.id, self.i_size, i);
        let head_key = key::headkey(&self.name, &item.header.id, self.v_size, v);
        let headval = key::encode_headval(item.header.opt_byte(), self.i_size, i);

        let mut batch = perspectivedb_store::Batch::new();
        batch.put(Column::Default, ds_key, codec::encode_item(&item));
        batch.put(Column::Default, head_key, headval);
        self.db.apply_batch(batch).map_err(TreeError::Io)
    }

    /// Removes every index entry and the stored item for `v`. This is a
    /// repair/recovery operation: callers are responsible for only using it
    /// when validation is intentionally bypassed, since it does not
    /// preserve the DAG invariants a normal append enforces.
    pub fn del(&mut self, v: &Version) -> Result<(), TreeError> {
        let (item, ds_key) = self
            .load_by_version(v)?
            .ok_or_else(|| TreeError::NotFound(v.to_base64()))?;

        let mut batch = perspectivedb_store::Batch::new();
        batch.delete(Column::Default, ds_key);
        batch.delete(Column::Default, key::vkey(&self.name, self.v_size, v));
        batch.delete(
            Column::Default,
            key::headkey(&self.name, &item.header.id, self.v_size, v),
        );
        if let Some(i) = item.header.i {
            batch.delete(Column::Default, key::ikey(&self.name, self.i_size, i));
        }
        self.db.apply_batch(batch).map_err(TreeError::Io)
    }

    pub fn stats(&self) -> Result<TreeStats, TreeError> {
        let (hstart, hend) = key::headkey_range_all(&self.name);
        let mut stats = TreeStats::default();
        for entry in self
            .db
            .range(Column::Default, &hstart, &hend, Direction::Forward)
            .map_err(TreeError::Io)?
        {
            let (_, headval) = entry.map_err(TreeError::Io)?;
            let (opt_byte, _) = key::decode_headval(&headval);
            stats.heads += 1;
            if opt_byte & CONFLICT_BIT != 0 {
                stats.conflict_heads += 1;
            }
            if opt_byte & DELETE_BIT != 0 {
                stats.deleted_heads += 1;
            }
        }

        let (istart, iend) = key::ikey_range_all(&self.name);
        stats.item_count = self
            .db
            .range(Column::Default, &istart, &iend, Direction::Forward)
            .map_err(TreeError::Io)?
            .count();

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use perspectivedb_store::MemoryDB;
    use perspectivedb_types::{derive_version, Body, Header};

    use super::*;

    fn root(id: &str) -> Item {
        let header = Header::root(Id::from(id));
        let body = Body::new();
        let mut item = Item::new(header, body);
        item.header.v = Some(derive_version(b"{}", &[], 3));
        item
    }

    fn child(id: &str, parent: Version, salt: &[u8]) -> Item {
        let header = Header {
            id: Id::from(id),
            v: None,
            pa: vec![parent.clone()],
            pe: None,
            i: None,
            c: false,
            d: false,
        };
        let mut item = Item::new(header, Body::new());
        item.header.v = Some(derive_version(salt, &[parent], 3));
        item
    }

    fn new_tree() -> Tree {
        let db: Arc<dyn Database> = Arc::new(MemoryDB::new());
        Tree::new(db, "local", 4, 3)
    }

    #[test]
    fn version_is_unique_within_a_tree() {
        let mut tree = new_tree();
        let a = root("X");
        tree.append(a.clone()).unwrap();

        // Same version, same id: treated as already-present, not an error.
        let outcome = tree.append(a.clone()).unwrap();
        assert!(!outcome.was_inserted());

        // Same version, different id: fatal.
        let mut b = root("Y");
        b.header.v = a.header.v.clone();
        let err = tree.append(b).unwrap_err();
        assert!(matches!(err, TreeError::VersionExistsForDifferentId { .. }));
    }

    #[test]
    fn missing_parent_is_rejected() {
        let mut tree = new_tree();
        let orphan = child("X", Version::from_raw([9_u8, 9, 9]), b"orphan");
        let err = tree.append(orphan).unwrap_err();
        assert!(matches!(err, TreeError::MissingParents(_)));
    }

    #[test]
    fn parent_belonging_to_different_id_is_rejected() {
        let mut tree = new_tree();
        let a = root("X");
        tree.append(a.clone()).unwrap();

        let mismatched = child("Y", a.header.v.unwrap(), b"mismatched");
        let err = tree.append(mismatched).unwrap_err();
        assert!(matches!(err, TreeError::InvalidHeader { .. }));
    }

    #[test]
    fn appending_a_child_moves_the_head() {
        let mut tree = new_tree();
        let a = root("X");
        tree.append(a.clone()).unwrap();
        assert_eq!(tree.head_versions(&Id::from("X")).unwrap(), vec![a.header.v.clone().unwrap()]);

        let b = child("X", a.header.v.clone().unwrap(), b"b");
        tree.append(b.clone()).unwrap();

        assert_eq!(tree.head_versions(&Id::from("X")).unwrap(), vec![b.header.v.unwrap()]);
    }

    #[test]
    fn root_is_rejected_while_a_live_head_exists() {
        let mut tree = new_tree();
        tree.append(root("X")).unwrap();

        let mut second_root = root("X");
        second_root.header.v = Some(Version::from_raw([7_u8, 7, 7]));

        let err = tree.append(second_root).unwrap_err();
        assert!(matches!(err, TreeError::RootWhileHeadExists(_)));
    }

    #[test]
    fn root_after_tombstone_is_accepted() {
        let mut tree = new_tree();
        let a = root("X");
        tree.append(a.clone()).unwrap();
        let b = child("X", a.header.v.clone().unwrap(), b"b");
        let b_v = b.header.v.clone().unwrap();
        tree.append(b).unwrap();
        tree.set_delete(&b_v).unwrap();

        let mut new_root = root("X");
        new_root.header.v = Some(Version::from_raw([5_u8, 5, 5]));
        let outcome = tree.append(new_root).unwrap();
        assert!(outcome.was_inserted());
        // A raw Tree::append of a root doesn't chain onto the tombstone: only
        // the merge-to-local copy path does that (see the integration test
        // root_after_local_tombstone_is_promoted_as_its_successor). At the
        // Tree level the id now has two live heads: the tombstone and the
        // new root.
        assert_eq!(tree.head_versions(&Id::from("X")).unwrap().len(), 2);
    }

    #[test]
    fn intra_batch_parent_satisfies_validation() {
        let mut tree = new_tree();
        let a = root("X");
        let b = child("X", a.header.v.clone().unwrap(), b"b");

        let outcomes = tree.append_many(vec![a, b]).unwrap();
        assert!(outcomes.iter().all(AppendOutcome::was_inserted));
    }

    #[test]
    fn insertion_sequence_is_dense_and_increasing() {
        let mut tree = new_tree();
        let a = root("X");
        let a_v = a.header.v.clone().unwrap();
        let a_i = tree.append(a).unwrap().into_item().header.i.unwrap();
        let b = child("X", a_v, b"b");
        let b_i = tree.append(b).unwrap().into_item().header.i.unwrap();

        assert_eq!(a_i, 1);
        assert_eq!(b_i, 2);
    }

    #[test]
    fn head_filter_skips_conflicts_and_deletes() {
        let mut tree = new_tree();
        let a = root("X");
        let a_v = a.header.v.clone().unwrap();
        tree.append(a).unwrap();
        tree.set_conflict(&a_v).unwrap();

        let mut visited = 0;
        tree.iterate_heads(
            &HeadFilter {
                id: None,
                skip_conflicts: true,
                skip_deletes: false,
            },
            |_| {
                visited += 1;
                true
            },
        )
        .unwrap();
        assert_eq!(visited, 0);
    }

    #[test]
    fn uskey_tracks_the_most_recently_appended_item_for_a_perspective() {
        let mut tree = new_tree();
        let pe = Perspective::from("peer-a");

        let mut a = root("X");
        a.header.pe = Some(pe.clone());
        tree.append(a.clone()).unwrap();
        assert_eq!(tree.last_by_perspective(&pe).unwrap(), a.header.v.clone());

        let mut b = child("X", a.header.v.clone().unwrap(), b"b");
        b.header.pe = Some(pe.clone());
        tree.append(b.clone()).unwrap();
        assert_eq!(tree.last_by_perspective(&pe).unwrap(), b.header.v);
    }

    #[test]
    fn writing_an_existing_item_is_idempotent() {
        let mut tree = new_tree();
        let a = root("X");
        tree.append(a.clone()).unwrap();
        let stats_before = tree.stats().unwrap();
        tree.append(a).unwrap();
        let stats_after = tree.stats().unwrap();
        assert_eq!(stats_before, stats_after);
    }
}
