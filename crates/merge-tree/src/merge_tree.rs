//! Coordinates one local [`Tree`], one stage [`Tree`], and N remote
//! [`Tree`]s: the local/remote write paths, the remote-to-local merge
//! pipeline, and the filtered/hooked read path.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use perspectivedb_store::Database;
use perspectivedb_types::{canonical_bytes, derive_version, Id, Item, Perspective, Version};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::{MergeTreeConfig, LOCAL_PERSPECTIVE, STAGE_PERSPECTIVE};
use crate::error::MergeError;
use crate::hooks::{self, Hook, HookStore};
use crate::merger::{self, MergeResult};
use crate::stream::{InsertionOrderStream, StreamHandle, StreamOptions};
use crate::tree::{HeadFilter, Tree, TreeStats};

/// Per-tree head counts, rolled up across local, stage, and every
/// configured remote.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MergeTreeStats {
    pub local: TreeStats,
    pub stage: TreeStats,
    pub remotes: BTreeMap<String, TreeStats>,
}

/// The outcome of pairing one new remote head against the current local
/// (or staged) state of its id.
#[derive(Clone, Debug)]
pub struct MergeEvent {
    /// The new item that was just classified (`n` in §4.3/§8).
    pub new: Item,
    /// The local (or previously staged) head it was paired against, if
    /// any (`o`).
    pub old: Option<Item>,
    /// The conflicting attribute set, if the pairing produced one (`c`).
    pub conflict: Option<BTreeSet<String>>,
}

/// The coordinating store for one logical perspective set: one local
/// tree, one stage tree, and the configured remotes, all sharing the
/// underlying [`Database`].
#[derive(Debug)]
pub struct MergeTree {
    db: Arc<dyn Database>,
    insertion_size: usize,
    version_size: usize,
    local: Tree,
    stage: Tree,
    remotes: BTreeMap<String, Tree>,
    merge_cursors: HashMap<String, u64>,
}

impl MergeTree {
    /// Opens a `MergeTree` over an already-open [`Database`], constructing
    /// the local, stage, and configured remote trees. Mirrors the
    /// `open`/`close`/`flush`/`stats` operator controls a host process
    /// expects (§6); `open` itself never touches the filesystem beyond
    /// what `db` already does, since store lifecycle is the host's concern.
    pub fn open(db: Arc<dyn Database>, config: MergeTreeConfig) -> Result<Self, MergeError> {
        config
            .validate()
            .map_err(|err| MergeError::InvalidConfig(err.to_string()))?;

        let local = Tree::new(Arc::clone(&db), LOCAL_PERSPECTIVE, config.insertion_size, config.version_size);
        let stage = Tree::new(Arc::clone(&db), STAGE_PERSPECTIVE, config.insertion_size, config.version_size);

        let mut remotes = BTreeMap::new();
        for name in config.remote_perspectives() {
            let tree = Tree::new(Arc::clone(&db), name, config.insertion_size, config.version_size);
            let _ = remotes.insert(name.to_owned(), tree);
        }

        Ok(Self {
            db,
            insertion_size: config.insertion_size,
            version_size: config.version_size,
            local,
            stage,
            remotes,
            merge_cursors: HashMap::new(),
        })
    }

    /// Flushes the underlying store.
    pub fn flush(&self) -> eyre::Result<()> {
        self.db.flush()
    }

    /// Flushes and releases this `MergeTree`. Closing is otherwise just
    /// drop: there is no separate handle to release beyond the shared
    /// `Database`, whose own lifecycle belongs to whoever constructed it.
    pub fn close(self) -> eyre::Result<()> {
        self.flush()
    }

    #[must_use]
    pub fn local(&self) -> &Tree {
        &self.local
    }

    /// Mutable access to the local tree, for recovery operations
    /// (`set_conflict`/`set_delete`/`del`) that bypass the write/merge
    /// pipeline. The pipeline itself never needs this: it only ever calls
    /// through `LocalWriteStream`/`MergeStream`.
    pub fn local_mut(&mut self) -> &mut Tree {
        &mut self.local
    }

    #[must_use]
    pub fn stage(&self) -> &Tree {
        &self.stage
    }

    pub fn remote(&self, perspective: &str) -> Result<&Tree, MergeError> {
        self.remotes
            .get(perspective)
            .ok_or_else(|| MergeError::UnknownPerspective(perspective.to_owned()))
    }

    /// Opens a writer that accepts items with no `pa`: parents are derived
    /// from the current local head(s) of each item's id.
    pub fn create_local_write_stream(&mut self) -> LocalWriteStream<'_> {
        LocalWriteStream { tree: self }
    }

    /// Opens a writer for items arriving from `perspective`. Each item is
    /// run through `hooks` before being appended to that remote's tree.
    pub fn create_remote_write_stream<'a>(
        &'a mut self,
        perspective: &str,
        hooks: Vec<Box<dyn Hook>>,
    ) -> Result<RemoteWriteStream<'a>, MergeError> {
        if perspective == LOCAL_PERSPECTIVE {
            return Err(MergeError::ReservedPerspective(perspective.to_owned()));
        }
        if !self.remotes.contains_key(perspective) {
            return Err(MergeError::UnknownPerspective(perspective.to_owned()));
        }
        Ok(RemoteWriteStream {
            tree: self,
            perspective: perspective.to_owned(),
            hooks,
        })
    }

    /// Opens a read stream over the local tree's insertion order, applying
    /// `hooks` in order and rewriting the `pa` of any item that referenced
    /// one a hook dropped so downstream consumers still see a valid DAG.
    pub fn create_read_stream(
        &self,
        options: StreamOptions,
        hooks: Vec<Box<dyn Hook>>,
    ) -> Result<ReadStream<'_>, MergeError> {
        let inner = self.local.insertion_order_stream(options)?;
        Ok(ReadStream {
            inner,
            store: self,
            hooks,
            dropped: HashMap::new(),
        })
    }

    /// Runs one (non-tailing) pass of [`MergeTree::start_merge`] to
    /// completion and returns every event it produced, for callers that
    /// want the simple synchronous form.
    pub fn merge_once(&mut self) -> Result<Vec<MergeEvent>, MergeError> {
        let mut events = Vec::new();
        let mut stream = self.start_merge(false);
        while let Some(event) = stream.next()? {
            events.push(event);
        }
        Ok(events)
    }

    /// Returns a pull-based stream of merge candidates: for each configured
    /// remote, new items since the last pass are paired against the
    /// current local heads of their id, merged via the three-way merger,
    /// and staged. See the state machine in §4.3.
    pub fn start_merge(&mut self, tail: bool) -> MergeStream<'_> {
        MergeStream {
            tree: self,
            tail,
            tail_retry_ms: 50,
            pending: VecDeque::new(),
            chain_heads: HashMap::new(),
            handle: StreamHandle::new(),
        }
    }

    pub fn stats(&self) -> Result<MergeTreeStats, MergeError> {
        let mut remotes = BTreeMap::new();
        for (name, tree) in &self.remotes {
            let _ = remotes.insert(name.clone(), tree.stats()?);
        }
        Ok(MergeTreeStats {
            local: self.local.stats()?,
            stage: self.stage.stats()?,
            remotes,
        })
    }

    /// The signal-triggered stats dump of §6: a single JSON document a
    /// host process can write out on receipt of a stats signal.
    pub fn stats_dump(&self) -> Result<serde_json::Value, MergeError> {
        let stats = self.stats()?;
        serde_json::to_value(stats).map_err(|err| MergeError::InvalidConfig(err.to_string()))
    }

    fn local_non_conflicting_heads(&self, id: &Id) -> Result<Vec<Version>, MergeError> {
        let mut heads = Vec::new();
        self.local.iterate_heads(
            &HeadFilter {
                id: Some(id.clone()),
                skip_conflicts: true,
                skip_deletes: false,
            },
            |item| {
                if let Some(v) = item.header.v {
                    heads.push(v);
                }
                true
            },
        )?;
        Ok(heads)
    }

    /// Resolves a version against every tree this `MergeTree` owns: the
    /// local tree, the stage, then each remote in turn. Ancestors referenced
    /// by a merge candidate's `pa` may live in any of them.
    fn resolve_version(&self, v: &Version) -> Result<Option<Item>, MergeError> {
        if let Some(item) = self.local.get_by_version(v)? {
            return Ok(Some(item));
        }
        if let Some(item) = self.stage.get_by_version(v)? {
            return Ok(Some(item));
        }
        for tree in self.remotes.values() {
            if let Some(item) = tree.get_by_version(v)? {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    /// The set of ancestor versions of `start`, including `start` itself,
    /// found by walking `pa` through whichever tree holds each ancestor.
    fn ancestors_closure(&self, start: &Version) -> Result<HashSet<Vec<u8>>, MergeError> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(start.clone());

        while let Some(v) = queue.pop_front() {
            if !seen.insert(v.as_bytes().to_vec()) {
                continue;
            }
            if let Some(item) = self.resolve_version(&v)? {
                for parent in &item.header.pa {
                    queue.push_back(parent.clone());
                }
            }
        }

        Ok(seen)
    }

    /// Finds the lowest common ancestor of `a` and `b`: among every version
    /// present in both ancestry closures, the one with the largest ancestry
    /// of its own (i.e. the most recently derived common ancestor).
    fn lowest_common_ancestor(&self, a: &Version, b: &Version) -> Result<Option<Item>, MergeError> {
        let ancestors_a = self.ancestors_closure(a)?;
        let ancestors_b = self.ancestors_closure(b)?;

        let mut best: Option<(Vec<u8>, usize)> = None;
        for candidate in ancestors_a.intersection(&ancestors_b) {
            let depth = self
                .ancestors_closure(&Version::from_raw(candidate.clone()))?
                .len();
            let replace = match &best {
                Some((_, best_depth)) => depth > *best_depth,
                None => true,
            };
            if replace {
                best = Some((candidate.clone(), depth));
            }
        }

        match best {
            Some((bytes, _)) => self.resolve_version(&Version::from_raw(bytes)),
            None => Ok(None),
        }
    }
}

impl HookStore for MergeTree {
    fn get_by_version(&self, v: &Version) -> Option<Item> {
        self.resolve_version(v).ok().flatten()
    }
}

/// Writer returned by [`MergeTree::create_local_write_stream`].
pub struct LocalWriteStream<'a> {
    tree: &'a mut MergeTree,
}

impl LocalWriteStream<'_> {
    /// Writes one item. `item.header.pa` is always overwritten with the
    /// current local head(s) of `item.header.id`, matching the "accepts
    /// items without `pa`" contract in §4.3.
    #[instrument(level = "debug", skip(self, item), fields(id = %format!("{:?}", item.header.id)))]
    pub fn write(&mut self, mut item: Item) -> Result<Item, MergeError> {
        let heads = self.tree.local_non_conflicting_heads(&item.header.id)?;
        match heads.len() {
            0 => item.header.pa = Vec::new(),
            1 => item.header.pa = vec![heads[0].clone()],
            _ => return Err(MergeError::AmbiguousLocalHead),
        }

        if item.header.v.is_none() {
            let canonical = canonical_bytes(&item.body);
            item.header.v = Some(derive_version(&canonical, &item.header.pa, self.tree.version_size));
        }
        let v = item.header.v.clone().expect("assigned above");

        // A previously computed merge may already be sitting in the stage
        // tree under this exact version; promote it instead of writing a
        // second copy.
        if let Some(staged) = self.tree.stage.get_by_version(&v)? {
            self.tree.stage.del(&v)?;
            // The staged item's parents may live in the local tree, a
            // remote tree, or both: they were already resolved by the
            // merge coordinator, so promotion skips per-tree parent
            // validation rather than re-deriving it here.
            let outcome = self.tree.local.append_trusted(staged)?;
            return Ok(outcome.into_item());
        }

        let outcome = self.tree.local.append(item)?;
        Ok(outcome.into_item())
    }
}

/// Writer returned by [`MergeTree::create_remote_write_stream`].
pub struct RemoteWriteStream<'a> {
    tree: &'a mut MergeTree,
    perspective: String,
    hooks: Vec<Box<dyn Hook>>,
}

impl RemoteWriteStream<'_> {
    /// Runs `item` through the configured hooks, then appends it to this
    /// perspective's remote tree. Returns `Ok(None)` if a hook dropped the
    /// item before it reached the tree.
    pub fn write(&mut self, item: Item) -> Result<Option<Item>, MergeError> {
        let pe_matches = item
            .header
            .pe
            .as_ref()
            .is_some_and(|pe| pe.as_bytes() == self.perspective.as_bytes());
        if !pe_matches {
            return Err(MergeError::Tree(crate::error::TreeError::InvalidHeader {
                id: format!("{:?}", item.header.id),
                reason: format!(
                    "item's pe does not match the remote write stream's configured perspective {:?}",
                    self.perspective
                ),
            }));
        }

        let Some(transformed) = hooks::run_hooks(&*self.tree, &self.hooks, item) else {
            return Ok(None);
        };

        let remote = self
            .tree
            .remotes
            .get_mut(&self.perspective)
            .ok_or_else(|| MergeError::UnknownPerspective(self.perspective.clone()))?;
        let outcome = remote.append(transformed)?;
        Ok(Some(outcome.into_item()))
    }
}

/// Read stream returned by [`MergeTree::create_read_stream`]: applies
/// hooks/filters and rewrites `pa` for items that referenced a dropped
/// item, preserving DAG connectivity for downstream consumers.
pub struct ReadStream<'a> {
    inner: InsertionOrderStream,
    store: &'a MergeTree,
    hooks: Vec<Box<dyn Hook>>,
    /// Maps a dropped item's version to the surviving ancestors it should
    /// be replaced by wherever it appears as a parent.
    dropped: HashMap<Vec<u8>, Vec<Version>>,
}

impl ReadStream<'_> {
    pub fn next(&mut self) -> Result<Option<Item>, MergeError> {
        loop {
            let Some(mut item) = self.inner.next()? else {
                return Ok(None);
            };

            item.header.pa = item
                .header
                .pa
                .iter()
                .flat_map(|p| self.substitute(p))
                .collect();

            let Some(original_v) = item.header.v.clone() else {
                continue;
            };

            match hooks::run_hooks(self.store, &self.hooks, item) {
                Some(kept) => return Ok(Some(kept)),
                None => {
                    let surviving = self
                        .dropped
                        .get(original_v.as_bytes())
                        .cloned()
                        .unwrap_or_default();
                    let _ = self.dropped.insert(original_v.as_bytes().to_vec(), surviving);
                }
            }
        }
    }

    fn substitute(&self, v: &Version) -> Vec<Version> {
        match self.dropped.get(v.as_bytes()) {
            Some(surviving) => surviving.clone(),
            None => vec![v.clone()],
        }
    }
}

impl Iterator for ReadStream<'_> {
    type Item = Result<Item, MergeError>;

    fn next(&mut self) -> Option<Self::Item> {
        ReadStream::next(self).transpose()
    }
}

/// Stream of [`MergeEvent`]s returned by [`MergeTree::start_merge`].
pub struct MergeStream<'a> {
    tree: &'a mut MergeTree,
    tail: bool,
    tail_retry_ms: u64,
    pending: VecDeque<MergeEvent>,
    /// Per-id "current local head" used while chaining multiple remote
    /// heads for the same id within one pass: it starts as the real local
    /// head and advances to each newly staged merge item.
    chain_heads: HashMap<Vec<u8>, Version>,
    handle: StreamHandle,
}

impl MergeStream<'_> {
    #[must_use]
    pub fn handle(&self) -> StreamHandle {
        self.handle.clone()
    }

    pub fn next(&mut self) -> Result<Option<MergeEvent>, MergeError> {
        loop {
            if self.handle.is_closed() {
                return Ok(None);
            }

            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            self.poll_remotes()?;

            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            if !self.tail || self.handle.is_closed() {
                return Ok(None);
            }

            thread::sleep(Duration::from_millis(self.tail_retry_ms));
        }
    }

    #[instrument(level = "debug", skip(self))]
    fn poll_remotes(&mut self) -> Result<(), MergeError> {
        let perspective_names: Vec<String> = self.tree.remotes.keys().cloned().collect();

        for name in perspective_names {
            let last_i = self.tree.merge_cursors.get(&name).copied().unwrap_or(0);
            let items = self.tree.remotes[&name].items_since(last_i)?;

            for remote_item in items {
                let i = remote_item.header.i.expect("stored items always carry i");
                let _ = self.tree.merge_cursors.insert(name.clone(), i);
                self.process_remote_item(&name, remote_item)?;
            }
        }

        Ok(())
    }

    fn process_remote_item(&mut self, perspective: &str, remote_item: Item) -> Result<(), MergeError> {
        let id_key = remote_item.header.id.as_bytes().to_vec();
        let remote_v = remote_item
            .header
            .v
            .clone()
            .expect("remote items always carry an assigned version");

        if self.tree.local.get_by_version(&remote_v)?.is_some() {
            let i = remote_item.header.i.expect("stored items always carry i");
            let pe = Perspective::from_bytes_unchecked(perspective.as_bytes().to_vec());
            self.tree.local.touch_uskey(&pe, &remote_v, i)?;
            self.pending.push_back(MergeEvent {
                new: remote_item,
                old: None,
                conflict: None,
            });
            return Ok(());
        }

        let current_head = match self.chain_heads.get(&id_key) {
            Some(v) => self.tree.resolve_version(v)?,
            None => {
                let heads = self.tree.local_non_conflicting_heads(&remote_item.header.id)?;
                match heads.first() {
                    Some(v) => self.tree.resolve_version(v)?,
                    None => None,
                }
            }
        };

        let Some(local_head) = current_head else {
            self.stage_and_emit(remote_item.clone(), None, None)?;
            let _ = self.chain_heads.insert(id_key, remote_v);
            return Ok(());
        };

        let local_v = local_head.header.v.clone().expect("stored items always carry v");

        if remote_item.header.pa.contains(&local_v) {
            self.stage_and_emit(remote_item.clone(), Some(local_head), None)?;
            let _ = self.chain_heads.insert(id_key, remote_v);
            return Ok(());
        }

        let lca = self.tree.lowest_common_ancestor(&remote_v, &local_v)?;
        match merger::merge(&remote_item, Some(&local_head), lca.as_ref(), self.tree.version_size) {
            MergeResult::NoOp => Ok(()),
            MergeResult::Merged(merged) => {
                let merged_v = merged.header.v.clone().expect("merger always assigns a version");
                self.stage_and_emit(merged.clone(), Some(local_head), None)?;
                let _ = self.chain_heads.insert(id_key, merged_v);
                Ok(())
            }
            MergeResult::Conflict(attrs) => {
                let mut conflicted = remote_item.clone();
                conflicted.header.c = true;
                self.stage_and_emit(conflicted, Some(local_head), Some(attrs))?;
                Ok(())
            }
        }
    }

    fn stage_and_emit(
        &mut self,
        item: Item,
        old: Option<Item>,
        conflict: Option<BTreeSet<String>>,
    ) -> Result<(), MergeError> {
        let v = item.header.v.clone().expect("staged items always carry v");
        let outcome = if self.tree.stage.get_by_version(&v)?.is_some() {
            None
        } else {
            // `item`'s parents live in local/remote trees, not stage's own
            // keyspace, so staging uses the trusted append path too.
            Some(self.tree.stage.append_trusted(item.clone())?.into_item())
        };

        if outcome.is_none() {
            warn!(version = %v.to_base64(), "merge pass re-derived an already-staged item");
        } else {
            info!(version = %v.to_base64(), conflict = conflict.is_some(), "staged merge candidate");
        }

        self.pending.push_back(MergeEvent {
            new: outcome.unwrap_or(item),
            old,
            conflict,
        });
        Ok(())
    }
}

impl Iterator for MergeStream<'_> {
    type Item = Result<MergeEvent, MergeError>;

    fn next(&mut self) -> Option<Self::Item> {
        MergeStream::next(self).transpose()
    }
}
