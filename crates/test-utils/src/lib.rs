//! Shared fixtures for exercising a [`MergeTree`] end to end: temp-dir
//! backed stores and small builders for root/child items, so integration
//! tests across crates don't each hand-roll the same setup.

use std::sync::Arc;

use camino::Utf8PathBuf;
use perspectivedb_merge_tree::{MergeTree, MergeTreeConfig};
use perspectivedb_store::{Database, StoreConfig};
use perspectivedb_store_rocksdb::RocksDB;
use perspectivedb_types::{derive_version, Body, Header, Id, Item, Version};
use tempfile::TempDir;

/// A RocksDB-backed [`Database`] rooted in a temp directory that is removed
/// when the returned [`TempDir`] is dropped.
pub fn temp_rocksdb(dir: &TempDir) -> eyre::Result<Arc<dyn Database>> {
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
        .map_err(|path| eyre::eyre!("temp dir path {path:?} is not valid UTF-8"))?;
    let db = RocksDB::open(&StoreConfig::new(path))?;
    Ok(Arc::new(db))
}

/// A [`MergeTreeConfig`] with the given remote perspectives, rooted at
/// `dir`, using the narrowest sizes the tests care about exercising.
#[must_use]
pub fn test_config(dir: &TempDir, insertion_size: usize, version_size: usize, remotes: &[&str]) -> MergeTreeConfig {
    MergeTreeConfig {
        path: Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap_or_default(),
        insertion_size,
        version_size,
        perspectives: remotes.iter().map(|r| (*r).to_owned()).collect(),
    }
}

/// Opens a [`MergeTree`] over a fresh temp-dir RocksDB store.
pub fn open_merge_tree(dir: &TempDir, insertion_size: usize, version_size: usize, remotes: &[&str]) -> eyre::Result<MergeTree> {
    let db = temp_rocksdb(dir)?;
    let config = test_config(dir, insertion_size, version_size, remotes);
    Ok(MergeTree::open(db, config)?)
}

/// Builds a root item (no parents) for `id` with an empty body, versioned
/// under a `version_size`-byte scheme.
#[must_use]
pub fn root_item(id: &str, version_size: usize) -> Item {
    item_with_body(id, Vec::new(), Body::new(), version_size)
}

/// Builds an item for `id` descending from `parent`, with an empty body.
#[must_use]
pub fn child_item(id: &str, parent: Version, version_size: usize) -> Item {
    item_with_body(id, vec![parent], Body::new(), version_size)
}

/// Builds an item for `id` with the given parents and body, deriving its
/// version the same way [`perspectivedb_merge_tree::merge_tree::LocalWriteStream`]
/// does for a caller that hasn't pre-assigned one.
#[must_use]
pub fn item_with_body(id: &str, parents: Vec<Version>, body: Body, version_size: usize) -> Item {
    let header = Header {
        id: Id::from(id),
        v: None,
        pa: parents.clone(),
        pe: None,
        i: None,
        c: false,
        d: false,
    };
    let mut item = Item::new(header, body);
    let canonical = perspectivedb_types::canonical_bytes(&item.body);
    item.header.v = Some(derive_version(&canonical, &parents, version_size));
    item
}
