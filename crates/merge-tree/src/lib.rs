//! The Merge Tree: a content-addressed, append-only, multi-DAG version
//! store built on an ordered byte-keyed embedded key-value store.
//!
//! This crate is the core of PerspectiveDB. [`tree::Tree`] owns key
//! encoding, indexes, and per-perspective append/validate/iterate
//! (§4.1-4.2); [`merge_tree::MergeTree`] composes a local tree, a stage
//! tree, and the configured remote trees into the write and merge
//! pipeline (§4.3); [`merger`] is the three-way merge algorithm (§4.4);
//! [`hooks`] is the pluggable transform seam read streams and remote
//! writes run items through (§4.6). Everything outside this crate — the
//! socket layer, authentication, external database adapters, process
//! supervision — is a collaborator this crate never depends on.

pub mod codec;
pub mod config;
pub mod error;
pub mod hooks;
pub mod key;
pub mod merge_tree;
pub mod merger;
pub mod stream;
pub mod tree;

pub use config::{MergeTreeConfig, LOCAL_PERSPECTIVE, STAGE_PERSPECTIVE};
pub use error::{MergeError, TreeError};
pub use hooks::{AttributeEquals, Hook, HookStore};
pub use merge_tree::{
    LocalWriteStream, MergeEvent, MergeStream, MergeTree, MergeTreeStats, ReadStream,
    RemoteWriteStream,
};
pub use merger::MergeResult;
pub use stream::{InsertionOrderStream, StreamHandle, StreamOptions};
pub use tree::{AppendOutcome, HeadFilter, Tree, TreeStats};
