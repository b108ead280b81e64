//! The item/header data model for PerspectiveDB.
//!
//! This crate is deliberately storage-agnostic: it knows how to represent an
//! item, canonicalize its body, and derive a content-addressed version, but
//! nothing about how items are persisted or merged. `perspectivedb-merge-tree`
//! builds the DAG store and merge engine on top of these types.

pub mod canonical;
pub mod header;
pub mod id;
pub mod version;

pub use canonical::{canonical_bytes, Body};
pub use header::{Header, Item, CONFLICT_BIT, DELETE_BIT};
pub use id::{Id, LabelError, Perspective, MAX_LABEL_LEN};
pub use version::{
    derive_version, random_version, validate_version_size, Version, VersionError,
    MAX_VERSION_SIZE, MIN_VERSION_SIZE,
};
