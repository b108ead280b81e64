//! Error taxonomy, one-for-one with the append/merge failure modes.

use perspectivedb_types::Version;

/// Failures from a single [`crate::tree::Tree`]'s append/read path.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TreeError {
    #[error("invalid header for id {id:?}: {reason}")]
    InvalidHeader { id: String, reason: String },

    #[error("version {version:?} already exists for a different id (expected {expected:?}, found {found:?})")]
    VersionExistsForDifferentId {
        version: String,
        expected: String,
        found: String,
    },

    #[error("item references missing parents: {0:?}")]
    MissingParents(Vec<String>),

    #[error("root item for id {0:?} rejected: a live (non-tombstone) head already exists")]
    RootWhileHeadExists(String),

    #[error("no such version: {0:?}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] eyre::Error),
}

impl TreeError {
    #[must_use]
    pub fn version_exists_for_different_id(version: &Version, expected: &str, found: &str) -> Self {
        Self::VersionExistsForDifferentId {
            version: version.to_base64(),
            expected: expected.to_owned(),
            found: found.to_owned(),
        }
    }
}

/// Failures from [`crate::merge_tree::MergeTree`]'s coordination layer,
/// wrapping [`TreeError`] for failures that bubble up from a component tree.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MergeError {
    #[error("local write attempted with more than one non-conflicting head")]
    AmbiguousLocalHead,

    #[error("unknown perspective: {0:?}")]
    UnknownPerspective(String),

    #[error("{0:?} is the reserved local perspective name and cannot be used as a remote")]
    ReservedPerspective(String),

    #[error("invalid merge tree configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Tree(#[from] TreeError),
}
