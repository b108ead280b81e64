use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Valid range for `vSize`, the fixed byte width of a [`Version`].
pub const MIN_VERSION_SIZE: usize = 1;
pub const MAX_VERSION_SIZE: usize = 6;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VersionError {
    #[error("version size {size} is outside the valid range [{MIN_VERSION_SIZE}, {MAX_VERSION_SIZE}]")]
    InvalidSize { size: usize },

    #[error("version decoded to {actual} bytes, expected {expected}")]
    WrongLength { expected: usize, actual: usize },

    #[error("invalid base64 in version: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Validates a configured `vSize`.
pub fn validate_version_size(size: usize) -> Result<(), VersionError> {
    if (MIN_VERSION_SIZE..=MAX_VERSION_SIZE).contains(&size) {
        Ok(())
    } else {
        Err(VersionError::InvalidSize { size })
    }
}

/// A fixed-width version identifier, stored as exactly `vSize` raw bytes and
/// exchanged on the wire as URL-safe base64 without padding.
///
/// Versions are never arithmetic counters: for manually written items they
/// are a truncated content hash (see [`derive_version`]); for remote items
/// they arrive opaque and are never recomputed.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(Box<[u8]>);

impl Version {
    /// Wraps raw bytes as a version, without validating size against any
    /// particular tree's configured `vSize` (that check happens where a
    /// `Version` is first read against a `MergeTreeConfig`).
    #[must_use]
    pub fn from_raw(bytes: impl Into<Box<[u8]>>) -> Self {
        Self(bytes.into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }

    /// Decodes a base64 string into a version of exactly `size` bytes.
    ///
    /// The source implementation sometimes compared `vSize` against the
    /// base64 character count via `v.length * 6 == vSize * 8`, which only
    /// admits `vSize` that are multiples of 3. This accepts any `vSize` in
    /// `[1, 6]` and instead checks the decoded byte length directly, letting
    /// base64 padding fall out naturally.
    pub fn from_base64(s: &str, size: usize) -> Result<Self, VersionError> {
        let decoded = URL_SAFE_NO_PAD.decode(s)?;
        if decoded.len() != size {
            return Err(VersionError::WrongLength {
                expected: size,
                actual: decoded.len(),
            });
        }
        Ok(Self(decoded.into_boxed_slice()))
    }
}

impl AsRef<[u8]> for Version {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl core::fmt::Debug for Version {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Version({})", self.to_base64())
    }
}

/// Derives a deterministic version for a locally written item that lacks
/// one: the first `size` bytes of `SHA-256(canonical_bytes(body) ||
/// sorted(parents))`.
///
/// Two independent processes given the same body and parent set derive the
/// same version string: the hash only depends on
/// content, never on wall-clock time or process identity.
pub fn derive_version(canonical_body: &[u8], parents: &[Version], size: usize) -> Version {
    let mut sorted: Vec<&Version> = parents.iter().collect();
    sorted.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));

    let mut hasher = Sha256::new();
    hasher.update(canonical_body);
    for parent in sorted {
        hasher.update(parent.as_bytes());
    }
    let digest = hasher.finalize();

    Version::from_raw(&digest[..size])
}

/// Generates a cryptographically random version of `size` bytes, for items
/// with no stable content to hash (e.g. an empty body with parents shared
/// by a sibling write).
#[must_use]
pub fn random_version(size: usize) -> Version {
    let mut bytes = vec![0_u8; size];
    OsRng.fill_bytes(&mut bytes);
    Version::from_raw(bytes)
}
