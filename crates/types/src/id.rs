use core::fmt;

use thiserror::Error;

/// Maximum length, in bytes, of an [`Id`] or [`Perspective`] label.
///
/// Fixed by the key encoding in `perspectivedb-merge-tree::key`: every key
/// that embeds one of these values prefixes it with a single length byte.
pub const MAX_LABEL_LEN: usize = 254;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LabelError {
    #[error("label is {len} bytes, which exceeds the {MAX_LABEL_LEN} byte limit")]
    TooLong { len: usize },
}

/// Opaque object identity. Two items with the same [`Id`] belong to the same
/// per-object DAG.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(Box<[u8]>);

impl Id {
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Result<Self, LabelError> {
        let bytes = bytes.into();
        if bytes.len() > MAX_LABEL_LEN {
            return Err(LabelError::TooLong { len: bytes.len() });
        }
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Wraps bytes already known to satisfy the length limit, e.g. ones
    /// just read back out of a key that stored them successfully.
    #[must_use]
    pub fn from_bytes_unchecked(bytes: impl Into<Box<[u8]>>) -> Self {
        Self(bytes.into())
    }
}

impl AsRef<[u8]> for Id {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        // Construction from a trusted literal; callers passing untrusted,
        // possibly oversized labels should use `Id::new` instead.
        Self(s.as_bytes().into())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match core::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "Id({s:?})"),
            Err(_) => write!(f, "Id({:?})", &self.0),
        }
    }
}

/// A named origin of items. The local perspective is reserved and carries no
/// [`Perspective`] value on its own items.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Perspective(Box<[u8]>);

impl Perspective {
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Result<Self, LabelError> {
        let bytes = bytes.into();
        if bytes.len() > MAX_LABEL_LEN {
            return Err(LabelError::TooLong { len: bytes.len() });
        }
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn from_bytes_unchecked(bytes: impl Into<Box<[u8]>>) -> Self {
        Self(bytes.into())
    }
}

impl AsRef<[u8]> for Perspective {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Perspective {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().into())
    }
}

impl fmt::Debug for Perspective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match core::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "Perspective({s:?})"),
            Err(_) => write!(f, "Perspective({:?})", &self.0),
        }
    }
}
