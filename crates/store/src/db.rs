use strum::{EnumIter, IntoEnumIterator};

use crate::slice::Slice;

/// Columns are a future-proofing seam: the merge tree keeps every key in a
/// single logical keyspace, namespaced by its own tree prefix rather
/// than by column family, so today there is exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter)]
pub enum Column {
    Default,
}

impl Column {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
        }
    }

    pub fn iter_all() -> impl Iterator<Item = Self> {
        Self::iter()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// A single write queued into a [`Batch`].
#[derive(Clone, Debug)]
pub enum Operation {
    Put {
        column: Column,
        key: Box<[u8]>,
        value: Box<[u8]>,
    },
    Delete {
        column: Column,
        key: Box<[u8]>,
    },
}

/// An ordered group of writes applied atomically by [`Database::apply_batch`].
///
/// Every append in the merge tree is expressed as exactly one batch, so that
/// a validation failure partway through never leaves the store with a
/// headkey pointing at a dskey that was never written, or vice versa.
#[derive(Clone, Debug, Default)]
pub struct Batch {
    operations: Vec<Operation>,
}

impl Batch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, column: Column, key: impl Into<Box<[u8]>>, value: impl Into<Box<[u8]>>) {
        self.operations.push(Operation::Put {
            column,
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, column: Column, key: impl Into<Box<[u8]>>) {
        self.operations.push(Operation::Delete {
            column,
            key: key.into(),
        });
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }
}

/// A cursor over one column's full keyspace, matching the shape the test
/// suite exercises (`seek`, `read`, `keys`, `entries`).
pub trait DbIter {
    /// Moves the cursor to the first key `>= key`, returning it if present.
    fn seek(&mut self, key: Slice<'_>) -> eyre::Result<Option<Slice<'static>>>;

    /// Reads the value at the cursor's current position.
    fn read(&self) -> eyre::Result<Slice<'static>>;

    fn keys(self: Box<Self>) -> Box<dyn Iterator<Item = eyre::Result<Slice<'static>>>>;

    #[allow(
        clippy::type_complexity,
        reason = "mirrors the (key, value) pairing the cursor yields"
    )]
    fn entries(
        self: Box<Self>,
    ) -> Box<dyn Iterator<Item = (eyre::Result<Slice<'static>>, eyre::Result<Slice<'static>>)>>;
}

pub type RangeItem = eyre::Result<(Box<[u8]>, Box<[u8]>)>;

/// The ordered byte-keyed KV store contract required by the merge tree:
/// point reads/writes, atomic multi-key batches, and ranged
/// forward/reverse cursors.
pub trait Database: Send + Sync + core::fmt::Debug {
    fn get(&self, column: Column, key: &[u8]) -> eyre::Result<Option<Slice<'static>>>;

    fn has(&self, column: Column, key: &[u8]) -> eyre::Result<bool> {
        Ok(self.get(column, key)?.is_some())
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> eyre::Result<()>;

    fn delete(&self, column: Column, key: &[u8]) -> eyre::Result<()>;

    fn apply_batch(&self, batch: Batch) -> eyre::Result<()>;

    /// Flushes any buffered writes to durable storage. Backends with no
    /// write buffering (the in-memory store) treat this as a no-op.
    fn flush(&self) -> eyre::Result<()> {
        Ok(())
    }

    /// A cursor over the entire column, ordered by key.
    fn iter(&self, column: Column) -> eyre::Result<Box<dyn DbIter + '_>>;

    /// A cursor over the half-open range `[start, end)`, in the given
    /// direction. An empty `end` means "no upper bound".
    fn range<'a>(
        &'a self,
        column: Column,
        start: &[u8],
        end: &[u8],
        direction: Direction,
    ) -> eyre::Result<Box<dyn Iterator<Item = RangeItem> + 'a>>;
}
