//! Pull-based insertion-order streams over a [`crate::tree::Tree`],
//! including tailable readers.
//!
//! Streams are plain iterators rather than an async/callback abstraction:
//! the underlying [`perspectivedb_store::Database`] cursor is already
//! synchronous, and a pull-based `Iterator` gives backpressure for free
//! (the caller only advances the cursor when it calls `next`).

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use perspectivedb_store::{Column, Database, Direction};
use perspectivedb_types::{Id, Item, Version};

use crate::codec;
use crate::error::TreeError;
use crate::key::{self, Key};

/// Options for [`crate::tree::Tree::insertion_order_stream`].
#[derive(Clone, Debug, Default)]
pub struct StreamOptions {
    pub id: Option<Id>,
    pub first: Option<Version>,
    pub last: Option<Version>,
    pub exclude_first: bool,
    pub exclude_last: bool,
    pub reverse: bool,
    /// Keeps the stream open past the last currently-stored item,
    /// re-polling the store every `tail_retry_ms`. Mutually exclusive with
    /// `last`, `exclude_last`, and `reverse`.
    pub tail: bool,
    pub tail_retry_ms: u64,
}

impl StreamOptions {
    /// Validates the mutual-exclusivity rules tail imposes.
    pub fn validate(&self) -> Result<(), TreeError> {
        if self.tail && (self.last.is_some() || self.exclude_last || self.reverse) {
            return Err(TreeError::InvalidHeader {
                id: String::new(),
                reason: "tail is mutually exclusive with last, exclude_last, and reverse".to_owned(),
            });
        }
        Ok(())
    }
}

/// A handle used to stop a running [`InsertionOrderStream`] from another
/// thread. Distinguishes an immediate stop from one that lets the current
/// cursor drain before stopping.
#[derive(Clone, Debug)]
pub struct StreamHandle {
    inner: Arc<std::sync::atomic::AtomicU8>,
}

const RUNNING: u8 = 0;
const CLOSE_AFTER_CURRENT: u8 = 1;
const CLOSE_NOW: u8 = 2;

impl StreamHandle {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(std::sync::atomic::AtomicU8::new(RUNNING)),
        }
    }

    /// True once `close()` has taken effect (immediate close only;
    /// `close_after_current` reports closed only after the drain
    /// reaches that point).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == CLOSE_NOW
    }

    /// Stops emission immediately; the next call to `next()` returns `None`
    /// even if more items are buffered.
    pub fn close(&self) {
        self.inner.store(CLOSE_NOW, std::sync::atomic::Ordering::SeqCst);
    }

    /// Lets whatever is already buffered for the current cursor drain, then
    /// stops before the next store round-trip (relevant only to tailing
    /// streams, which otherwise re-poll forever).
    pub fn close_after_current(&self) {
        let _ = self.inner.compare_exchange(
            RUNNING,
            CLOSE_AFTER_CURRENT,
            std::sync::atomic::Ordering::SeqCst,
            std::sync::atomic::Ordering::SeqCst,
        );
    }

    fn state(&self) -> u8 {
        self.inner.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// A lazy sequence of items in insertion (`i`) order.
pub struct InsertionOrderStream {
    db: Arc<dyn Database>,
    tree_name: Vec<u8>,
    i_size: usize,
    v_size: usize,
    options: StreamOptions,
    handle: StreamHandle,
    buffer: std::vec::IntoIter<Item>,
    last_emitted_i: Option<u64>,
    exhausted_non_tail: bool,
}

impl InsertionOrderStream {
    pub(crate) fn new(
        db: Arc<dyn Database>,
        tree_name: Vec<u8>,
        i_size: usize,
        v_size: usize,
        options: StreamOptions,
    ) -> Result<Self, TreeError> {
        options.validate()?;
        Ok(Self {
            db,
            tree_name,
            i_size,
            v_size,
            options,
            handle: StreamHandle::new(),
            buffer: Vec::new().into_iter(),
            last_emitted_i: None,
            exhausted_non_tail: false,
        })
    }

    #[must_use]
    pub fn handle(&self) -> StreamHandle {
        self.handle.clone()
    }

    fn bound_range(&self) -> Result<(Vec<u8>, Vec<u8>), TreeError> {
        if let Some(from) = self.last_emitted_i {
            return Ok(key::ikey_range_from(&self.tree_name, self.i_size, from + 1));
        }

        if let Some(first) = &self.options.first {
            let i = self.i_for_version(first)?;
            let start_i = if self.options.exclude_first { i + 1 } else { i };
            let (_, end) = key::ikey_range_all(&self.tree_name);
            return Ok((key::ikey(&self.tree_name, self.i_size, start_i), end));
        }

        Ok(key::ikey_range_all(&self.tree_name))
    }

    fn i_for_version(&self, v: &Version) -> Result<u64, TreeError> {
        let vk = key::vkey(&self.tree_name, self.v_size, v);
        let ds_key = self
            .db
            .get(Column::Default, &vk)
            .map_err(TreeError::Io)?
            .ok_or_else(|| TreeError::NotFound(v.to_base64()))?;
        let bytes = self
            .db
            .get(Column::Default, ds_key.as_ref())
            .map_err(TreeError::Io)?
            .ok_or_else(|| TreeError::NotFound(v.to_base64()))?;
        let item = codec::decode_item(bytes.as_ref(), self.v_size)?;
        item.header
            .i
            .ok_or_else(|| TreeError::NotFound(v.to_base64()))
    }

    fn fill_buffer(&mut self) -> Result<bool, TreeError> {
        let (start, end) = self.bound_range()?;
        let direction = if self.options.reverse {
            Direction::Reverse
        } else {
            Direction::Forward
        };

        let last_i = self
            .options
            .last
            .as_ref()
            .map(|last| self.i_for_version(last))
            .transpose()?;

        let mut items = Vec::new();
        let mut saw_any = false;

        for entry in self
            .db
            .range(Column::Default, &start, &end, direction)
            .map_err(TreeError::Io)?
        {
            let (k, head_key_bytes) = entry.map_err(TreeError::Io)?;
            let Some(Key::Ikey { i }) = Key::parse(&k, self.i_size, self.v_size) else {
                continue;
            };
            saw_any = true;

            if let Some(id) = &self.options.id {
                let Some(Key::Headkey { id: head_id, .. }) =
                    Key::parse(&head_key_bytes, self.i_size, self.v_size)
                else {
                    continue;
                };
                if &head_id != id {
                    continue;
                }
            }

            if let Some(last_i) = last_i {
                if (self.options.exclude_last && i >= last_i) || (!self.options.exclude_last && i > last_i) {
                    continue;
                }
            }

            let Some(Key::Headkey { v, .. }) = Key::parse(&head_key_bytes, self.i_size, self.v_size)
            else {
                continue;
            };
            let vk = key::vkey(&self.tree_name, self.v_size, &v);
            let Some(ds_key) = self.db.get(Column::Default, &vk).map_err(TreeError::Io)? else {
                continue;
            };
            let Some(bytes) = self
                .db
                .get(Column::Default, ds_key.as_ref())
                .map_err(TreeError::Io)?
            else {
                continue;
            };
            let item = codec::decode_item(bytes.as_ref(), self.v_size)?;
            self.last_emitted_i = Some(i);
            items.push(item);
        }

        self.buffer = items.into_iter();
        Ok(saw_any)
    }

    /// Pulls the next item, blocking (via `tail_retry_ms` polling sleeps)
    /// only when tailing an exhausted store. Returns `Ok(None)` when the
    /// stream is closed or, for a non-tailing stream, genuinely finished.
    pub fn next(&mut self) -> Result<Option<Item>, TreeError> {
        loop {
            if self.handle.state() == CLOSE_NOW {
                return Ok(None);
            }

            if let Some(item) = self.buffer.next() {
                return Ok(Some(item));
            }

            if self.exhausted_non_tail {
                return Ok(None);
            }

            let _ = self.fill_buffer()?;

            // A non-tailing stream's single scan over `bound_range()` already
            // captures every match (the whole range, or everything from
            // `first` onward); refilling again would re-scan from
            // `last_emitted_i + 1`, which only makes sense for a tailing
            // stream picking up items written after it last polled. For
            // `reverse`, `last_emitted_i` ends up holding the *smallest* `i`
            // emitted, so a second fill would re-walk and re-emit everything
            // above it — mark non-tail streams exhausted right after their
            // one and only fill instead of ever refilling them.
            if !self.options.tail {
                self.exhausted_non_tail = true;
            }

            if let Some(item) = self.buffer.next() {
                return Ok(Some(item));
            }

            if !self.options.tail {
                return Ok(None);
            }

            if self.handle.state() != RUNNING {
                return Ok(None);
            }

            thread::sleep(Duration::from_millis(self.options.tail_retry_ms));
        }
    }
}

impl Iterator for InsertionOrderStream {
    type Item = Result<Item, TreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        InsertionOrderStream::next(self).transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use perspectivedb_store::MemoryDB;
    use perspectivedb_types::{derive_version, Body, Header};

    use super::*;
    use crate::tree::Tree;

    fn item(id: &str, parents: Vec<Version>) -> Item {
        let header = Header {
            id: Id::from(id),
            v: None,
            pa: parents.clone(),
            pe: None,
            i: None,
            c: false,
            d: false,
        };
        let body = Body::new();
        let mut item = Item::new(header, body);
        let bytes = codec::body_as_value(&item.body).to_string();
        item.header.v = Some(derive_version(bytes.as_bytes(), &parents, 3));
        item
    }

    #[test]
    fn tail_stream_yields_items_appended_after_open() {
        let db: Arc<dyn Database> = Arc::new(MemoryDB::new());
        let mut tree = Tree::new(Arc::clone(&db), "local", 4, 3);

        let mut stream = InsertionOrderStream::new(
            Arc::clone(&db),
            b"local".to_vec(),
            4,
            3,
            StreamOptions {
                tail: true,
                tail_retry_ms: 5,
                ..Default::default()
            },
        )
        .unwrap();

        let handle = stream.handle();

        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let a = item("X", vec![]);
            tree.append(a.clone()).unwrap();
            thread::sleep(Duration::from_millis(20));
            let b = item("X", vec![a.header.v.unwrap()]);
            tree.append(b).unwrap();
        });

        let first = stream.next().unwrap().unwrap();
        let second = stream.next().unwrap().unwrap();
        assert_eq!(first.header.i, Some(1));
        assert_eq!(second.header.i, Some(2));

        handle.close();
        writer.join().unwrap();
    }

    #[test]
    fn non_tail_stream_stops_once_exhausted() {
        let db: Arc<dyn Database> = Arc::new(MemoryDB::new());
        let mut tree = Tree::new(Arc::clone(&db), "local", 4, 3);
        tree.append(item("X", vec![])).unwrap();

        let mut stream = InsertionOrderStream::new(
            Arc::clone(&db),
            b"local".to_vec(),
            4,
            3,
            StreamOptions::default(),
        )
        .unwrap();

        assert!(stream.next().unwrap().is_some());
        assert!(stream.next().unwrap().is_none());
    }

    #[test]
    fn reverse_stream_yields_items_newest_first_without_duplicates() {
        let db: Arc<dyn Database> = Arc::new(MemoryDB::new());
        let mut tree = Tree::new(Arc::clone(&db), "local", 4, 3);

        let a = item("X", vec![]);
        tree.append(a.clone()).unwrap();
        let b = item("Y", vec![]);
        tree.append(b.clone()).unwrap();
        let c = item("Z", vec![]);
        tree.append(c.clone()).unwrap();

        let mut stream = InsertionOrderStream::new(
            Arc::clone(&db),
            b"local".to_vec(),
            4,
            3,
            StreamOptions {
                reverse: true,
                ..Default::default()
            },
        )
        .unwrap();

        let first = stream.next().unwrap().unwrap();
        let second = stream.next().unwrap().unwrap();
        let third = stream.next().unwrap().unwrap();
        assert_eq!(first.header.id, c.header.id);
        assert_eq!(second.header.id, b.header.id);
        assert_eq!(third.header.id, a.header.id);

        assert!(stream.next().unwrap().is_none());
        assert!(stream.next().unwrap().is_none());
    }
}
