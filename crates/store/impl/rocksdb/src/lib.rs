//! RocksDB-backed [`Database`] implementation.

use std::path::Path;

use camino::Utf8PathBuf;
use eyre::WrapErr;
use perspectivedb_store::{
    Batch, Column, DbIter, Direction, Operation, RangeItem, Slice, StoreConfig,
};
use rocksdb::{Direction as RocksDirection, IteratorMode, Options, WriteBatch, DB};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to open rocksdb at {path}")]
    Open {
        path: Utf8PathBuf,
        #[source]
        source: rocksdb::Error,
    },
}

/// A `Database` backed by a single RocksDB instance. The store keeps all
/// keys in one logical keyspace (see [`Column`]), so no column families are
/// opened beyond RocksDB's default one.
#[derive(Debug)]
pub struct RocksDB {
    db: DB,
}

impl RocksDB {
    pub fn open(config: &StoreConfig) -> eyre::Result<Self> {
        let mut options = Options::default();
        options.create_if_missing(true);
        options.create_missing_column_families(true);

        let db = DB::open(&options, path_for(&config.path)).map_err(|source| Error::Open {
            path: config.path.clone(),
            source,
        })?;

        Ok(Self { db })
    }
}

fn path_for(path: &Utf8PathBuf) -> &Path {
    path.as_std_path()
}

struct RocksIter<'a> {
    db: &'a DB,
    cursor: Option<(Box<[u8]>, Box<[u8]>)>,
}

impl DbIter for RocksIter<'_> {
    fn seek(&mut self, key: Slice<'_>) -> eyre::Result<Option<Slice<'static>>> {
        let mut iter = self
            .db
            .iterator(IteratorMode::From(key.as_ref(), RocksDirection::Forward));

        match iter.next() {
            Some(Ok((k, v))) => {
                self.cursor = Some((k.clone(), v));
                Ok(Some(Slice::Owned(k)))
            }
            Some(Err(err)) => Err(err).wrap_err("rocksdb iterator error during seek"),
            None => {
                self.cursor = None;
                Ok(None)
            }
        }
    }

    fn read(&self) -> eyre::Result<Slice<'static>> {
        let (_, value) = self
            .cursor
            .as_ref()
            .ok_or_else(|| eyre::eyre!("cursor is not positioned on an entry"))?;
        Ok(Slice::Owned(value.clone()))
    }

    fn keys(self: Box<Self>) -> Box<dyn Iterator<Item = eyre::Result<Slice<'static>>>> {
        let start = self.cursor.as_ref().map(|(k, _)| k.clone());
        Box::new(full_scan(self.db, start).map(|res| res.map(|(k, _)| Slice::Owned(k))))
    }

    fn entries(
        self: Box<Self>,
    ) -> Box<dyn Iterator<Item = (eyre::Result<Slice<'static>>, eyre::Result<Slice<'static>>)>>
    {
        let start = self.cursor.as_ref().map(|(k, _)| k.clone());
        Box::new(full_scan(self.db, start).map(|res| match res {
            Ok((k, v)) => (Ok(Slice::Owned(k)), Ok(Slice::Owned(v))),
            Err(err) => {
                let message = err.to_string();
                (Err(eyre::eyre!(message.clone())), Err(eyre::eyre!(message)))
            }
        }))
    }
}

fn full_scan(
    db: &DB,
    start: Option<Box<[u8]>>,
) -> impl Iterator<Item = eyre::Result<(Box<[u8]>, Box<[u8]>)>> + '_ {
    let mode = match &start {
        Some(key) => IteratorMode::From(key, RocksDirection::Forward),
        None => IteratorMode::Start,
    };

    db.iterator(mode)
        .map(|res| res.map_err(eyre::Error::from).map(|(k, v)| (k, v)))
}

impl perspectivedb_store::Database for RocksDB {
    fn get(&self, _column: Column, key: &[u8]) -> eyre::Result<Option<Slice<'static>>> {
        Ok(self
            .db
            .get(key)
            .wrap_err("rocksdb get failed")?
            .map(|value| Slice::Owned(value.into_boxed_slice())))
    }

    fn put(&self, _column: Column, key: &[u8], value: &[u8]) -> eyre::Result<()> {
        self.db.put(key, value).wrap_err("rocksdb put failed")
    }

    fn delete(&self, _column: Column, key: &[u8]) -> eyre::Result<()> {
        self.db.delete(key).wrap_err("rocksdb delete failed")
    }

    fn flush(&self) -> eyre::Result<()> {
        self.db.flush().wrap_err("rocksdb flush failed")
    }

    fn apply_batch(&self, batch: Batch) -> eyre::Result<()> {
        let mut write_batch = WriteBatch::default();

        for op in batch.operations() {
            match op {
                Operation::Put { key, value, .. } => write_batch.put(key.as_ref(), value.as_ref()),
                Operation::Delete { key, .. } => write_batch.delete(key.as_ref()),
            }
        }

        self.db
            .write(write_batch)
            .wrap_err("rocksdb batch write failed")
    }

    fn iter(&self, _column: Column) -> eyre::Result<Box<dyn DbIter + '_>> {
        Ok(Box::new(RocksIter {
            db: &self.db,
            cursor: None,
        }))
    }

    fn range<'a>(
        &'a self,
        _column: Column,
        start: &[u8],
        end: &[u8],
        direction: Direction,
    ) -> eyre::Result<Box<dyn Iterator<Item = RangeItem> + 'a>> {
        let end = end.to_vec();

        // Both directions scan forward from `start` and collect into the
        // range; reverse order is then produced by reversing the buffered
        // result. This trades a true reverse cursor for simplicity, since
        // ranges in the merge tree are always bounded (never whole-keyspace)
        // and therefore cheap to buffer.
        let mut items: Vec<RangeItem> = self
            .db
            .iterator(IteratorMode::From(start, RocksDirection::Forward))
            .take_while(|res| match res {
                Ok((k, _)) => end.is_empty() || k.as_ref() < end.as_slice(),
                Err(_) => true,
            })
            .map(|res| {
                res.map(|(k, v)| (k, v))
                    .map_err(|err| eyre::eyre!(err.to_string()))
            })
            .collect();

        if direction == Direction::Reverse {
            items.reverse();
        }

        Ok(Box::new(items.into_iter()))
    }
}
