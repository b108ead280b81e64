use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::db::{Batch, Column, DbIter, Direction, Operation, RangeItem};
use crate::slice::Slice;
use crate::Database;

/// An in-memory `Database`, ordered by key within each column. Used by the
/// merge tree's test suite and by `perspectivedb-test-utils`; the RocksDB
/// backend in `perspectivedb-store-rocksdb` is a drop-in replacement.
#[derive(Debug, Default)]
pub struct MemoryDB {
    columns: RwLock<BTreeMap<Column, BTreeMap<Box<[u8]>, Box<[u8]>>>>,
}

impl MemoryDB {
    #[must_use]
    pub fn new() -> Self {
        let mut columns = BTreeMap::new();
        for column in Column::iter_all() {
            let _ = columns.insert(column, BTreeMap::new());
        }
        Self {
            columns: RwLock::new(columns),
        }
    }
}

struct MemoryIter {
    entries: Vec<(Box<[u8]>, Box<[u8]>)>,
    position: Option<usize>,
}

impl DbIter for MemoryIter {
    fn seek(&mut self, key: Slice<'_>) -> eyre::Result<Option<Slice<'static>>> {
        let target = key.as_ref();
        match self.entries.iter().position(|(k, _)| k.as_ref() >= target) {
            Some(index) => {
                self.position = Some(index);
                Ok(Some(Slice::Owned(self.entries[index].0.clone())))
            }
            None => {
                self.position = None;
                Ok(None)
            }
        }
    }

    fn read(&self) -> eyre::Result<Slice<'static>> {
        let index = self
            .position
            .ok_or_else(|| eyre::eyre!("cursor is not positioned on an entry"))?;
        Ok(Slice::Owned(self.entries[index].1.clone()))
    }

    fn keys(self: Box<Self>) -> Box<dyn Iterator<Item = eyre::Result<Slice<'static>>>> {
        let start = self.position.unwrap_or(0);
        Box::new(
            self.entries
                .into_iter()
                .skip(start)
                .map(|(k, _)| Ok(Slice::Owned(k))),
        )
    }

    fn entries(
        self: Box<Self>,
    ) -> Box<dyn Iterator<Item = (eyre::Result<Slice<'static>>, eyre::Result<Slice<'static>>)>>
    {
        let start = self.position.unwrap_or(0);
        Box::new(
            self.entries
                .into_iter()
                .skip(start)
                .map(|(k, v)| (Ok(Slice::Owned(k)), Ok(Slice::Owned(v)))),
        )
    }
}

impl Database for MemoryDB {
    fn get(&self, column: Column, key: &[u8]) -> eyre::Result<Option<Slice<'static>>> {
        let columns = self
            .columns
            .read()
            .map_err(|_| eyre::eyre!("lock poisoned"))?;
        Ok(columns
            .get(&column)
            .and_then(|table| table.get(key))
            .map(|value| Slice::Owned(value.clone())))
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> eyre::Result<()> {
        let mut columns = self
            .columns
            .write()
            .map_err(|_| eyre::eyre!("lock poisoned"))?;
        let _ = columns
            .entry(column)
            .or_default()
            .insert(key.into(), value.into());
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> eyre::Result<()> {
        let mut columns = self
            .columns
            .write()
            .map_err(|_| eyre::eyre!("lock poisoned"))?;
        if let Some(table) = columns.get_mut(&column) {
            let _ = table.remove(key);
        }
        Ok(())
    }

    fn apply_batch(&self, batch: Batch) -> eyre::Result<()> {
        let mut columns = self
            .columns
            .write()
            .map_err(|_| eyre::eyre!("lock poisoned"))?;
        for op in batch.operations() {
            match op {
                Operation::Put { column, key, value } => {
                    let _ = columns
                        .entry(*column)
                        .or_default()
                        .insert(key.clone(), value.clone());
                }
                Operation::Delete { column, key } => {
                    if let Some(table) = columns.get_mut(column) {
                        let _ = table.remove(key.as_ref());
                    }
                }
            }
        }
        Ok(())
    }

    fn iter(&self, column: Column) -> eyre::Result<Box<dyn DbIter + '_>> {
        let columns = self
            .columns
            .read()
            .map_err(|_| eyre::eyre!("lock poisoned"))?;
        let entries = columns
            .get(&column)
            .map(|table| {
                table
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(Box::new(MemoryIter {
            entries,
            position: None,
        }))
    }

    fn range<'a>(
        &'a self,
        column: Column,
        start: &[u8],
        end: &[u8],
        direction: Direction,
    ) -> eyre::Result<Box<dyn Iterator<Item = RangeItem> + 'a>> {
        let columns = self
            .columns
            .read()
            .map_err(|_| eyre::eyre!("lock poisoned"))?;
        let mut entries: Vec<(Box<[u8]>, Box<[u8]>)> = columns
            .get(&column)
            .map(|table| {
                table
                    .range::<[u8], _>((std::ops::Bound::Included(start), std::ops::Bound::Unbounded))
                    .take_while(|(k, _)| end.is_empty() || k.as_ref() < end)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();

        if direction == Direction::Reverse {
            entries.reverse();
        }

        Ok(Box::new(entries.into_iter().map(Ok)))
    }
}

#[cfg(test)]
mod tests {
    use core::mem;

    use super::*;

    #[test]
    fn put_get_and_iterate_round_trip() {
        let db = MemoryDB::new();

        for b1 in 0_u8..10 {
            for b2 in 0_u8..10 {
                let bytes = [b1, b2];
                db.put(Column::Default, &bytes, &bytes).unwrap();
                assert!(db.has(Column::Default, &bytes).unwrap());
                assert_eq!(
                    db.get(Column::Default, &bytes).unwrap().unwrap().as_ref(),
                    bytes
                );
            }
        }

        assert_eq!(None, db.get(Column::Default, &[]).unwrap());

        let mut iter = db.iter(Column::Default).unwrap();
        let mut key = Some(iter.seek(Slice::from(&[][..])).unwrap().unwrap().into_boxed());
        let mut value = Some(iter.read().unwrap().into_boxed());

        let mut entries = iter.entries();

        for b1 in 0_u8..10 {
            for b2 in 0_u8..10 {
                let (k, v) = entries
                    .next()
                    .map(|(k, v)| eyre::Ok((k?.into_boxed(), v?.into_boxed())))
                    .transpose()
                    .unwrap()
                    .map_or((None, None), |(k, v)| (Some(k), Some(v)));

                let last_key = mem::replace(&mut key, k).unwrap();
                let last_value = mem::replace(&mut value, v).unwrap();

                let bytes = [b1, b2];
                assert_eq!(&*last_key, bytes);
                assert_eq!(&*last_value, bytes);
            }
        }
    }

    #[test]
    fn range_respects_bounds_and_direction() {
        let db = MemoryDB::new();
        for i in 0_u8..5 {
            db.put(Column::Default, &[i], &[i]).unwrap();
        }

        let forward: Vec<u8> = db
            .range(Column::Default, &[1], &[4], Direction::Forward)
            .unwrap()
            .map(|r| r.unwrap().0[0])
            .collect();
        assert_eq!(forward, vec![1, 2, 3]);

        let reverse: Vec<u8> = db
            .range(Column::Default, &[1], &[4], Direction::Reverse)
            .unwrap()
            .map(|r| r.unwrap().0[0])
            .collect();
        assert_eq!(reverse, vec![3, 2, 1]);
    }

    #[test]
    fn batch_applies_atomically() {
        let db = MemoryDB::new();
        let mut batch = Batch::new();
        batch.put(Column::Default, b"a".to_vec(), b"1".to_vec());
        batch.put(Column::Default, b"b".to_vec(), b"2".to_vec());
        db.apply_batch(batch).unwrap();

        assert!(db.has(Column::Default, b"a").unwrap());
        assert!(db.has(Column::Default, b"b").unwrap());
    }
}
