//! # Record Multimap
//!
//! A key -> list index layered on two files:
//!
//! - an **outer** [`RecordHashTable`] whose 4-byte value is the head link of
//!   the key's chain;
//! - a **row** [`RecordManager`] owning the chained value rows, each
//!   `[ next : 4 ][ value : V ]` with no key.
//!
//! Storing only the head link in the outer table keeps its rows fixed-size
//! while supporting unbounded per-key fan-out, and push-front insertion
//! makes publication a single word write with no rebalancing: a new row's
//! `next` is pointed at the current head, then the outer value is swapped to
//! the new row.
//!
//! Iteration therefore yields rows in reverse insertion order, and unlink
//! removes the most recent row; unlinking the last row removes the outer
//! key entirely. Unlink is not safe under concurrent writers. Unlinked rows
//! become unreachable but keep their space.

use eyre::Result;
use parking_lot::Mutex;

use crate::memory::{MemoryMap, ReadGuard};

use super::{Link, RecordHashTable, RecordManager, INDEX_SIZE};

/// A key -> chain-of-rows index over an outer hash-table file and a value
/// row file.
pub struct RecordMultimap<'a, const K: usize> {
    map: RecordHashTable<'a, K>,
    rows: RecordManager<'a>,
    create_mutex: Mutex<()>,
}

impl<'a, const K: usize> RecordMultimap<'a, K> {
    /// A multimap with `buckets` outer cells and `value_size`-byte row
    /// values, over the outer `table_file` and the `rows_file` owning the
    /// chains.
    pub fn new(
        table_file: &'a MemoryMap,
        rows_file: &'a MemoryMap,
        buckets: u32,
        value_size: usize,
    ) -> Self {
        Self {
            map: RecordHashTable::new(table_file, buckets, INDEX_SIZE),
            rows: RecordManager::new(rows_file, 0, INDEX_SIZE + value_size),
            create_mutex: Mutex::new(()),
        }
    }

    /// Initializes both files.
    pub fn create(&self) -> Result<()> {
        self.map.create()?;
        self.rows.create()
    }

    /// Validates and loads both files.
    pub fn start(&self) -> Result<()> {
        self.map.start()?;
        self.rows.start()
    }

    /// Writes both allocator counters back to their files.
    pub fn sync(&self) {
        self.map.sync();
        self.rows.sync();
    }

    /// Byte size of a row value.
    pub fn value_size(&self) -> usize {
        self.rows.record_size() - INDEX_SIZE
    }

    /// Appends a value row to `key`'s chain (push front) and returns its
    /// link. The buffer handed to `write` has exactly `value_size` bytes.
    pub fn store(&self, key: &[u8; K], write: impl FnOnce(&mut [u8])) -> Result<u32> {
        let value_size = self.value_size();

        // Allocate and fill the value first; the row stays unreachable
        // until the head swap below.
        let index = self.rows.new_records(1)?;
        {
            let mut writer = self.rows.get_mut(index);
            write(&mut writer.buffer_mut()[INDEX_SIZE..INDEX_SIZE + value_size]);
        }

        let _create = self.create_mutex.lock();

        let head = self.find_head(key);
        {
            let mut writer = self.rows.get_mut(index);
            head.write_le(writer.buffer_mut());
        }

        if head == u32::NOT_FOUND {
            self.map
                .store(key, |value| index.write_le(value))?;
        } else {
            self.map.update(key, |value| index.write_le(value));
        }
        Ok(index)
    }

    /// The chain of `key`, most recent row first. Lazy, forward-only and
    /// single-pass; it walks from the head captured here, so rows prepended
    /// after this call are not observed. Empty if the key is absent.
    pub fn find(&self, key: &[u8; K]) -> RecordMultimapIterator<'a, '_> {
        RecordMultimapIterator {
            rows: &self.rows,
            current: self.find_head(key),
        }
    }

    /// A read accessor at the value of the row at `link`.
    pub fn get(&self, link: u32) -> ReadGuard<'a> {
        let mut reader = self.rows.get(link);
        reader.increment(INDEX_SIZE);
        reader
    }

    /// Removes the most recent row of `key`'s chain. If that row was the
    /// only one, the outer entry is unlinked with it. Returns false if the
    /// key is absent. Not safe under concurrent writers.
    pub fn unlink(&self, key: &[u8; K]) -> bool {
        let _create = self.create_mutex.lock();

        let head = self.find_head(key);
        if head == u32::NOT_FOUND {
            return false;
        }

        let next = {
            let reader = self.rows.get(head);
            u32::read_le(reader.buffer())
        };

        if next == u32::NOT_FOUND {
            self.map.unlink(key)
        } else {
            self.map.update(key, |value| next.write_le(value)) != u32::NOT_FOUND
        }
    }

    fn find_head(&self, key: &[u8; K]) -> u32 {
        self.map
            .find(key)
            .map(|guard| u32::read_le(guard.buffer()))
            .unwrap_or(u32::NOT_FOUND)
    }
}

/// Lazy walk over one key's chain of row links, most recent first.
///
/// Holds no accessor between steps; each `next()` pins the mapping just
/// long enough to read one link.
pub struct RecordMultimapIterator<'a, 'm> {
    rows: &'m RecordManager<'a>,
    current: u32,
}

impl RecordMultimapIterator<'_, '_> {
    /// The link the next call to `next()` will yield, or `NOT_FOUND` when
    /// the walk is done.
    pub fn head(&self) -> u32 {
        self.current
    }
}

impl Iterator for RecordMultimapIterator<'_, '_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.current == u32::NOT_FOUND {
            return None;
        }

        let link = self.current;
        let reader = self.rows.get(link);
        self.current = u32::read_le(reader.buffer());
        Some(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const KEY_SIZE: usize = 20;
    const VALUE_SIZE: usize = 8;

    struct Files {
        table: MemoryMap,
        rows: MemoryMap,
    }

    fn test_files(dir: &tempfile::TempDir) -> Files {
        Files {
            table: MemoryMap::create(dir.path().join("mm_table.db"), 1).unwrap(),
            rows: MemoryMap::create(dir.path().join("mm_rows.db"), 1).unwrap(),
        }
    }

    fn store_value(multimap: &RecordMultimap<'_, KEY_SIZE>, key: &[u8; KEY_SIZE], value: u64) {
        multimap
            .store(key, |buffer| buffer.copy_from_slice(&value.to_le_bytes()))
            .unwrap();
    }

    fn collect_values(multimap: &RecordMultimap<'_, KEY_SIZE>, key: &[u8; KEY_SIZE]) -> Vec<u64> {
        multimap
            .find(key)
            .map(|link| {
                let guard = multimap.get(link);
                u64::from_le_bytes(guard.buffer()[..8].try_into().unwrap())
            })
            .collect()
    }

    #[test]
    fn absent_key_yields_empty_chain() {
        let dir = tempdir().unwrap();
        let files = test_files(&dir);
        let multimap = RecordMultimap::<KEY_SIZE>::new(&files.table, &files.rows, 100, VALUE_SIZE);
        multimap.create().unwrap();

        assert_eq!(multimap.find(&[1u8; KEY_SIZE]).head(), u32::NOT_FOUND);
        assert_eq!(collect_values(&multimap, &[1u8; KEY_SIZE]), Vec::<u64>::new());
        assert!(!multimap.unlink(&[1u8; KEY_SIZE]));
    }

    #[test]
    fn chain_yields_reverse_insertion_order() {
        let dir = tempdir().unwrap();
        let files = test_files(&dir);
        let multimap = RecordMultimap::<KEY_SIZE>::new(&files.table, &files.rows, 100, VALUE_SIZE);
        multimap.create().unwrap();

        let key = [9u8; KEY_SIZE];
        for value in 1u64..=4 {
            store_value(&multimap, &key, value);
        }

        assert_eq!(collect_values(&multimap, &key), vec![4, 3, 2, 1]);
    }

    #[test]
    fn keys_have_independent_chains() {
        let dir = tempdir().unwrap();
        let files = test_files(&dir);
        let multimap = RecordMultimap::<KEY_SIZE>::new(&files.table, &files.rows, 100, VALUE_SIZE);
        multimap.create().unwrap();

        store_value(&multimap, &[1u8; KEY_SIZE], 10);
        store_value(&multimap, &[2u8; KEY_SIZE], 20);
        store_value(&multimap, &[1u8; KEY_SIZE], 11);

        assert_eq!(collect_values(&multimap, &[1u8; KEY_SIZE]), vec![11, 10]);
        assert_eq!(collect_values(&multimap, &[2u8; KEY_SIZE]), vec![20]);
    }

    #[test]
    fn unlink_removes_most_recent_then_outer_key() {
        let dir = tempdir().unwrap();
        let files = test_files(&dir);
        let multimap = RecordMultimap::<KEY_SIZE>::new(&files.table, &files.rows, 100, VALUE_SIZE);
        multimap.create().unwrap();

        let key = [3u8; KEY_SIZE];
        store_value(&multimap, &key, 1);
        store_value(&multimap, &key, 2);

        assert!(multimap.unlink(&key));
        assert_eq!(collect_values(&multimap, &key), vec![1]);

        assert!(multimap.unlink(&key));
        assert_eq!(collect_values(&multimap, &key), Vec::<u64>::new());
        assert!(!multimap.unlink(&key));
    }

    #[test]
    fn iterator_observes_head_captured_at_construction() {
        let dir = tempdir().unwrap();
        let files = test_files(&dir);
        let multimap = RecordMultimap::<KEY_SIZE>::new(&files.table, &files.rows, 100, VALUE_SIZE);
        multimap.create().unwrap();

        let key = [5u8; KEY_SIZE];
        store_value(&multimap, &key, 1);
        store_value(&multimap, &key, 2);

        let stale = multimap.find(&key);
        store_value(&multimap, &key, 3);

        let values: Vec<u64> = stale
            .map(|link| {
                let guard = multimap.get(link);
                u64::from_le_bytes(guard.buffer()[..8].try_into().unwrap())
            })
            .collect();
        assert_eq!(values, vec![2, 1]);

        assert_eq!(collect_values(&multimap, &key), vec![3, 2, 1]);
    }

    #[test]
    fn survives_restart() {
        let dir = tempdir().unwrap();
        let table_path = dir.path().join("mm_table.db");
        let rows_path = dir.path().join("mm_rows.db");
        let key = [7u8; KEY_SIZE];

        {
            let table = MemoryMap::create(&table_path, 1).unwrap();
            let rows = MemoryMap::create(&rows_path, 1).unwrap();
            let multimap = RecordMultimap::<KEY_SIZE>::new(&table, &rows, 100, VALUE_SIZE);
            multimap.create().unwrap();
            store_value(&multimap, &key, 40);
            store_value(&multimap, &key, 41);
            multimap.sync();
            table.stop().unwrap();
            rows.stop().unwrap();
        }

        let table = MemoryMap::open(&table_path).unwrap();
        let rows = MemoryMap::open(&rows_path).unwrap();
        let multimap = RecordMultimap::<KEY_SIZE>::new(&table, &rows, 100, VALUE_SIZE);
        multimap.start().unwrap();

        assert_eq!(collect_values(&multimap, &key), vec![41, 40]);
    }
}
