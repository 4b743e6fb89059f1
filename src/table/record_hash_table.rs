//! # Record Hash Table
//!
//! A chained hash table mapping keys to fixed-size values, composed from a
//! [`BucketHeader`] and a [`RecordManager`] of [`RecordRow`]s:
//!
//! ```text
//! [ bucket_count : 4 ]
//! [ bucket[0..n] : 4 each ]      head record index per bucket
//! [ count : 4 ]
//! [ row ... row ]                [ key : K ][ next : 4 ][ value : V ]
//! ```
//!
//! Insertion is push-front: a new row's `next` is set to the current bucket
//! head and the row is then published by overwriting the head with its
//! index, a single aligned word write. Duplicate keys are permitted; every
//! lookup operation acts on the most recently inserted match, the first one
//! encountered walking from the bucket head.
//!
//! ## Locking
//!
//! Two locks per table:
//!
//! - the **create lock** serializes `store` (and `unlink`), keeping
//!   allocation order and head publication coherent between writers;
//! - the **update lock** serializes every in-place head/next word rewrite
//!   against reads of the same word, so a concurrent reader never observes
//!   a torn link.
//!
//! Lookups are otherwise lock-free with respect to each other. Unlink is
//! not safe under concurrent writers.

use eyre::Result;
use parking_lot::{Mutex, RwLock};

use crate::memory::{MemoryMap, ReadGuard};

use super::{bucket_index, BucketHeader, Link, RecordManager, RecordRow, INDEX_SIZE};

/// A chained hash table of fixed-size entries, keyed by `K`-byte keys.
pub struct RecordHashTable<'a, const K: usize> {
    header: BucketHeader<'a, u32>,
    manager: RecordManager<'a>,
    create_mutex: Mutex<()>,
    update_mutex: RwLock<()>,
}

impl<'a, const K: usize> RecordHashTable<'a, K> {
    /// Byte size of one table row carrying a `value_size`-byte value.
    pub const fn record_size(value_size: usize) -> usize {
        K + INDEX_SIZE + value_size
    }

    /// A table over `file` with `buckets` cells and `value_size`-byte
    /// values. The parameters must match those the file was created with.
    pub fn new(file: &'a MemoryMap, buckets: u32, value_size: usize) -> Self {
        let header_size = BucketHeader::<u32>::size(buckets);
        let record_size = Self::record_size(value_size);

        Self {
            header: BucketHeader::new(file, buckets),
            manager: RecordManager::new(file, header_size, record_size),
            create_mutex: Mutex::new(()),
            update_mutex: RwLock::new(()),
        }
    }

    /// Initializes the bucket array and record counter of a new file.
    pub fn create(&self) -> Result<()> {
        self.header.create()?;
        self.manager.create()
    }

    /// Validates the bucket array and loads the counter of an existing
    /// file.
    pub fn start(&self) -> Result<()> {
        self.header.start()?;
        self.manager.start()
    }

    /// Writes the record counter back to the file.
    pub fn sync(&self) {
        self.manager.sync();
    }

    /// Byte size of a value in this table.
    pub fn value_size(&self) -> usize {
        self.manager.record_size() - K - INDEX_SIZE
    }

    /// Stores a new entry and returns its record index. The value buffer
    /// handed to `write` has exactly `value_size` bytes.
    ///
    /// Duplicate keys are not detected; a duplicate shadows older entries
    /// until it is unlinked.
    pub fn store(&self, key: &[u8; K], write: impl FnOnce(&mut [u8])) -> Result<u32> {
        let _create = self.create_mutex.lock();

        let row = RecordRow::create(&self.manager, key, write)?;
        let bucket = bucket_index(key, self.header.buckets());

        // Chain the new row in front of the current head.
        row.link(self.read_head(bucket));

        // Publish with a single word write.
        let _update = self.update_mutex.write();
        self.header.write(bucket, row.index());
        Ok(row.index())
    }

    /// Runs `write` over the value of the most recently stored entry with
    /// `key`. Returns the entry's index, or `NOT_FOUND` on a miss.
    pub fn update(&self, key: &[u8; K], write: impl FnOnce(&mut [u8])) -> u32 {
        let value_size = self.value_size();
        let mut current = self.read_head(bucket_index(key, self.header.buckets()));

        while current != u32::NOT_FOUND {
            let row = RecordRow::new(&self.manager, current);
            if row.compare(key) {
                let _update = self.update_mutex.write();
                let mut writer = self.manager.get_mut(current);
                writer.increment(K + INDEX_SIZE);
                write(&mut writer.buffer_mut()[..value_size]);
                return current;
            }
            current = self.read_next(&row);
        }

        u32::NOT_FOUND
    }

    /// A read accessor at the value of the most recently stored entry with
    /// `key`, or `None` on a miss.
    pub fn find(&self, key: &[u8; K]) -> Option<ReadGuard<'a>> {
        let mut current = self.read_head(bucket_index(key, self.header.buckets()));

        while current != u32::NOT_FOUND {
            let row = RecordRow::new(&self.manager, current);
            if row.compare(key) {
                return Some(row.data());
            }
            current = self.read_next(&row);
        }

        None
    }

    /// The record index of the most recently stored entry with `key`, or
    /// `NOT_FOUND` on a miss.
    pub fn offset(&self, key: &[u8; K]) -> u32 {
        let mut current = self.read_head(bucket_index(key, self.header.buckets()));

        while current != u32::NOT_FOUND {
            let row = RecordRow::new(&self.manager, current);
            if row.compare(key) {
                return current;
            }
            current = self.read_next(&row);
        }

        u32::NOT_FOUND
    }

    /// Unlinks the most recently stored entry with `key` by stitching its
    /// predecessor (bucket head or previous row) to its successor. Returns
    /// false on a miss.
    ///
    /// The unlinked record stays allocated; its space is not reclaimed. Not
    /// safe under concurrent writers.
    pub fn unlink(&self, key: &[u8; K]) -> bool {
        let _create = self.create_mutex.lock();

        let bucket = bucket_index(key, self.header.buckets());
        let head = self.read_head(bucket);
        if head == u32::NOT_FOUND {
            return false;
        }

        // Head match: the bucket itself is the predecessor.
        let row = RecordRow::new(&self.manager, head);
        if row.compare(key) {
            let next = self.read_next(&row);
            let _update = self.update_mutex.write();
            self.header.write(bucket, next);
            return true;
        }

        // Walk with a trailing cursor and stitch around the first match.
        let mut previous = row;
        loop {
            let current = self.read_next(&previous);
            if current == u32::NOT_FOUND {
                return false;
            }

            let row = RecordRow::new(&self.manager, current);
            if row.compare(key) {
                let next = self.read_next(&row);
                let _update = self.update_mutex.write();
                previous.write_next(next);
                return true;
            }
            previous = row;
        }
    }

    fn read_head(&self, bucket: u32) -> u32 {
        let _update = self.update_mutex.read();
        self.header.read(bucket)
    }

    fn read_next(&self, row: &RecordRow<'a, '_, K>) -> u32 {
        let _update = self.update_mutex.read();
        row.next()
    }
}
