//! # Slab Hash Table
//!
//! The variable-size sibling of [`RecordHashTable`]: a chained hash table
//! whose rows are slabs sized per insert.
//!
//! ```text
//! [ bucket_count : 4 ]
//! [ bucket[0..n] : 8 each ]      head slab offset per bucket
//! [ payload_size : 8 ]
//! [ slab ... slab ]              [ key : K ][ next : 8 ][ value : ... ]
//! ```
//!
//! Rows do not record their own length; the caller supplies `value_size` on
//! store and is expected to know how many bytes a found value spans. Push
//! front, duplicate and locking semantics match the record variant.
//!
//! [`RecordHashTable`]: super::RecordHashTable

use eyre::Result;
use parking_lot::{Mutex, RwLock};

use crate::memory::{MemoryMap, ReadGuard};

use super::{bucket_index, BucketHeader, Link, SlabManager, SlabRow, OFFSET_SIZE};

/// A chained hash table of variable-size entries, keyed by `K`-byte keys.
pub struct SlabHashTable<'a, const K: usize> {
    header: BucketHeader<'a, u64>,
    manager: SlabManager<'a>,
    create_mutex: Mutex<()>,
    update_mutex: RwLock<()>,
}

impl<'a, const K: usize> SlabHashTable<'a, K> {
    /// A table over `file` with `buckets` cells. The bucket count must match
    /// the one the file was created with.
    pub fn new(file: &'a MemoryMap, buckets: u32) -> Self {
        let header_size = BucketHeader::<u64>::size(buckets);

        Self {
            header: BucketHeader::new(file, buckets),
            manager: SlabManager::new(file, header_size),
            create_mutex: Mutex::new(()),
            update_mutex: RwLock::new(()),
        }
    }

    /// Initializes the bucket array and payload size of a new file.
    pub fn create(&self) -> Result<()> {
        self.header.create()?;
        self.manager.create()
    }

    /// Validates the bucket array and loads the payload size of an existing
    /// file.
    pub fn start(&self) -> Result<()> {
        self.header.start()?;
        self.manager.start()
    }

    /// Writes the payload size back to the file.
    pub fn sync(&self) {
        self.manager.sync();
    }

    /// Stores a new entry with a `value_size`-byte value and returns its
    /// slab offset.
    pub fn store(
        &self,
        key: &[u8; K],
        value_size: usize,
        write: impl FnOnce(&mut [u8]),
    ) -> Result<u64> {
        let _create = self.create_mutex.lock();

        let row = SlabRow::create(&self.manager, key, value_size, write)?;
        let bucket = bucket_index(key, self.header.buckets());

        row.link(self.read_head(bucket));

        let _update = self.update_mutex.write();
        self.header.write(bucket, row.position());
        Ok(row.position())
    }

    /// Runs `write` over the value of the most recently stored entry with
    /// `key`. The buffer extends to the end of the payload; the caller must
    /// confine itself to the entry's own value bytes. Returns the entry's
    /// slab offset, or `NOT_FOUND` on a miss.
    pub fn update(&self, key: &[u8; K], write: impl FnOnce(&mut [u8])) -> u64 {
        let mut current = self.read_head(bucket_index(key, self.header.buckets()));

        while current != u64::NOT_FOUND {
            let row = SlabRow::<K>::new(&self.manager, current);
            if row.compare(key) {
                let _update = self.update_mutex.write();
                let mut writer = self.manager.get_mut(current);
                writer.increment(K + OFFSET_SIZE);
                write(writer.buffer_mut());
                return current;
            }
            current = self.read_next(&row);
        }

        u64::NOT_FOUND
    }

    /// A read accessor at the value of the most recently stored entry with
    /// `key`, or `None` on a miss.
    pub fn find(&self, key: &[u8; K]) -> Option<ReadGuard<'a>> {
        let mut current = self.read_head(bucket_index(key, self.header.buckets()));

        while current != u64::NOT_FOUND {
            let row = SlabRow::<K>::new(&self.manager, current);
            if row.compare(key) {
                return Some(row.data());
            }
            current = self.read_next(&row);
        }

        None
    }

    /// The slab offset of the most recently stored entry with `key`, or
    /// `NOT_FOUND` on a miss.
    pub fn offset(&self, key: &[u8; K]) -> u64 {
        let mut current = self.read_head(bucket_index(key, self.header.buckets()));

        while current != u64::NOT_FOUND {
            let row = SlabRow::<K>::new(&self.manager, current);
            if row.compare(key) {
                return current;
            }
            current = self.read_next(&row);
        }

        u64::NOT_FOUND
    }

    /// Unlinks the most recently stored entry with `key`. Returns false on a
    /// miss. The slab stays allocated. Not safe under concurrent writers.
    pub fn unlink(&self, key: &[u8; K]) -> bool {
        let _create = self.create_mutex.lock();

        let bucket = bucket_index(key, self.header.buckets());
        let head = self.read_head(bucket);
        if head == u64::NOT_FOUND {
            return false;
        }

        let row = SlabRow::<K>::new(&self.manager, head);
        if row.compare(key) {
            let next = self.read_next(&row);
            let _update = self.update_mutex.write();
            self.header.write(bucket, next);
            return true;
        }

        let mut previous = row;
        loop {
            let current = self.read_next(&previous);
            if current == u64::NOT_FOUND {
                return false;
            }

            let row = SlabRow::<K>::new(&self.manager, current);
            if row.compare(key) {
                let next = self.read_next(&row);
                let _update = self.update_mutex.write();
                previous.write_next(next);
                return true;
            }
            previous = row;
        }
    }

    fn read_head(&self, bucket: u32) -> u64 {
        let _update = self.update_mutex.read();
        self.header.read(bucket)
    }

    fn read_next(&self, row: &SlabRow<'a, '_, K>) -> u64 {
        let _update = self.update_mutex.read();
        row.next()
    }
}
