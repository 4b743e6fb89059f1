//! # Record Manager
//!
//! Append-only allocator for fixed-size records:
//!
//! ```text
//! [ header      ]   caller-owned prefix (bucket array, or empty)
//! [ count : 4   ]   number of allocated records, little-endian
//! [ record[0]   ]
//! [ ...         ]
//! [ record[n-1] ]
//! ```
//!
//! Records are addressed by `u32` index; `u32::MAX` is reserved as the
//! `NOT_FOUND` sentinel and is never allocated. The in-memory count is
//! authoritative during operation and written back to the file by `sync()`.
//! The count is monotonically non-decreasing: records are never freed.

use eyre::{ensure, Result};
use parking_lot::Mutex;

use crate::memory::{MemoryMap, ReadGuard, WriteGuard};

use super::{Link, INDEX_SIZE};

const COUNT_SIZE: usize = INDEX_SIZE;

/// Allocator for fixed-size records in one file, starting after a
/// caller-owned header prefix.
pub struct RecordManager<'a> {
    file: &'a MemoryMap,
    header_size: usize,
    record_size: usize,
    count: Mutex<u32>,
}

impl<'a> RecordManager<'a> {
    /// `header_size` bytes at the front of the file belong to the caller;
    /// the count word and records follow.
    pub fn new(file: &'a MemoryMap, header_size: usize, record_size: usize) -> Self {
        assert!(record_size > 0, "record size cannot be zero");
        Self {
            file,
            header_size,
            record_size,
            count: Mutex::new(0),
        }
    }

    /// Initializes the counter of a new file to zero. Refuses to run over a
    /// manager that has already allocated records.
    pub fn create(&self) -> Result<()> {
        let count = self.count.lock();

        ensure!(
            *count == 0,
            "'{}' already has {} records allocated",
            self.file.path().display(),
            *count
        );

        self.file.resize(self.header_size + COUNT_SIZE)?;
        self.write_count(*count);
        Ok(())
    }

    /// Loads the counter of an existing file and checks the file is large
    /// enough to hold the records it implies.
    pub fn start(&self) -> Result<()> {
        let mut count = self.count.lock();
        *count = self.read_count();

        let minimum = self.header_size + COUNT_SIZE + *count as usize * self.record_size;
        ensure!(
            minimum <= self.file.size(),
            "'{}' is corrupt: {} records imply {} bytes but the file has {}",
            self.file.path().display(),
            *count,
            minimum,
            self.file.size()
        );
        Ok(())
    }

    /// Writes the record count back to the file.
    pub fn sync(&self) {
        let count = self.count.lock();
        self.write_count(*count);
    }

    /// Number of allocated records.
    pub fn count(&self) -> u32 {
        *self.count.lock()
    }

    /// Fixed byte size of one record.
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Reserves `count` consecutive records, growing the file as needed, and
    /// returns the index of the first.
    pub fn new_records(&self, count: u32) -> Result<u32> {
        let mut allocated = self.count.lock();

        let first = *allocated;
        let new_count = first as u64 + count as u64;
        assert!(
            new_count < <u32 as Link>::NOT_FOUND as u64,
            "record count overflow in '{}'",
            self.file.path().display()
        );

        let required = self.header_size + COUNT_SIZE + new_count as usize * self.record_size;
        self.file.resize(required)?;

        *allocated = new_count as u32;
        Ok(first)
    }

    /// A read accessor positioned at record `index`.
    pub fn get(&self, index: u32) -> ReadGuard<'a> {
        assert!(index < self.count(), "record {} past end of store", index);

        let mut reader = self.file.access();
        reader.increment(self.record_offset(index));
        reader
    }

    /// A write accessor positioned at record `index`.
    pub fn get_mut(&self, index: u32) -> WriteGuard<'a> {
        assert!(index < self.count(), "record {} past end of store", index);

        let mut writer = self.file.write_access();
        writer.increment(self.record_offset(index));
        writer
    }

    fn record_offset(&self, index: u32) -> usize {
        self.header_size + COUNT_SIZE + index as usize * self.record_size
    }

    fn read_count(&self) -> u32 {
        let mut reader = self.file.access();
        reader.increment(self.header_size);
        u32::read_le(reader.buffer())
    }

    fn write_count(&self, count: u32) {
        let mut writer = self.file.write_access();
        writer.increment(self.header_size);
        count.write_le(writer.buffer_mut());
    }
}
