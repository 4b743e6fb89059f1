//! # Bucket Header
//!
//! The fixed array of chain heads at the front of a hash-table file:
//!
//! ```text
//! offset 0:  bucket_count (4 bytes)
//! offset 4:  bucket[0] .. bucket[bucket_count - 1]  (one Link each)
//! ```
//!
//! A bucket holds the head link of the chain of rows hashing to that cell,
//! or `NOT_FOUND` when the chain is empty. Writing a bucket is a single
//! aligned little-endian word write and is the atomic publication point for
//! insertion and unlink; the owning table wraps every read and write of a
//! bucket in its update lock.

use std::marker::PhantomData;

use eyre::{ensure, Result};

use crate::memory::MemoryMap;

use super::Link;

const COUNT_SIZE: usize = 4;

/// The bucket array of one hash-table file, generic over the link width of
/// the table's chains.
pub struct BucketHeader<'a, L: Link> {
    file: &'a MemoryMap,
    buckets: u32,
    _link: PhantomData<L>,
}

impl<'a, L: Link> BucketHeader<'a, L> {
    pub fn new(file: &'a MemoryMap, buckets: u32) -> Self {
        Self {
            file,
            buckets,
            _link: PhantomData,
        }
    }

    /// Byte size of a header with `buckets` cells.
    pub fn size(buckets: u32) -> usize {
        COUNT_SIZE + buckets as usize * L::SIZE
    }

    /// Number of buckets.
    pub fn buckets(&self) -> u32 {
        self.buckets
    }

    /// Initializes the header for a new file: writes the bucket count and
    /// fills every bucket with `NOT_FOUND`.
    pub fn create(&self) -> Result<()> {
        ensure!(
            self.buckets > 0,
            "cannot create '{}' with zero buckets",
            self.file.path().display()
        );

        let size = Self::size(self.buckets);
        let mut writer = self.file.writer(size)?;
        let buffer = writer.buffer_mut();

        buffer[..COUNT_SIZE].copy_from_slice(&self.buckets.to_le_bytes());

        // All-ones fill leaves every bucket at the NOT_FOUND sentinel.
        buffer[COUNT_SIZE..size].fill(0xff);
        Ok(())
    }

    /// Validates the header of an existing file against the configured
    /// bucket count.
    pub fn start(&self) -> Result<()> {
        let size = Self::size(self.buckets);
        ensure!(
            size <= self.file.size(),
            "bucket array of '{}' extends past end of file",
            self.file.path().display()
        );

        let stored = {
            let reader = self.file.access();
            u32::from_le_bytes(reader.buffer()[..COUNT_SIZE].try_into().unwrap())
        };
        ensure!(
            stored == self.buckets,
            "bucket count mismatch in '{}': stored {}, configured {}",
            self.file.path().display(),
            stored,
            self.buckets
        );

        self.file.prefetch(0, size);
        Ok(())
    }

    /// The head link of `bucket`'s chain.
    pub fn read(&self, bucket: u32) -> L {
        assert!(bucket < self.buckets, "bucket {} out of range", bucket);

        let mut reader = self.file.access();
        reader.increment(Self::cell_offset(bucket));
        L::read_le(reader.buffer())
    }

    /// Overwrites the head link of `bucket`'s chain. Single word write; this
    /// is the publication point for insertion and unlink.
    pub fn write(&self, bucket: u32, link: L) {
        assert!(bucket < self.buckets, "bucket {} out of range", bucket);

        let mut writer = self.file.write_access();
        writer.increment(Self::cell_offset(bucket));
        link.write_le(writer.buffer_mut());
    }

    fn cell_offset(bucket: u32) -> usize {
        COUNT_SIZE + bucket as usize * L::SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_file(dir: &tempfile::TempDir) -> MemoryMap {
        MemoryMap::create(dir.path().join("header.db"), 1).unwrap()
    }

    #[test]
    fn create_fills_buckets_with_not_found() {
        let dir = tempdir().unwrap();
        let file = test_file(&dir);
        let header = BucketHeader::<u32>::new(&file, 10);

        header.create().unwrap();

        for bucket in 0..10 {
            assert_eq!(header.read(bucket), u32::NOT_FOUND);
        }
    }

    #[test]
    fn write_and_read_single_bucket() {
        let dir = tempdir().unwrap();
        let file = test_file(&dir);
        let header = BucketHeader::<u64>::new(&file, 4);
        header.create().unwrap();

        header.write(2, 0xabcdef);

        assert_eq!(header.read(2), 0xabcdef);
        assert_eq!(header.read(1), u64::NOT_FOUND);
        assert_eq!(header.read(3), u64::NOT_FOUND);
    }

    #[test]
    fn start_accepts_matching_count() {
        let dir = tempdir().unwrap();
        let file = test_file(&dir);
        let header = BucketHeader::<u32>::new(&file, 16);
        header.create().unwrap();

        assert!(header.start().is_ok());
    }

    #[test]
    fn start_rejects_count_mismatch() {
        let dir = tempdir().unwrap();
        let file = test_file(&dir);
        BucketHeader::<u32>::new(&file, 16).create().unwrap();

        let reopened = BucketHeader::<u32>::new(&file, 8);
        assert!(reopened.start().is_err());
    }

    #[test]
    fn size_accounts_for_link_width() {
        assert_eq!(BucketHeader::<u32>::size(10), 4 + 40);
        assert_eq!(BucketHeader::<u64>::size(10), 4 + 80);
    }
}
