//! # Rows
//!
//! On-disk linked-list nodes for the chained hash tables. A row stores its
//! key, the link of the next row in its chain, and the caller's value bytes:
//!
//! ```text
//! record row:  [ key : K ][ next : 4 ][ value : V ]     (V fixed per table)
//! slab row:    [ key : K ][ next : 8 ][ value : ... ]   (sized per insert)
//! ```
//!
//! `RecordRow` and `SlabRow` are thin views: a manager borrow plus a link.
//! They own no storage and cannot outlive their manager. Every access takes
//! a fresh scoped accessor, so no view of the mapping is held between
//! operations.

use eyre::Result;

use crate::memory::ReadGuard;

use super::{Link, RecordManager, SlabManager, INDEX_SIZE, OFFSET_SIZE};

/// A fixed-size hash-table row: a view over one record of a
/// [`RecordManager`].
pub struct RecordRow<'a, 'm, const K: usize> {
    manager: &'m RecordManager<'a>,
    index: u32,
}

impl<'a, 'm, const K: usize> RecordRow<'a, 'm, K> {
    /// A view of the existing record at `index`.
    pub fn new(manager: &'m RecordManager<'a>, index: u32) -> Self {
        Self { manager, index }
    }

    /// Allocates a new record and populates its key and value. The `next`
    /// field is left untouched; the caller sets it via [`link`] before
    /// publishing the row.
    ///
    /// [`link`]: Self::link
    pub fn create(
        manager: &'m RecordManager<'a>,
        key: &[u8; K],
        write: impl FnOnce(&mut [u8]),
    ) -> Result<Self> {
        let value_size = manager.record_size() - K - INDEX_SIZE;
        let index = manager.new_records(1)?;

        let mut writer = manager.get_mut(index);
        let buffer = writer.buffer_mut();
        buffer[..K].copy_from_slice(key);
        write(&mut buffer[K + INDEX_SIZE..K + INDEX_SIZE + value_size]);

        Ok(Self { manager, index })
    }

    /// The record index of this row.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Whether this row's key equals `key`.
    pub fn compare(&self, key: &[u8; K]) -> bool {
        let reader = self.manager.get(self.index);
        &reader.buffer()[..K] == key
    }

    /// The link of the next row in the chain.
    pub fn next(&self) -> u32 {
        let mut reader = self.manager.get(self.index);
        reader.increment(K);
        u32::read_le(reader.buffer())
    }

    /// Sets the `next` field of a freshly created row.
    pub fn link(&self, next: u32) {
        self.write_next(next);
    }

    /// Overwrites the `next` field; used for unlink stitching.
    pub fn write_next(&self, next: u32) {
        let mut writer = self.manager.get_mut(self.index);
        writer.increment(K);
        next.write_le(writer.buffer_mut());
    }

    /// A read accessor positioned at this row's value.
    pub fn data(&self) -> ReadGuard<'a> {
        let mut reader = self.manager.get(self.index);
        reader.increment(K + INDEX_SIZE);
        reader
    }
}

/// A variable-size hash-table row: a view over one slab of a
/// [`SlabManager`].
pub struct SlabRow<'a, 'm, const K: usize> {
    manager: &'m SlabManager<'a>,
    position: u64,
}

impl<'a, 'm, const K: usize> SlabRow<'a, 'm, K> {
    const PREFIX_SIZE: usize = K + OFFSET_SIZE;

    /// A view of the existing slab at `position`.
    pub fn new(manager: &'m SlabManager<'a>, position: u64) -> Self {
        Self { manager, position }
    }

    /// Allocates a new slab of `value_size` value bytes and populates its
    /// key and value. The `next` field is left for [`link`].
    ///
    /// [`link`]: Self::link
    pub fn create(
        manager: &'m SlabManager<'a>,
        key: &[u8; K],
        value_size: usize,
        write: impl FnOnce(&mut [u8]),
    ) -> Result<Self> {
        let position = manager.new_slab(Self::PREFIX_SIZE + value_size)?;

        let mut writer = manager.get_mut(position);
        let buffer = writer.buffer_mut();
        buffer[..K].copy_from_slice(key);
        write(&mut buffer[Self::PREFIX_SIZE..Self::PREFIX_SIZE + value_size]);

        Ok(Self { manager, position })
    }

    /// The slab offset of this row.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The slab offset of this row's value bytes.
    pub fn offset(&self) -> u64 {
        self.position + Self::PREFIX_SIZE as u64
    }

    /// Whether this row's key equals `key`.
    pub fn compare(&self, key: &[u8; K]) -> bool {
        let reader = self.manager.get(self.position);
        &reader.buffer()[..K] == key
    }

    /// The offset of the next row in the chain.
    pub fn next(&self) -> u64 {
        let mut reader = self.manager.get(self.position);
        reader.increment(K);
        u64::read_le(reader.buffer())
    }

    /// Sets the `next` field of a freshly created row.
    pub fn link(&self, next: u64) {
        self.write_next(next);
    }

    /// Overwrites the `next` field; used for unlink stitching.
    pub fn write_next(&self, next: u64) {
        let mut writer = self.manager.get_mut(self.position);
        writer.increment(K);
        next.write_le(writer.buffer_mut());
    }

    /// A read accessor positioned at this row's value.
    pub fn data(&self) -> ReadGuard<'a> {
        let mut reader = self.manager.get(self.position);
        reader.increment(Self::PREFIX_SIZE);
        reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryMap;
    use tempfile::tempdir;

    #[test]
    fn record_row_layout_round_trips() {
        let dir = tempdir().unwrap();
        let file = MemoryMap::create(dir.path().join("rows.db"), 1).unwrap();
        let manager = RecordManager::new(&file, 0, 4 + INDEX_SIZE + 8);
        manager.create().unwrap();

        let key = [7u8; 4];
        let row = RecordRow::create(&manager, &key, |value| {
            value.copy_from_slice(&99u64.to_le_bytes());
        })
        .unwrap();
        row.link(u32::NOT_FOUND);

        assert!(row.compare(&key));
        assert!(!row.compare(&[0u8; 4]));
        assert_eq!(row.next(), u32::NOT_FOUND);
        assert_eq!(u64::read_le(row.data().buffer()), 99);

        row.write_next(3);
        assert_eq!(row.next(), 3);
    }

    #[test]
    fn slab_rows_support_mixed_value_sizes() {
        let dir = tempdir().unwrap();
        let file = MemoryMap::create(dir.path().join("rows.db"), 1).unwrap();
        let manager = SlabManager::new(&file, 0);
        manager.create().unwrap();

        let key = [1u8; 3];
        let small = SlabRow::create(&manager, &key, 2, |value| {
            value.copy_from_slice(b"ab");
        })
        .unwrap();
        small.link(u64::NOT_FOUND);

        let large = SlabRow::create(&manager, &key, 100, |value| {
            value.fill(0x5a);
        })
        .unwrap();
        large.link(small.position());

        assert_eq!(&small.data().buffer()[..2], b"ab");
        assert!(large.data().buffer()[..100].iter().all(|&byte| byte == 0x5a));
        assert_eq!(large.next(), small.position());
        assert_eq!(
            large.offset(),
            large.position() + (3 + OFFSET_SIZE) as u64
        );
    }
}
