//! # Slab Manager
//!
//! Append-only allocator for variable-size slabs:
//!
//! ```text
//! [ header           ]   caller-owned prefix (bucket array, or empty)
//! [ payload_size : 8 ]   total payload bytes including this word
//! [ slab ... slab    ]
//! ```
//!
//! Slabs are addressed by `u64` byte offset relative to the end of the
//! header, so the payload-size word itself occupies offsets `0..8` and the
//! first slab lands at offset 8. `u64::MAX` is the `NOT_FOUND` sentinel and
//! is never a valid offset. Payload size only grows; slabs are never freed.

use eyre::{ensure, Result};
use parking_lot::Mutex;

use crate::memory::{MemoryMap, ReadGuard, WriteGuard};

use super::{Link, OFFSET_SIZE};

const SIZE_SIZE: usize = OFFSET_SIZE;

/// Allocator for variable-size slabs in one file, starting after a
/// caller-owned header prefix.
pub struct SlabManager<'a> {
    file: &'a MemoryMap,
    header_size: usize,
    payload_size: Mutex<u64>,
}

impl<'a> SlabManager<'a> {
    pub fn new(file: &'a MemoryMap, header_size: usize) -> Self {
        Self {
            file,
            header_size,
            // The payload begins with its own size word.
            payload_size: Mutex::new(SIZE_SIZE as u64),
        }
    }

    /// Initializes the payload size of a new file. Refuses to run over a
    /// manager that has already allocated slabs.
    pub fn create(&self) -> Result<()> {
        let payload_size = self.payload_size.lock();

        ensure!(
            *payload_size == SIZE_SIZE as u64,
            "'{}' already has {} payload bytes allocated",
            self.file.path().display(),
            *payload_size
        );

        self.file.resize(self.header_size + SIZE_SIZE)?;
        self.write_size(*payload_size);
        Ok(())
    }

    /// Loads the payload size of an existing file and checks it fits within
    /// the file.
    pub fn start(&self) -> Result<()> {
        let mut payload_size = self.payload_size.lock();
        *payload_size = self.read_size();

        let minimum = self.header_size as u64 + *payload_size;
        ensure!(
            minimum <= self.file.size() as u64,
            "'{}' is corrupt: payload size {} exceeds file size {}",
            self.file.path().display(),
            *payload_size,
            self.file.size()
        );
        Ok(())
    }

    /// Writes the payload size back to the file.
    pub fn sync(&self) {
        let payload_size = self.payload_size.lock();
        self.write_size(*payload_size);
    }

    /// Total payload bytes, including the size word.
    pub fn payload_size(&self) -> u64 {
        *self.payload_size.lock()
    }

    /// Reserves `size` bytes at the end of the payload, growing the file as
    /// needed, and returns the offset of the reservation.
    pub fn new_slab(&self, size: usize) -> Result<u64> {
        let mut payload_size = self.payload_size.lock();

        // Always write after the last slab.
        let position = *payload_size;
        let new_size = position
            .checked_add(size as u64)
            .filter(|new_size| *new_size < <u64 as Link>::NOT_FOUND);
        let Some(new_size) = new_size else {
            panic!("payload size overflow in '{}'", self.file.path().display());
        };

        self.file.resize(self.header_size + new_size as usize)?;

        *payload_size = new_size;
        Ok(position)
    }

    /// A read accessor positioned at slab `position`.
    pub fn get(&self, position: u64) -> ReadGuard<'a> {
        assert!(
            position < self.payload_size(),
            "slab {} past end of store",
            position
        );

        let mut reader = self.file.access();
        reader.increment(self.header_size + position as usize);
        reader
    }

    /// A write accessor positioned at slab `position`.
    pub fn get_mut(&self, position: u64) -> WriteGuard<'a> {
        assert!(
            position < self.payload_size(),
            "slab {} past end of store",
            position
        );

        let mut writer = self.file.write_access();
        writer.increment(self.header_size + position as usize);
        writer
    }

    fn read_size(&self) -> u64 {
        let mut reader = self.file.access();
        reader.increment(self.header_size);
        u64::read_le(reader.buffer())
    }

    fn write_size(&self, size: u64) {
        let mut writer = self.file.write_access();
        writer.increment(self.header_size);
        size.write_le(writer.buffer_mut());
    }
}
