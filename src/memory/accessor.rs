//! # Scoped Mapping Accessors
//!
//! `ReadGuard` and `WriteGuard` are the only views into a [`MemoryMap`]'s
//! region. Each holds the mapping lock for its own lifetime, so the base
//! pointer it was built from cannot be invalidated by a concurrent remap
//! while the guard lives, and a slice borrowed from a guard cannot outlive
//! it.
//!
//! Both guards carry a logical offset. `increment(n)` shifts the view
//! forward, mirroring how the allocators position an accessor at a record,
//! slab, or value before handing it to the caller.
//!
//! [`MemoryMap`]: super::MemoryMap

use parking_lot::{RwLockReadGuard, RwLockUpgradableReadGuard};

use super::MapInner;

/// A scoped read view of the mapped region.
///
/// Holds the mapping lock shared; any number of read guards coexist, along
/// with at most one [`WriteGuard`].
pub struct ReadGuard<'a> {
    inner: RwLockReadGuard<'a, MapInner>,
    offset: usize,
}

impl<'a> ReadGuard<'a> {
    pub(super) fn new(inner: RwLockReadGuard<'a, MapInner>) -> Self {
        Self { inner, offset: 0 }
    }

    /// Shifts the logical view forward by `bytes`.
    pub fn increment(&mut self, bytes: usize) {
        self.offset += bytes;
        debug_assert!(self.offset <= self.inner.len, "accessor past end of map");
    }

    /// Current logical offset within the mapping.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The mapped bytes from the logical offset to the end of the region.
    pub fn buffer(&self) -> &[u8] {
        // SAFETY: ptr/len describe the live mapping and the shared lock held
        // by this guard blocks remap and unmap until the guard (and with it
        // every slice borrowed here) is gone. offset <= len is maintained by
        // increment().
        unsafe {
            std::slice::from_raw_parts(self.inner.ptr.add(self.offset), self.inner.len - self.offset)
        }
    }
}

/// A scoped write view of the mapped region.
///
/// Holds the mapping lock upgradable: exactly one write guard exists at a
/// time, concurrent with read guards. Obtained from [`MemoryMap::writer`],
/// which performs any growth before the guard is returned, so the guard
/// itself never remaps.
///
/// Writes land in memory shared with concurrent readers. The allocators hand
/// out disjoint byte ranges for fresh rows, which stay unreachable until
/// their head link is published, and the tables serialize every head/next
/// word rewrite against reads of the same word with their update lock. Those
/// two disciplines are what make the shared-mode mutation below sound.
///
/// [`MemoryMap::writer`]: super::MemoryMap::writer
pub struct WriteGuard<'a> {
    inner: RwLockUpgradableReadGuard<'a, MapInner>,
    offset: usize,
}

impl<'a> WriteGuard<'a> {
    pub(super) fn new(inner: RwLockUpgradableReadGuard<'a, MapInner>) -> Self {
        Self { inner, offset: 0 }
    }

    /// Shifts the logical view forward by `bytes`.
    pub fn increment(&mut self, bytes: usize) {
        self.offset += bytes;
        debug_assert!(self.offset <= self.inner.len, "accessor past end of map");
    }

    /// Current logical offset within the mapping.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The mapped bytes from the logical offset, read-only.
    pub fn buffer(&self) -> &[u8] {
        // SAFETY: as for ReadGuard::buffer; the upgradable lock is held
        // shared for the guard's lifetime.
        unsafe {
            std::slice::from_raw_parts(self.inner.ptr.add(self.offset), self.inner.len - self.offset)
        }
    }

    /// The mapped bytes from the logical offset, writable.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        // SAFETY: the upgradable lock admits only one WriteGuard at a time,
        // so no two mutable views of the region coexist:
        // 1. The mapping cannot move or shrink while the lock is held
        // 2. Writer mutual exclusion comes from the single upgradable slot
        // 3. Readers racing on coordination words are excluded by the table
        //    update locks; all other written bytes are unreachable to them
        //    until published
        // The slice cannot outlive &mut self and therefore the guard.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.inner.ptr.add(self.offset),
                self.inner.len - self.offset,
            )
        }
    }
}
