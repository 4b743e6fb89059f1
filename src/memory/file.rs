//! # Memory-Mapped File Region
//!
//! This module implements `MemoryMap`, the sole I/O substrate of chainstore:
//! one open file descriptor plus one shared mapping of its full length.
//!
//! ## Locking Discipline
//!
//! A single reader-writer lock protects the `(pointer, length)` pair of the
//! mapping:
//!
//! - Readers take the lock shared ([`MemoryMap::access`]) and may run
//!   concurrently with each other and with a writer.
//! - Writers take the lock upgradable ([`MemoryMap::writer`]); at most one
//!   writer exists at a time, which is what makes handing out mutable views
//!   of the shared mapping sound.
//! - Growth upgrades to exclusive, re-tests the requested size under the
//!   exclusive lock, truncates and remaps, then downgrades. The exclusive
//!   hold is required because remapping may move the base address and any
//!   raw pointer held across it would dangle.
//!
//! Only growth ever blocks readers; `access()` blocks only a concurrent
//! remap.
//!
//! ## Error Handling
//!
//! Filesystem failures (open, truncate, map, remap, flush, close) are fatal
//! and surface immediately with the operation, path, and OS error attached.
//! A failed grow mid-write has no recovery path.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;
use parking_lot::{RwLock, RwLockUpgradableReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use super::{ReadGuard, WriteGuard};

pub(crate) struct MapInner {
    map: Option<MmapMut>,
    pub(crate) ptr: *mut u8,
    pub(crate) len: usize,
}

// SAFETY: MapInner is only reachable through the RwLock in MemoryMap. The
// raw pointer is a cached view of the owned mapping, not independent state:
// 1. It is rewritten together with `map` under the exclusive lock on remap
// 2. It is only dereferenced by accessors holding the same lock
// 3. The mapping itself is plain shared memory with no thread affinity
unsafe impl Send for MapInner {}
unsafe impl Sync for MapInner {}

impl MapInner {
    fn new(mut map: MmapMut) -> Self {
        let ptr = map.as_mut_ptr();
        let len = map.len();
        Self {
            map: Some(map),
            ptr,
            len,
        }
    }
}

/// A growable, shared, memory-mapped file region.
///
/// All reads and writes against the file go through scoped accessors that
/// pin the mapping for their lifetime; see the module documentation for the
/// locking discipline.
pub struct MemoryMap {
    file: File,
    path: PathBuf,
    inner: RwLock<MapInner>,
}

impl MemoryMap {
    /// Creates (or truncates) the file at `path` with `size` zero-filled
    /// bytes and maps it.
    pub fn create<P: AsRef<Path>>(path: P, size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        ensure!(size > 0, "cannot map '{}' at zero size", path.display());

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to create store file '{}'", path.display()))?;

        file.set_len(size as u64)
            .wrap_err_with(|| format!("failed to set '{}' to {} bytes", path.display(), size))?;

        Self::map(file, path)
    }

    /// Opens an existing file read/write and maps its current length.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open store file '{}'", path.display()))?;

        let length = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat store file '{}'", path.display()))?
            .len();

        ensure!(
            length > 0,
            "cannot map empty store file '{}'",
            path.display()
        );

        Self::map(file, path)
    }

    fn map(file: File, path: PathBuf) -> Result<Self> {
        // SAFETY: MmapMut::map_mut is unsafe because externally modified
        // files lead to undefined behavior. This is safe because:
        // 1. Store files are owned by this process and not shared externally
        // 2. The mapping is reached only through lock-holding accessors
        // 3. The mapping's lifetime is tied to MemoryMap, preventing
        //    use-after-unmap
        let map = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        info!(path = %path.display(), bytes = map.len(), "mapping");

        Ok(Self {
            file,
            path,
            inner: RwLock::new(MapInner::new(map)),
        })
    }

    /// The file path this map was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current mapped length in bytes.
    ///
    /// Thread safe, but only meaningful for sizing decisions during start;
    /// a concurrent writer may grow the file at any time.
    pub fn size(&self) -> usize {
        self.inner.read().len
    }

    /// Returns a read accessor pinning the current mapping.
    ///
    /// Panics if the map has been stopped.
    pub fn access(&self) -> ReadGuard<'_> {
        let inner = self.inner.read();
        assert!(inner.map.is_some(), "store '{}' is stopped", self.path.display());
        ReadGuard::new(inner)
    }

    /// Returns a write accessor without growing the file.
    ///
    /// At most one write accessor exists at a time; it coexists with
    /// concurrent read accessors. Panics if the map has been stopped.
    pub fn write_access(&self) -> WriteGuard<'_> {
        let inner = self.inner.upgradable_read();
        assert!(inner.map.is_some(), "store '{}' is stopped", self.path.display());
        WriteGuard::new(inner)
    }

    /// Returns a write accessor over a mapping of at least `size` bytes,
    /// growing and remapping the file first if it is currently smaller.
    pub fn writer(&self, size: usize) -> Result<WriteGuard<'_>> {
        let inner = self.inner.upgradable_read();
        assert!(inner.map.is_some(), "store '{}' is stopped", self.path.display());

        if size > inner.len {
            let mut unique = RwLockUpgradableReadGuard::upgrade(inner);

            // Must re-test under the exclusive lock.
            if size > unique.len {
                self.reserve(&mut unique, size)?;
            }

            let inner = RwLockWriteGuard::downgrade_to_upgradable(unique);
            return Ok(WriteGuard::new(inner));
        }

        Ok(WriteGuard::new(inner))
    }

    /// Grows the file so that at least `size` bytes are mapped.
    pub fn resize(&self, size: usize) -> Result<()> {
        self.writer(size).map(drop)
    }

    /// Truncates the file to the amplified size and remaps it. Caller holds
    /// the exclusive lock.
    fn reserve(&self, inner: &mut MapInner, size: usize) -> Result<()> {
        let new_size = size + size / 2;

        self.file.set_len(new_size as u64).wrap_err_with(|| {
            format!(
                "failed to resize '{}' to {} bytes, disk space may be low",
                self.path.display(),
                new_size
            )
        })?;

        debug!(path = %self.path.display(), bytes = new_size, "resizing");

        if let Some(map) = &inner.map {
            map.flush_async()
                .wrap_err_with(|| format!("failed to flush '{}' before remap", self.path.display()))?;
        }

        // SAFETY: same justification as the initial mapping; additionally the
        // exclusive lock held by the caller guarantees no accessor views the
        // old mapping, which is dropped when replaced below.
        let map = unsafe {
            MmapMut::map_mut(&self.file)
                .wrap_err_with(|| format!("failed to remap '{}' after resize", self.path.display()))?
        };

        *inner = MapInner::new(map);
        Ok(())
    }

    /// Flushes the mapping to disk without unmapping.
    pub fn flush(&self) -> Result<()> {
        let inner = self.inner.read();
        if let Some(map) = &inner.map {
            map.flush()
                .wrap_err_with(|| format!("failed to flush '{}'", self.path.display()))?;
        }
        Ok(())
    }

    /// Flushes, unmaps and syncs the file. Idempotent. Accessors must not be
    /// requested after stop.
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.inner.write();

        let Some(map) = inner.map.take() else {
            return Ok(());
        };

        info!(path = %self.path.display(), "unmapping");

        inner.ptr = std::ptr::null_mut();
        inner.len = 0;

        map.flush()
            .wrap_err_with(|| format!("failed to flush '{}'", self.path.display()))?;
        drop(map);

        self.file
            .sync_all()
            .wrap_err_with(|| format!("failed to sync '{}'", self.path.display()))
    }

    /// Hints the kernel to fault in `length` bytes starting at `offset`.
    /// Out-of-range requests are clamped; a no-op off Unix.
    pub fn prefetch(&self, offset: usize, length: usize) {
        #[cfg(unix)]
        {
            let inner = self.inner.read();
            if inner.map.is_none() || offset >= inner.len {
                return;
            }
            let length = length.min(inner.len - offset);

            // SAFETY: madvise with MADV_WILLNEED is a kernel hint. The range
            // is clamped to the live mapping above, and the shared lock held
            // here keeps the mapping from moving for the duration of the
            // call.
            unsafe {
                libc::madvise(
                    inner.ptr.add(offset) as *mut libc::c_void,
                    length,
                    libc::MADV_WILLNEED,
                );
            }
        }
        #[cfg(not(unix))]
        {
            let _ = (offset, length);
        }
    }
}

impl Drop for MemoryMap {
    fn drop(&mut self) {
        if let Err(error) = self.stop() {
            warn!(path = %self.path.display(), %error, "failed to stop store");
        }
    }
}
