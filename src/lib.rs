//! # chainstore - Persistent Memory-Mapped Storage Kernel
//!
//! chainstore is the reusable persistence kernel for hash-indexed, append-only
//! data files. It provides two families of primitives:
//!
//! - A **memory-mapped file store**: a growable, shared byte region with
//!   reader/writer access discipline that stays safe under concurrent lookups
//!   and single-writer growth.
//! - **Linked-list primitives over that store**: fixed-size *record* and
//!   variable-size *slab* allocators, composed into chained hash tables
//!   (key -> single row) and multimaps (key -> chain of value rows).
//!
//! Higher-level indexes (for example a transaction-history index keyed by a
//! short hash) are built on the hash-table/multimap contract exposed here.
//!
//! ## Quick Start
//!
//! ```ignore
//! use chainstore::memory::MemoryMap;
//! use chainstore::table::RecordHashTable;
//!
//! let file = MemoryMap::create("keys.db", 1)?;
//! let table = RecordHashTable::<20>::new(&file, 1000, 8);
//! table.create()?;
//!
//! table.store(&key, |value| value.copy_from_slice(&height.to_le_bytes()))?;
//! let found = table.find(&key);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-------------------------------------------+
//! |   RecordMultimap (key -> chain of rows)   |
//! +-------------------------------------------+
//! |  RecordHashTable    |    SlabHashTable    |
//! +-------------------------------------------+
//! |  BucketHeader  | RecordRow   |  SlabRow   |
//! +-------------------------------------------+
//! |  RecordManager      |    SlabManager      |
//! +-------------------------------------------+
//! |   MemoryMap + ReadGuard / WriteGuard      |
//! +-------------------------------------------+
//! ```
//!
//! ## File Layout
//!
//! Every store is a single file with an optional bucket array, an allocator
//! counter, and an append-only payload:
//!
//! ```text
//! [ bucket_count : 4 ]  [ bucket[0..n] ]   (hash-table files only)
//! [ allocator counter ]                    (4-byte count or 8-byte size)
//! [ payload rows ]                         (appended only)
//! ```
//!
//! All multi-byte integers are little-endian. Files carry no magic bytes and
//! no version tag; the caller must open a file with the same parameters it
//! was created with.
//!
//! ## Concurrency Model
//!
//! Parallel threads with OS reader-writer locks; no async runtime. Readers
//! pin the mapping with a shared lock and are lock-free with respect to each
//! other. Growing the file takes the lock exclusively because remapping can
//! move the base address. Each table serializes insertion with a create lock
//! and guards head/next pointer words with an update lock, so a concurrent
//! reader always observes a consistent chain head. Unlink assumes a single
//! writer.
//!
//! ## Module Overview
//!
//! - [`memory`]: memory-mapped file region and scoped accessors
//! - [`table`]: allocators, on-disk rows, hash tables and the multimap

pub mod memory;
pub mod table;

pub use memory::{MemoryMap, ReadGuard, WriteGuard};
pub use table::{
    Link, RecordHashTable, RecordManager, RecordMultimap, SlabHashTable, SlabManager,
};
