//! # Memory Module
//!
//! This module provides the foundational I/O layer for chainstore: a growable
//! memory-mapped file ([`MemoryMap`]) and the scoped accessors that pin its
//! mapping ([`ReadGuard`], [`WriteGuard`]).
//!
//! ## Safety Model
//!
//! A memory-mapped region becomes invalid when the file is grown and
//! remapped, because the base address may move. chainstore therefore never
//! hands out a view of the mapping directly; every read or write goes through
//! an accessor that holds the mapping lock for its own lifetime:
//!
//! ```text
//! MemoryMap::access()  -> ReadGuard    // shared lock, many concurrent
//! MemoryMap::writer(n) -> WriteGuard   // upgradable lock, one at a time
//! ```
//!
//! Only [`MemoryMap::writer`] can trigger a remap, and it does so with the
//! lock upgraded to exclusive, after every reader has drained. A slice
//! borrowed from a guard cannot outlive the guard, so the borrow checker
//! rules out dangling views across a remap.
//!
//! ## Growth
//!
//! Callers request the raw number of bytes they need; the file amplifies the
//! request to `needed + needed / 2` before truncating and remapping, so that
//! repeated appends settle into geometric growth.

mod accessor;
mod file;

pub use accessor::{ReadGuard, WriteGuard};
pub use file::MemoryMap;

pub(crate) use file::MapInner;
