//! Storage Module
//!
//! The ordered key-value store beneath the drive simulator.
//!
//! ## Responsibilities
//! - Total order over keys by lexicographic byte comparison
//! - Per-entry opaque versions (compared for equality only)
//! - Point lookups, strict successor/predecessor, bounded range scans
//!
//! The simulator only talks to [`KvStore`]; [`MemoryStore`] is the
//! implementation it ships with.

mod memory;

pub use memory::MemoryStore;

use crate::entry::Entry;
use crate::error::Result;

/// Bounds of a key range scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery<'a> {
    pub start: &'a [u8],
    pub start_inclusive: bool,
    pub end: &'a [u8],
    pub end_inclusive: bool,
    pub max: usize,
    /// Walk from `end` toward `start`
    pub reverse: bool,
}

/// Ordered key-value store with per-entry versions
pub trait KvStore: Send + Sync {
    /// Insert or replace an entry
    fn put(&self, entry: Entry) -> Result<()>;

    fn get(&self, key: &[u8]) -> Result<Option<Entry>>;

    /// Returns whether an entry was removed
    fn delete(&self, key: &[u8]) -> Result<bool>;

    /// First entry with a key strictly greater than `key`
    fn get_next(&self, key: &[u8]) -> Result<Option<Entry>>;

    /// Last entry with a key strictly less than `key`
    fn get_previous(&self, key: &[u8]) -> Result<Option<Entry>>;

    /// Keys inside the range, ascending (or descending when reversed),
    /// at most `max`
    fn range(&self, query: &RangeQuery<'_>) -> Result<Vec<Vec<u8>>>;

    /// Remove every entry
    fn clear(&self) -> Result<()>;

    /// Approximate bytes held (keys + values + metadata)
    fn size_bytes(&self) -> u64;

    fn entry_count(&self) -> usize;
}
