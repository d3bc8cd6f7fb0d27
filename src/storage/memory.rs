//! In-memory store
//!
//! BTreeMap-based store with RwLock for concurrency.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::entry::Entry;
use crate::error::Result;
use super::{KvStore, RangeQuery};

/// Ordered in-memory store
///
/// ## Concurrency:
/// - `data`: RwLock (many concurrent readers, exclusive writer)
/// - `size`: atomic, updated under the write lock
pub struct MemoryStore {
    data: RwLock<BTreeMap<Vec<u8>, Entry>>,
    size: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            size: AtomicU64::new(0),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn footprint(entry: &Entry) -> u64 {
    (entry.key.len() + entry.value.len() + entry.metadata.version.len() + entry.metadata.tag.len())
        as u64
}

impl KvStore for MemoryStore {
    fn put(&self, entry: Entry) -> Result<()> {
        let mut data = self.data.write();
        let added = footprint(&entry);
        if let Some(old) = data.insert(entry.key.clone(), entry) {
            self.size.fetch_sub(footprint(&old), Ordering::Relaxed);
        }
        self.size.fetch_add(added, Ordering::Relaxed);
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        let mut data = self.data.write();
        match data.remove(key) {
            Some(old) => {
                self.size.fetch_sub(footprint(&old), Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get_next(&self, key: &[u8]) -> Result<Option<Entry>> {
        let data = self.data.read();
        let next = data
            .range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(_, entry)| entry.clone());
        Ok(next)
    }

    fn get_previous(&self, key: &[u8]) -> Result<Option<Entry>> {
        let data = self.data.read();
        let previous = data
            .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(key)))
            .next_back()
            .map(|(_, entry)| entry.clone());
        Ok(previous)
    }

    fn range(&self, query: &RangeQuery<'_>) -> Result<Vec<Vec<u8>>> {
        // BTreeMap::range panics on inverted or empty-exclusive bounds
        match query.start.cmp(query.end) {
            std::cmp::Ordering::Greater => return Ok(Vec::new()),
            std::cmp::Ordering::Equal if !(query.start_inclusive && query.end_inclusive) => {
                return Ok(Vec::new())
            }
            _ => {}
        }

        let lower = if query.start_inclusive {
            Bound::Included(query.start)
        } else {
            Bound::Excluded(query.start)
        };
        let upper = if query.end_inclusive {
            Bound::Included(query.end)
        } else {
            Bound::Excluded(query.end)
        };

        let data = self.data.read();
        let keys = data.range::<[u8], _>((lower, upper)).map(|(k, _)| k);
        let keys: Vec<Vec<u8>> = if query.reverse {
            keys.rev().take(query.max).cloned().collect()
        } else {
            keys.take(query.max).cloned().collect()
        };
        Ok(keys)
    }

    fn clear(&self) -> Result<()> {
        let mut data = self.data.write();
        data.clear();
        self.size.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn size_bytes(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    fn entry_count(&self) -> usize {
        self.data.read().len()
    }
}
