//! Per-operation counters
//!
//! One atomic counter per [`OpKind`], built up front so increments never
//! take a lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::protocol::{OpKind, Statistics};

#[derive(Debug)]
pub struct OperationCounter {
    counts: HashMap<OpKind, AtomicU64>,
}

impl OperationCounter {
    pub fn new() -> Self {
        Self {
            counts: OpKind::ALL
                .iter()
                .map(|op| (*op, AtomicU64::new(0)))
                .collect(),
        }
    }

    pub fn increment(&self, op: OpKind) {
        if let Some(count) = self.counts.get(&op) {
            count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get(&self, op: OpKind) -> u64 {
        self.counts
            .get(&op)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Current values in [`OpKind::ALL`] order
    pub fn snapshot(&self) -> Vec<Statistics> {
        OpKind::ALL
            .iter()
            .map(|op| Statistics {
                op: *op,
                count: self.get(*op),
            })
            .collect()
    }
}

impl Default for OperationCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_concurrent_increments() {
        let counter = Arc::new(OperationCounter::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.increment(OpKind::Put);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.get(OpKind::Put), 4000);
        assert_eq!(counter.get(OpKind::Get), 0);
        assert_eq!(counter.snapshot().len(), OpKind::ALL.len());
    }
}
