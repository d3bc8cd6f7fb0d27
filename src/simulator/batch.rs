//! Batch journal
//!
//! Staged operations of the one batch a connection may have open. Nothing
//! touches the store until commit.
//!
//! ## States
//! ```text
//!          open()
//!   NONE ─────────▶ OPEN ──stage()──▶ OPEN
//!                    │
//!                    ├─commit()──▶ COMMITTING ─┬─ all checks pass ─▶ COMMITTED
//!                    │                         └─ any check fails ─▶ ABORTED
//!                    └─abort()───▶ ABORTED
//! ```
//!
//! Commit first replays every precondition against a view of the store as
//! it would look after the earlier operations, then applies. The caller
//! holds the drive's write lock across the whole commit.

use std::collections::HashMap;

use bytes::Bytes;

use crate::entry::{Entry, EntryMetadata};
use crate::error::{KineticError, Result};
use crate::protocol::{BatchOpKind, BatchOpOutcome, KeyValue, Status, StatusCode};
use crate::storage::KvStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Open,
    Committing,
    Committed,
    Aborted,
}

#[derive(Debug, Clone)]
struct StagedOp {
    kind: BatchOpKind,
    kv: KeyValue,
    value: Bytes,
}

/// What a commit did
#[derive(Debug)]
pub struct CommitReport {
    pub outcomes: Vec<BatchOpOutcome>,
    /// Why the batch did not commit; `None` when it did
    pub failure: Option<KineticError>,
}

#[derive(Debug)]
pub struct BatchJournal {
    batch_id: u32,
    state: BatchState,
    ops: Vec<StagedOp>,
    max_ops: usize,
}

impl BatchJournal {
    pub fn open(batch_id: u32, max_ops: usize) -> Self {
        Self {
            batch_id,
            state: BatchState::Open,
            ops: Vec::new(),
            max_ops,
        }
    }

    pub fn batch_id(&self) -> u32 {
        self.batch_id
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn stage(&mut self, kind: BatchOpKind, kv: KeyValue, value: Bytes) -> Result<()> {
        if self.state != BatchState::Open {
            return Err(KineticError::InvalidBatch(format!(
                "batch {} is {:?}",
                self.batch_id, self.state
            )));
        }
        if self.ops.len() >= self.max_ops {
            self.state = BatchState::Aborted;
            return Err(KineticError::InvalidBatch(format!(
                "batch {} exceeds {} operations",
                self.batch_id, self.max_ops
            )));
        }
        self.ops.push(StagedOp { kind, kv, value });
        Ok(())
    }

    pub fn abort(&mut self) {
        self.state = BatchState::Aborted;
        self.ops.clear();
    }

    /// Validate then apply every staged operation
    ///
    /// `capacity` bounds the store's size after the batch.
    pub fn commit(&mut self, store: &dyn KvStore, capacity: u64) -> Result<CommitReport> {
        if self.state != BatchState::Open {
            return Err(KineticError::InvalidBatch(format!(
                "batch {} is {:?}",
                self.batch_id, self.state
            )));
        }
        self.state = BatchState::Committing;

        // Step 1: Check every precondition; nothing is applied on failure
        if let Some((index, err)) = self.validate(store, capacity)? {
            self.state = BatchState::Aborted;
            tracing::debug!("Batch {} refused at operation {}: {}", self.batch_id, index, err);
            let outcomes = self.outcomes(|i| {
                if i == index {
                    Status::from_error(&err)
                } else {
                    Status::new(StatusCode::Aborted, "batch not applied")
                }
            });
            return Ok(CommitReport {
                outcomes,
                failure: Some(err),
            });
        }

        // Step 2: Apply in staging order
        let mut applied = self.ops.len();
        let mut failure = None;
        for (index, op) in self.ops.iter().enumerate() {
            if let Err(e) = apply(store, op) {
                tracing::warn!("Batch {} failed applying operation {}: {}", self.batch_id, index, e);
                applied = index;
                failure = Some(KineticError::Internal(e.to_string()));
                break;
            }
        }

        let outcomes = self.outcomes(|i| match i {
            i if i < applied => Status::success(),
            i if i == applied => Status::new(StatusCode::InternalError, "storage error"),
            _ => Status::new(StatusCode::NotAttempted, "batch stopped"),
        });

        self.state = if failure.is_none() {
            BatchState::Committed
        } else {
            BatchState::Aborted
        };
        Ok(CommitReport { outcomes, failure })
    }

    /// First failing operation, checked against the store plus the effect
    /// of earlier staged operations
    fn validate(&self, store: &dyn KvStore, capacity: u64) -> Result<Option<(usize, KineticError)>> {
        // key -> version after earlier ops (None = absent)
        let mut overlay: HashMap<&[u8], Option<Vec<u8>>> = HashMap::new();
        let mut projected = store.size_bytes();

        for (index, op) in self.ops.iter().enumerate() {
            let key = op.kv.key.as_slice();
            let current = match overlay.get(key) {
                Some(version) => version.clone(),
                None => store.get(key)?.map(|e| e.metadata.version),
            };

            match op.kind {
                BatchOpKind::Put => {
                    if !op.kv.force && current.as_deref().unwrap_or_default() != op.kv.db_version.as_slice() {
                        return Ok(Some((index, KineticError::VersionMismatch)));
                    }
                    projected += (key.len() + op.value.len() + op.kv.new_version.len() + op.kv.tag.len()) as u64;
                    if projected > capacity {
                        return Ok(Some((index, KineticError::NoSpace)));
                    }
                    overlay.insert(key, Some(op.kv.new_version.clone()));
                }
                BatchOpKind::Delete => {
                    match current {
                        // A forced delete of an absent key is a no-op
                        None if op.kv.force => {}
                        None => return Ok(Some((index, KineticError::NotFound))),
                        Some(version) => {
                            if !op.kv.force && version != op.kv.db_version {
                                return Ok(Some((index, KineticError::VersionMismatch)));
                            }
                        }
                    }
                    overlay.insert(key, None);
                }
            }
        }

        Ok(None)
    }

    fn outcomes(&self, status: impl Fn(usize) -> Status) -> Vec<BatchOpOutcome> {
        self.ops
            .iter()
            .enumerate()
            .map(|(i, op)| BatchOpOutcome {
                index: i as u32,
                kind: op.kind,
                key: op.kv.key.clone(),
                status: status(i),
            })
            .collect()
    }
}

fn apply(store: &dyn KvStore, op: &StagedOp) -> Result<()> {
    match op.kind {
        BatchOpKind::Put => store.put(Entry {
            key: op.kv.key.clone(),
            value: op.value.clone(),
            metadata: EntryMetadata {
                version: op.kv.new_version.clone(),
                tag: op.kv.tag.clone(),
                algorithm: op.kv.algorithm,
            },
        }),
        BatchOpKind::Delete => store.delete(&op.kv.key).map(|_| ()),
    }
}
