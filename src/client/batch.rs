//! Batch operations
//!
//! Puts and deletes staged under one batch id and applied by the drive all
//! at once on `commit`. Each staged operation is acknowledged individually
//! but nothing becomes visible until the commit succeeds.

use bytes::Bytes;

use crate::entry::Entry;
use crate::error::{KineticError, Result};
use crate::protocol::{BatchOpOutcome, Body, Command, EndBatch, MessageType, StatusCode};
use super::kinetic::{delete_command, put_command, KineticClient};
use super::multiplexer::Response;

/// Result of a commit
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub batch_id: u32,
    /// True when every staged operation was applied
    pub committed: bool,
    /// Per-operation outcomes in staging order
    pub outcomes: Vec<BatchOpOutcome>,
}

impl BatchSummary {
    /// The operation that stopped the batch, if any
    pub fn first_failure(&self) -> Option<&BatchOpOutcome> {
        self.outcomes.iter().find(|o| {
            !o.status.is_success()
                && o.status.code != StatusCode::NotAttempted
                && o.status.code != StatusCode::Aborted
        })
    }
}

/// An open batch; dropping it without `commit` or `abort` aborts it
pub struct BatchOperation<'a> {
    client: &'a KineticClient,
    batch_id: u32,
    staged: u32,
    finished: bool,
}

impl<'a> BatchOperation<'a> {
    pub(crate) fn new(client: &'a KineticClient, batch_id: u32) -> Self {
        Self {
            client,
            batch_id,
            staged: 0,
            finished: false,
        }
    }

    pub fn batch_id(&self) -> u32 {
        self.batch_id
    }

    /// Operations staged so far
    pub fn len(&self) -> u32 {
        self.staged
    }

    pub fn is_empty(&self) -> bool {
        self.staged == 0
    }

    pub fn put(&mut self, entry: &Entry, db_version: Option<&[u8]>) -> Result<()> {
        let command = put_command(entry, db_version, false)?;
        self.stage(command, entry.value.clone())
    }

    pub fn put_forced(&mut self, entry: &Entry) -> Result<()> {
        let command = put_command(entry, None, true)?;
        self.stage(command, entry.value.clone())
    }

    pub fn delete(&mut self, entry: &Entry) -> Result<()> {
        let command = delete_command(&entry.key, entry.version(), false)?;
        self.stage(command, Bytes::new())
    }

    pub fn delete_forced(&mut self, key: &[u8]) -> Result<()> {
        let command = delete_command(key, &[], true)?;
        self.stage(command, Bytes::new())
    }

    fn stage(&mut self, command: Command, value: Bytes) -> Result<()> {
        if self.finished {
            return Err(KineticError::InvalidBatch(format!(
                "batch {} is already finished",
                self.batch_id
            )));
        }
        self.client.request(command.with_batch(self.batch_id), value)?;
        self.staged += 1;
        Ok(())
    }

    /// Apply every staged operation atomically
    ///
    /// A failed version check on the drive yields a summary with
    /// `committed == false` and nothing applied.
    pub fn commit(mut self) -> Result<BatchSummary> {
        let Response { command, .. } = self.end(false)?;
        let committed = command.status.is_success();
        let outcomes = match command.body {
            Body::BatchSummary(outcomes) => outcomes,
            _ => {
                command.status.into_result(command.header.cluster_version)?;
                Vec::new()
            }
        };

        tracing::debug!(
            "Batch {} {} ({} operations)",
            self.batch_id,
            if committed { "committed" } else { "refused" },
            outcomes.len()
        );
        Ok(BatchSummary {
            batch_id: self.batch_id,
            committed,
            outcomes,
        })
    }

    /// Discard the staged operations
    ///
    /// Always succeeds locally; a drive error is only logged.
    pub fn abort(mut self) {
        self.abort_quietly();
    }

    fn abort_quietly(&mut self) {
        match self.end(true).and_then(|r| r.check()) {
            Ok(_) => tracing::debug!("Batch {} aborted", self.batch_id),
            Err(e) => tracing::warn!("Abort of batch {} failed on the drive: {}", self.batch_id, e),
        }
    }

    fn end(&mut self, abort: bool) -> Result<Response> {
        self.finished = true;

        let end = EndBatch {
            count: self.staged,
            abort,
        };
        let command =
            Command::new(MessageType::EndBatch, Body::EndBatch(end)).with_batch(self.batch_id);
        // The slot stays taken until the drive has closed its side
        let response = self.client.call(command, Bytes::new());
        self.client.batch_finished();
        response
    }
}

impl Drop for BatchOperation<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.client.is_closed() {
            self.abort_quietly();
        }
    }
}
