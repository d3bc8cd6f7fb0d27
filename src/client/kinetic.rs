//! Kinetic client
//!
//! Blocking key-value operations over one multiplexed connection, plus
//! callback-based variants. Arguments are validated before anything is sent.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use bytes::Bytes;

use crate::config::ClientConfig;
use crate::entry::{
    validate_bound, validate_entry, validate_key, validate_version, Entry, EntryMetadata,
};
use crate::error::{KineticError, Result};
use crate::network::{Connector, TcpConnector};
use crate::protocol::{
    Body, Command, KeyRange, KeyValue, MessageType, Peer, PeerToPeerOperation,
    PeerToPeerOutcome, PeerToPeerRequest,
};
use super::batch::BatchOperation;
use super::multiplexer::{CancelHandle, Multiplexer, Response};

/// Upper bound on how long `connect` waits for the drive's open status
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for one drive connection
pub struct KineticClient {
    mux: Multiplexer,
    config: ClientConfig,
    next_batch_id: AtomicU32,
    batch_open: AtomicBool,
}

impl KineticClient {
    /// Connect over cleartext TCP
    pub fn connect(config: ClientConfig) -> Result<Self> {
        Self::connect_with(config, &TcpConnector)
    }

    /// Connect through a caller-supplied connector (e.g. TLS)
    pub fn connect_with(config: ClientConfig, connector: &dyn Connector) -> Result<Self> {
        let stream = connector.connect(&config)?;
        let mux = Multiplexer::start(stream, &config)?;
        mux.await_handshake(HANDSHAKE_TIMEOUT.min(config.request_timeout()))?;

        tracing::info!(
            "Connected to {} as user {} (connection id {})",
            config.address(),
            config.user_id,
            mux.connection_id()
        );

        Ok(Self {
            mux,
            config,
            next_batch_id: AtomicU32::new(1),
            batch_open: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connection_id(&self) -> i64 {
        self.mux.connection_id()
    }

    /// Cluster version last reported by the drive
    pub fn drive_cluster_version(&self) -> i64 {
        self.mux.drive_cluster_version()
    }

    /// Called whenever the drive reports a cluster version different from
    /// the configured one
    pub fn set_cluster_version_listener(&self, listener: impl Fn(i64) + Send + Sync + 'static) {
        self.mux.set_cluster_version_listener(listener);
    }

    // =========================================================================
    // Key-Value Operations
    // =========================================================================

    /// Store `entry`, requiring the drive's current version to equal
    /// `db_version` (`None` expects the key to be absent or unversioned)
    ///
    /// The entry's version becomes the stored version.
    pub fn put(&self, entry: &Entry, db_version: Option<&[u8]>) -> Result<Entry> {
        let command = put_command(entry, db_version, false)?;
        self.request(command, entry.value.clone())?;
        Ok(entry.clone())
    }

    /// Store `entry` regardless of the drive's current version
    pub fn put_forced(&self, entry: &Entry) -> Result<Entry> {
        let command = put_command(entry, None, true)?;
        self.request(command, entry.value.clone())?;
        Ok(entry.clone())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        let command = get_command(MessageType::Get, key, false)?;
        found(self.request(command, Bytes::new())).map(|r| r.map(entry_from))
    }

    /// Version and tag without the value bytes
    pub fn get_metadata(&self, key: &[u8]) -> Result<Option<EntryMetadata>> {
        let command = get_command(MessageType::Get, key, true)?;
        found(self.request(command, Bytes::new())).map(|r| r.map(|r| entry_from(r).metadata))
    }

    pub fn get_version(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let command = get_command(MessageType::GetVersion, key, true)?;
        found(self.request(command, Bytes::new())).map(|r| r.map(|r| entry_from(r).metadata.version))
    }

    /// Delete `entry.key` if its stored version equals `entry`'s version
    ///
    /// An absent key is an error (`NotFound`).
    pub fn delete(&self, entry: &Entry) -> Result<bool> {
        let command = delete_command(&entry.key, entry.version(), false)?;
        self.request(command, Bytes::new())?;
        Ok(true)
    }

    /// Delete `key` whatever its version; `false` when it was absent
    pub fn delete_forced(&self, key: &[u8]) -> Result<bool> {
        let command = delete_command(key, &[], true)?;
        found(self.request(command, Bytes::new())).map(|r| r.is_some())
    }

    /// First entry with a key strictly after `key`
    pub fn get_next(&self, key: &[u8]) -> Result<Option<Entry>> {
        let command = get_command(MessageType::GetNext, key, false)?;
        found(self.request(command, Bytes::new())).map(|r| r.map(entry_from))
    }

    /// Last entry with a key strictly before `key`
    pub fn get_previous(&self, key: &[u8]) -> Result<Option<Entry>> {
        let command = get_command(MessageType::GetPrevious, key, false)?;
        found(self.request(command, Bytes::new())).map(|r| r.map(entry_from))
    }

    /// Keys between `start` and `end`, at most `max_returned` (the drive
    /// caps this at its key range limit)
    pub fn get_key_range(
        &self,
        start: &[u8],
        start_inclusive: bool,
        end: &[u8],
        end_inclusive: bool,
        max_returned: u32,
        reverse: bool,
    ) -> Result<Vec<Vec<u8>>> {
        validate_bound(start)?;
        validate_bound(end)?;

        let range = KeyRange {
            start_key: start.to_vec(),
            start_inclusive,
            end_key: end.to_vec(),
            end_inclusive,
            max_returned,
            reverse,
            keys: Vec::new(),
        };
        let command = Command::new(MessageType::GetKeyRange, Body::Range(range));

        let response = self.request(command, Bytes::new())?;
        match response.command.body {
            Body::Range(range) => Ok(range.keys),
            other => Err(unexpected_body(MessageType::GetKeyRange, &other)),
        }
    }

    /// Round-trip an empty command
    pub fn noop(&self) -> Result<()> {
        self.request(Command::new(MessageType::Noop, Body::Empty), Bytes::new())?;
        Ok(())
    }

    /// Ask the drive to copy entries to `peer`
    pub fn peer_to_peer_push(
        &self,
        peer: Peer,
        operations: Vec<PeerToPeerOperation>,
    ) -> Result<Vec<PeerToPeerOutcome>> {
        for op in &operations {
            validate_key(&op.key)?;
            validate_version(&op.version)?;
            if let Some(new_key) = &op.new_key {
                validate_key(new_key)?;
            }
        }

        let request = PeerToPeerRequest { peer, operations };
        let command = Command::new(MessageType::PeerToPeerPush, Body::PeerToPeer(request));

        let response = self.request(command, Bytes::new())?;
        match response.command.body {
            Body::PeerToPeerResult(outcomes) => Ok(outcomes),
            other => Err(unexpected_body(MessageType::PeerToPeerPush, &other)),
        }
    }

    // =========================================================================
    // Async Operations
    // =========================================================================

    /// `put` with the result delivered to `callback` on the worker pool
    ///
    /// Blocks while `async_queue_size` async requests are outstanding.
    pub fn put_async<F>(&self, entry: &Entry, db_version: Option<&[u8]>, callback: F) -> Result<CancelHandle>
    where
        F: FnOnce(Result<Entry>) + Send + 'static,
    {
        let command = put_command(entry, db_version, false)?;
        let stored = entry.clone();
        self.mux.submit_async(
            command,
            entry.value.clone(),
            Box::new(move |result| callback(result.and_then(Response::check).map(|_| stored))),
        )
    }

    pub fn get_async<F>(&self, key: &[u8], callback: F) -> Result<CancelHandle>
    where
        F: FnOnce(Result<Option<Entry>>) + Send + 'static,
    {
        let command = get_command(MessageType::Get, key, false)?;
        self.mux.submit_async(
            command,
            Bytes::new(),
            Box::new(move |result| {
                callback(found(result.and_then(Response::check)).map(|r| r.map(entry_from)))
            }),
        )
    }

    pub fn delete_async<F>(&self, entry: &Entry, callback: F) -> Result<CancelHandle>
    where
        F: FnOnce(Result<bool>) + Send + 'static,
    {
        let command = delete_command(&entry.key, entry.version(), false)?;
        self.mux.submit_async(
            command,
            Bytes::new(),
            Box::new(move |result| callback(result.and_then(Response::check).map(|_| true))),
        )
    }

    // =========================================================================
    // Batches
    // =========================================================================

    /// Open a batch on the drive
    ///
    /// Only one batch may be open per connection; a second one fails with
    /// `InvalidBatch` without contacting the drive.
    pub fn create_batch_operation(&self) -> Result<BatchOperation<'_>> {
        if self
            .batch_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(KineticError::InvalidBatch(
                "a batch is already open on this connection".to_string(),
            ));
        }

        let batch_id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        let command = Command::new(MessageType::StartBatch, Body::Empty).with_batch(batch_id);
        if let Err(e) = self.request(command, Bytes::new()) {
            self.batch_open.store(false, Ordering::Release);
            return Err(e);
        }

        tracing::debug!("Opened batch {}", batch_id);
        Ok(BatchOperation::new(self, batch_id))
    }

    pub(crate) fn batch_finished(&self) {
        self.batch_open.store(false, Ordering::Release);
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    /// Send a command and turn a non-success status into an error
    pub(crate) fn request(&self, command: Command, value: Bytes) -> Result<Response> {
        self.mux.call(command, value)?.check()
    }

    /// Send a command and hand back the response whatever its status
    pub(crate) fn call(&self, command: Command, value: Bytes) -> Result<Response> {
        self.mux.call(command, value)
    }

    /// Close the connection, failing pending requests
    pub fn close(&self) {
        self.mux.close();
    }

    pub fn is_closed(&self) -> bool {
        self.mux.is_closed()
    }
}

// =============================================================================
// Command Builders
// =============================================================================

pub(crate) fn put_command(entry: &Entry, db_version: Option<&[u8]>, force: bool) -> Result<Command> {
    validate_entry(entry)?;
    let db_version = db_version.unwrap_or_default();
    validate_version(db_version)?;

    let kv = KeyValue {
        key: entry.key.clone(),
        db_version: db_version.to_vec(),
        new_version: entry.metadata.version.clone(),
        tag: entry.metadata.tag.clone(),
        algorithm: entry.metadata.algorithm,
        force,
        metadata_only: false,
    };
    Ok(Command::new(MessageType::Put, Body::KeyValue(kv)))
}

pub(crate) fn delete_command(key: &[u8], db_version: &[u8], force: bool) -> Result<Command> {
    validate_key(key)?;
    validate_version(db_version)?;

    let kv = KeyValue {
        key: key.to_vec(),
        db_version: db_version.to_vec(),
        force,
        ..KeyValue::default()
    };
    Ok(Command::new(MessageType::Delete, Body::KeyValue(kv)))
}

fn get_command(message_type: MessageType, key: &[u8], metadata_only: bool) -> Result<Command> {
    // Iteration may start from the empty key
    match message_type {
        MessageType::GetNext | MessageType::GetPrevious => validate_bound(key)?,
        _ => validate_key(key)?,
    }

    let kv = KeyValue {
        key: key.to_vec(),
        metadata_only,
        ..KeyValue::default()
    };
    Ok(Command::new(message_type, Body::KeyValue(kv)))
}

// =============================================================================
// Response Helpers
// =============================================================================

/// `NotFound` becomes `None`
fn found(result: Result<Response>) -> Result<Option<Response>> {
    match result {
        Ok(response) => Ok(Some(response)),
        Err(KineticError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

fn entry_from(response: Response) -> Entry {
    let kv = match response.command.body {
        Body::KeyValue(kv) => kv,
        _ => KeyValue::default(),
    };
    Entry {
        key: kv.key,
        value: response.value,
        metadata: EntryMetadata {
            version: kv.db_version,
            tag: kv.tag,
            algorithm: kv.algorithm,
        },
    }
}

fn unexpected_body(message_type: MessageType, body: &Body) -> KineticError {
    KineticError::Internal(format!(
        "unexpected response body for {:?}: {:?}",
        message_type, body
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_command_carries_versions() {
        let entry = Entry::new(b"k".to_vec(), Bytes::from_static(b"v")).with_version(b"2".to_vec());
        let command = put_command(&entry, Some(b"1"), false).unwrap();
        match command.body {
            Body::KeyValue(kv) => {
                assert_eq!(kv.db_version, b"1");
                assert_eq!(kv.new_version, b"2");
                assert!(!kv.force);
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_invalid_arguments_rejected_locally() {
        assert!(matches!(
            put_command(&Entry::new(Vec::<u8>::new(), Bytes::new()), None, true),
            Err(KineticError::InvalidRequest(_))
        ));
        assert!(matches!(
            delete_command(b"k", &[0u8; 129], false),
            Err(KineticError::InvalidRequest(_))
        ));
        assert!(get_command(MessageType::GetNext, b"", false).is_ok());
        assert!(get_command(MessageType::Get, b"", false).is_err());
    }

    #[test]
    fn test_not_found_maps_to_none() {
        assert!(found(Err(KineticError::NotFound)).unwrap().is_none());
        assert!(found(Err(KineticError::Timeout)).is_err());
    }
}
