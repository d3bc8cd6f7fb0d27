//! Drive Engine
//!
//! The simulated drive: routes authenticated commands to the store, the
//! batch journal, security and setup handlers, and builds responses.
//!
//! ## Responsibilities
//! - Cluster version gating and device lock
//! - ACL permission checks per operation
//! - Version-checked mutations and capacity accounting
//! - Per-operation counters and the drive log

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};

use crate::client::KineticClient;
use crate::config::{ClientConfig, SimulatorConfig, PROTOCOL_SOURCE_HASH, PROTOCOL_VERSION};
use crate::entry::{
    validate_bound, validate_key, validate_value, validate_version, Entry, EntryMetadata,
    MAX_KEY_SIZE, MAX_TAG_SIZE, MAX_VALUE_SIZE, MAX_VERSION_SIZE,
};
use crate::error::{KineticError, Result};
use crate::protocol::{
    Acl, BatchOpKind, Body, Capacity, Command, Configuration, DriveLog, EndBatch, KeyRange,
    KeyValue, Limits, LogType, MessageType, OpKind, Permission, PeerToPeerOutcome,
    PeerToPeerRequest, SecurityOp, Setup, Status, StatusCode, Temperature, Utilization,
    MAX_MESSAGE_SIZE,
};
use crate::storage::{KvStore, RangeQuery};
use super::batch::BatchJournal;
use super::counter::OperationCounter;
use super::security::{Security, MAX_IDENTITY_COUNT};

/// Keys returned by one GETKEYRANGE at most
pub const MAX_KEY_RANGE_COUNT: u32 = 1024;

/// Drive log messages kept
const MAX_EVENTS: usize = 100;

/// Advertised per-connection request limits
const MAX_OUTSTANDING_READ_REQUESTS: u32 = 20;
const MAX_OUTSTANDING_WRITE_REQUESTS: u32 = 20;

/// Per-connection state
#[derive(Debug)]
pub struct Session {
    pub connection_id: i64,
    batch: Option<BatchJournal>,
}

impl Session {
    pub fn batch(&self) -> Option<&BatchJournal> {
        self.batch.as_ref()
    }
}

/// A response before sealing
struct Reply {
    body: Body,
    value: Bytes,
    status: Status,
}

impl Reply {
    fn empty() -> Self {
        Self::body(Body::Empty)
    }

    fn body(body: Body) -> Self {
        Self {
            body,
            value: Bytes::new(),
            status: Status::success(),
        }
    }
}

#[derive(Debug, Clone)]
struct Firmware {
    bytes: u64,
    digest: Vec<u8>,
}

/// The simulated drive
///
/// ## Concurrency Model
/// - Reads go straight to the store (internal RwLock)
/// - Every mutation, and each batch commit as a whole, runs under
///   `write_lock`, so a version check and its write cannot interleave with
///   another connection's
pub struct Drive {
    config: SimulatorConfig,

    /// Port reported in the CONFIGURATION log
    port: u16,

    store: Box<dyn KvStore>,

    security: RwLock<Security>,

    cluster_version: AtomicI64,

    locked: AtomicBool,

    counter: OperationCounter,

    /// Serializes mutations
    write_lock: Mutex<()>,

    next_connection_id: AtomicI64,

    firmware: Mutex<Option<Firmware>>,

    /// Recent events for the MESSAGES log
    events: Mutex<VecDeque<String>>,
}

impl Drive {
    pub fn new(config: SimulatorConfig, store: Box<dyn KvStore>, port: u16) -> Result<Self> {
        let security = Security::new(config.acls.clone())?;
        let cluster_version = config.cluster_version;

        let drive = Self {
            config,
            port,
            store,
            security: RwLock::new(security),
            cluster_version: AtomicI64::new(cluster_version),
            locked: AtomicBool::new(false),
            counter: OperationCounter::new(),
            write_lock: Mutex::new(()),
            next_connection_id: AtomicI64::new(1),
            firmware: Mutex::new(None),
            events: Mutex::new(VecDeque::new()),
        };
        drive.record(format!("drive started (cluster version {})", cluster_version));
        Ok(drive)
    }

    /// Fresh per-connection state with a drive-assigned connection id
    pub fn open_session(&self) -> Session {
        Session {
            connection_id: self.next_connection_id.fetch_add(1, Ordering::Relaxed),
            batch: None,
        }
    }

    pub fn acl(&self, identity: i64) -> Option<Acl> {
        self.security.read().acl(identity).cloned()
    }

    pub fn cluster_version(&self) -> i64 {
        self.cluster_version.load(Ordering::Acquire)
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn counter(&self) -> &OperationCounter {
        &self.counter
    }

    pub fn store(&self) -> &dyn KvStore {
        self.store.as_ref()
    }

    // =========================================================================
    // Request Routing
    // =========================================================================

    /// Execute one authenticated command; always produces a response
    pub fn execute(
        &self,
        session: &mut Session,
        acl: &Acl,
        command: Command,
        value: Bytes,
    ) -> (Command, Bytes) {
        let mut response = Command::response_to(&command.header, self.cluster_version());

        let reply = match self.route(session, acl, command, value) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!("Request failed: {}", e);
                Reply {
                    body: Body::Empty,
                    value: Bytes::new(),
                    status: Status::from_error(&e),
                }
            }
        };

        response.body = reply.body;
        response.status = reply.status;
        (response, reply.value)
    }

    fn route(&self, session: &mut Session, acl: &Acl, command: Command, value: Bytes) -> Result<Reply> {
        let Command { header, body, .. } = command;
        let message_type = header.message_type;

        // Step 1: Cluster version gate
        let drive_version = self.cluster_version();
        if header.cluster_version != drive_version {
            return Err(KineticError::ClusterVersionFailure { drive_version });
        }

        // Step 2: Device lock
        if self.is_locked() && !allowed_while_locked(message_type, &body) {
            return Err(KineticError::DeviceLocked);
        }

        // Step 3: Count
        if let Some(op) = OpKind::of(message_type) {
            self.counter.increment(op);
        }

        // Step 4: Dispatch
        match (message_type, body) {
            (MessageType::Get, Body::KeyValue(kv)) => self.get(acl, kv),
            (MessageType::GetVersion, Body::KeyValue(kv)) => self.get_version(acl, kv),
            (MessageType::GetNext, Body::KeyValue(kv)) => self.neighbor(acl, kv, true),
            (MessageType::GetPrevious, Body::KeyValue(kv)) => self.neighbor(acl, kv, false),
            (MessageType::GetKeyRange, Body::Range(range)) => self.key_range(acl, range),
            (MessageType::Put, Body::KeyValue(kv)) => match header.batch_id {
                Some(batch_id) => self.stage(session, acl, batch_id, BatchOpKind::Put, kv, value),
                None => self.put(acl, kv, value),
            },
            (MessageType::Delete, Body::KeyValue(kv)) => match header.batch_id {
                Some(batch_id) => self.stage(session, acl, batch_id, BatchOpKind::Delete, kv, value),
                None => self.delete(acl, kv),
            },
            (MessageType::StartBatch, Body::Empty) => self.start_batch(session, acl, header.batch_id),
            (MessageType::EndBatch, Body::EndBatch(end)) => self.end_batch(session, header.batch_id, end),
            (MessageType::Setup, Body::Setup(setup)) => self.setup(acl, setup, value),
            (MessageType::GetLog, Body::GetLog(types)) => self.get_log(acl, &types),
            (MessageType::Security, Body::Security(op)) => self.security(acl, op),
            (MessageType::PeerToPeerPush, Body::PeerToPeer(request)) => self.peer_to_peer(acl, request),
            (MessageType::Noop, _) => Ok(Reply::empty()),
            (message_type, _) => Err(KineticError::InvalidRequest(format!(
                "unsupported request {:?}",
                message_type
            ))),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    fn get(&self, acl: &Acl, kv: KeyValue) -> Result<Reply> {
        validate_key(&kv.key)?;
        require(acl, Permission::Read, Some(&kv.key))?;

        let entry = self.store.get(&kv.key)?.ok_or(KineticError::NotFound)?;
        Ok(entry_reply(entry, kv.metadata_only))
    }

    fn get_version(&self, acl: &Acl, kv: KeyValue) -> Result<Reply> {
        validate_key(&kv.key)?;
        require(acl, Permission::Read, Some(&kv.key))?;

        let entry = self.store.get(&kv.key)?.ok_or(KineticError::NotFound)?;
        Ok(entry_reply(entry, true))
    }

    fn neighbor(&self, acl: &Acl, kv: KeyValue, next: bool) -> Result<Reply> {
        validate_bound(&kv.key)?;

        let entry = if next {
            self.store.get_next(&kv.key)?
        } else {
            self.store.get_previous(&kv.key)?
        };
        let entry = entry.ok_or(KineticError::NotFound)?;
        require(acl, Permission::Read, Some(&entry.key))?;

        Ok(entry_reply(entry, kv.metadata_only))
    }

    fn key_range(&self, acl: &Acl, mut range: KeyRange) -> Result<Reply> {
        validate_bound(&range.start_key)?;
        validate_bound(&range.end_key)?;
        require(acl, Permission::Range, None)?;

        let query = RangeQuery {
            start: &range.start_key,
            start_inclusive: range.start_inclusive,
            end: &range.end_key,
            end_inclusive: range.end_inclusive,
            max: range.max_returned.min(MAX_KEY_RANGE_COUNT) as usize,
            reverse: range.reverse,
        };
        let mut keys = self.store.range(&query)?;
        keys.retain(|key| acl.permits(Permission::Range, Some(key)));

        range.keys = keys;
        Ok(Reply::body(Body::Range(range)))
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    fn put(&self, acl: &Acl, kv: KeyValue, value: Bytes) -> Result<Reply> {
        validate_put(&kv, &value)?;
        require(acl, Permission::Write, Some(&kv.key))?;

        let _write_guard = self.write_lock.lock();

        let existing = self.store.get(&kv.key)?;
        if !kv.force {
            let current = existing.as_ref().map(|e| e.version()).unwrap_or_default();
            if current != kv.db_version.as_slice() {
                return Err(KineticError::VersionMismatch);
            }
        }

        let entry = Entry {
            key: kv.key,
            value,
            metadata: EntryMetadata {
                version: kv.new_version,
                tag: kv.tag,
                algorithm: kv.algorithm,
            },
        };

        let freed = existing.as_ref().map(footprint).unwrap_or(0);
        let projected = self.store.size_bytes().saturating_sub(freed) + footprint(&entry);
        if projected > self.config.capacity_bytes {
            return Err(KineticError::NoSpace);
        }

        self.store.put(entry)?;
        Ok(Reply::empty())
    }

    fn delete(&self, acl: &Acl, kv: KeyValue) -> Result<Reply> {
        validate_key(&kv.key)?;
        validate_version(&kv.db_version)?;
        require(acl, Permission::Delete, Some(&kv.key))?;

        let _write_guard = self.write_lock.lock();

        let existing = self.store.get(&kv.key)?.ok_or(KineticError::NotFound)?;
        if !kv.force && existing.version() != kv.db_version.as_slice() {
            return Err(KineticError::VersionMismatch);
        }

        self.store.delete(&kv.key)?;
        Ok(Reply::empty())
    }

    // =========================================================================
    // Batches
    // =========================================================================

    fn start_batch(&self, session: &mut Session, acl: &Acl, batch_id: Option<u32>) -> Result<Reply> {
        let batch_id = batch_id
            .ok_or_else(|| KineticError::InvalidRequest("START_BATCH without a batch id".to_string()))?;
        if !acl.permits(Permission::Write, None) && !acl.permits(Permission::Delete, None) {
            return Err(KineticError::NotAuthorized("batch requires WRITE or DELETE".to_string()));
        }

        if let Some(open) = &session.batch {
            return Err(KineticError::InvalidBatch(format!(
                "batch {} is already open on this connection",
                open.batch_id()
            )));
        }

        session.batch = Some(BatchJournal::open(batch_id, self.config.max_batch_operations));
        tracing::debug!("Connection {} opened batch {}", session.connection_id, batch_id);
        Ok(Reply::empty())
    }

    fn stage(
        &self,
        session: &mut Session,
        acl: &Acl,
        batch_id: u32,
        kind: BatchOpKind,
        kv: KeyValue,
        value: Bytes,
    ) -> Result<Reply> {
        match kind {
            BatchOpKind::Put => {
                validate_put(&kv, &value)?;
                require(acl, Permission::Write, Some(&kv.key))?;
            }
            BatchOpKind::Delete => {
                validate_key(&kv.key)?;
                validate_version(&kv.db_version)?;
                require(acl, Permission::Delete, Some(&kv.key))?;
            }
        }

        let journal = open_batch(session, batch_id)?;
        journal.stage(kind, kv, value)?;
        Ok(Reply::empty())
    }

    fn end_batch(&self, session: &mut Session, batch_id: Option<u32>, end: EndBatch) -> Result<Reply> {
        let batch_id = batch_id
            .ok_or_else(|| KineticError::InvalidRequest("END_BATCH without a batch id".to_string()))?;
        open_batch(session, batch_id)?;

        // The batch ends here whatever happens next
        let mut journal = session
            .batch
            .take()
            .ok_or_else(|| KineticError::InvalidBatch(format!("batch {} is not open", batch_id)))?;

        if end.abort {
            journal.abort();
            tracing::debug!("Connection {} aborted batch {}", session.connection_id, batch_id);
            return Ok(Reply::empty());
        }

        if end.count as usize != journal.len() {
            journal.abort();
            return Err(KineticError::InvalidBatch(format!(
                "client staged {} operations, drive received {}",
                end.count,
                journal.len()
            )));
        }

        let report = {
            let _write_guard = self.write_lock.lock();
            journal.commit(self.store.as_ref(), self.config.capacity_bytes)?
        };

        let status = match &report.failure {
            None => Status::success(),
            Some(KineticError::Internal(msg)) => Status::new(StatusCode::InternalError, msg.clone()),
            Some(e) => Status::new(StatusCode::InvalidBatch, e.to_string()),
        };
        tracing::debug!("Batch {} finished: {:?}", batch_id, status.code);

        Ok(Reply {
            body: Body::BatchSummary(report.outcomes),
            value: Bytes::new(),
            status,
        })
    }

    // =========================================================================
    // Setup / Security
    // =========================================================================

    fn setup(&self, acl: &Acl, setup: Setup, image: Bytes) -> Result<Reply> {
        require(acl, Permission::Setup, None)?;

        if setup.firmware_download {
            self.security.read().check_erase_pin(&setup.pin)?;
            let firmware = Firmware {
                bytes: image.len() as u64,
                digest: Sha256::digest(&image).to_vec(),
            };
            tracing::info!("Firmware image received ({} bytes)", firmware.bytes);
            self.record(format!("firmware downloaded ({} bytes)", firmware.bytes));
            *self.firmware.lock() = Some(firmware);
        }

        if let Some(new_version) = setup.new_cluster_version {
            let old = self.cluster_version.swap(new_version, Ordering::AcqRel);
            tracing::info!("Cluster version changed from {} to {}", old, new_version);
            self.record(format!("cluster version set to {}", new_version));
        }

        Ok(Reply::empty())
    }

    fn security(&self, acl: &Acl, op: SecurityOp) -> Result<Reply> {
        require(acl, Permission::Security, None)?;

        match op {
            SecurityOp::SetAcl(acls) => {
                let count = acls.len();
                self.security.write().set_acls(acls)?;
                self.record(format!("ACL table replaced ({} identities)", count));
            }
            SecurityOp::SetErasePin { old_pin, new_pin } => {
                self.security.write().set_erase_pin(&old_pin, &new_pin)?;
                self.record("erase PIN changed".to_string());
            }
            SecurityOp::SetLockPin { old_pin, new_pin } => {
                self.security.write().set_lock_pin(&old_pin, &new_pin)?;
                self.record("lock PIN changed".to_string());
            }
            SecurityOp::InstantErase { pin } | SecurityOp::SecureErase { pin } => {
                self.erase(&pin)?;
            }
            SecurityOp::Lock { pin } => {
                let security = self.security.read();
                if !security.has_lock_pin() {
                    return Err(KineticError::InvalidRequest("no lock PIN is set".to_string()));
                }
                security.check_lock_pin(&pin)?;
                self.locked.store(true, Ordering::Release);
                self.record("device locked".to_string());
            }
            SecurityOp::Unlock { pin } => {
                self.security.read().check_lock_pin(&pin)?;
                self.locked.store(false, Ordering::Release);
                self.record("device unlocked".to_string());
            }
        }

        Ok(Reply::empty())
    }

    fn erase(&self, pin: &[u8]) -> Result<()> {
        let mut security = self.security.write();
        security.check_erase_pin(pin)?;

        let _write_guard = self.write_lock.lock();
        self.store.clear()?;
        security.reset_pins();
        self.locked.store(false, Ordering::Release);

        tracing::info!("Drive erased");
        self.record("drive erased".to_string());
        Ok(())
    }

    // =========================================================================
    // Peer-to-peer
    // =========================================================================

    fn peer_to_peer(&self, acl: &Acl, request: PeerToPeerRequest) -> Result<Reply> {
        require(acl, Permission::P2pOp, None)?;
        for op in &request.operations {
            validate_key(&op.key)?;
            require(acl, Permission::Read, Some(&op.key))?;
        }

        let peer = &request.peer;
        let config = ClientConfig::builder()
            .host(peer.host.clone())
            .port(peer.port)
            .use_ssl(peer.tls)
            .user_id(self.config.p2p_user_id)
            .hmac_key(self.config.p2p_hmac_key.clone())
            .connect_timeout_ms(self.config.p2p_timeout_ms)
            .request_timeout_ms(self.config.p2p_timeout_ms as i64)
            .nio_service_threads(1)
            .build();

        let client = KineticClient::connect(config).map_err(|e| {
            KineticError::RemoteConnection(format!("{}:{}: {}", peer.host, peer.port, e))
        })?;

        let mut outcomes = Vec::with_capacity(request.operations.len());
        for op in request.operations {
            let status = match self.store.get(&op.key)? {
                None => Status::new(StatusCode::NotFound, "no local entry"),
                Some(local) => {
                    let mut entry = local;
                    if let Some(new_key) = op.new_key {
                        entry.key = new_key;
                    }
                    let result = if op.force {
                        client.put_forced(&entry)
                    } else {
                        client.put(&entry, Some(&op.version))
                    };
                    match result {
                        Ok(_) => Status::success(),
                        Err(e) => Status::from_error(&e),
                    }
                }
            };
            outcomes.push(PeerToPeerOutcome { key: op.key, status });
        }
        client.close();

        Ok(Reply::body(Body::PeerToPeerResult(outcomes)))
    }

    // =========================================================================
    // Drive Log
    // =========================================================================

    fn get_log(&self, acl: &Acl, types: &[LogType]) -> Result<Reply> {
        require(acl, Permission::GetLog, None)?;
        if types.is_empty() {
            return Err(KineticError::InvalidRequest("no log types requested".to_string()));
        }
        Ok(Reply::body(Body::Log(self.log(types))))
    }

    /// Build the requested log sections
    pub fn log(&self, types: &[LogType]) -> DriveLog {
        let mut log = DriveLog {
            types: types.to_vec(),
            ..DriveLog::default()
        };

        let used = self.store.size_bytes();
        let portion_full = if self.config.capacity_bytes == 0 {
            1.0
        } else {
            (used as f64 / self.config.capacity_bytes as f64) as f32
        };

        for log_type in types {
            match log_type {
                LogType::Utilizations => {
                    log.utilizations = vec![
                        Utilization { name: "HDA".to_string(), value: portion_full },
                        Utilization { name: "EN0".to_string(), value: 0.0 },
                        Utilization { name: "EN1".to_string(), value: 0.0 },
                        Utilization { name: "CPU".to_string(), value: 0.0 },
                    ];
                }
                LogType::Temperatures => {
                    log.temperatures = vec![
                        temperature("HDA", 25.0),
                        temperature("CPU", 35.0),
                    ];
                }
                LogType::Capacities => {
                    log.capacity = Some(Capacity {
                        nominal_capacity_bytes: self.config.capacity_bytes,
                        portion_full,
                    });
                }
                LogType::Configuration => {
                    let firmware = self.firmware.lock().clone();
                    log.configuration = Some(Configuration {
                        vendor: self.config.vendor.clone(),
                        model: self.config.model.clone(),
                        serial_number: self.config.serial_number.clone(),
                        version: crate::VERSION.to_string(),
                        protocol_version: PROTOCOL_VERSION.to_string(),
                        protocol_source_hash: PROTOCOL_SOURCE_HASH.to_string(),
                        port: self.port,
                        tls_port: self.config.tls_port,
                        firmware_bytes: firmware.as_ref().map(|f| f.bytes),
                        firmware_digest: firmware.map(|f| f.digest),
                    });
                }
                LogType::Statistics => log.statistics = self.counter.snapshot(),
                LogType::Messages => log.messages = self.events.lock().iter().cloned().collect(),
                LogType::Limits => log.limits = Some(self.limits()),
            }
        }

        log
    }

    fn limits(&self) -> Limits {
        Limits {
            max_key_size: MAX_KEY_SIZE as u32,
            max_value_size: MAX_VALUE_SIZE as u32,
            max_version_size: MAX_VERSION_SIZE as u32,
            max_tag_size: MAX_TAG_SIZE as u32,
            max_connections: self.config.max_connections as u32,
            max_outstanding_read_requests: MAX_OUTSTANDING_READ_REQUESTS,
            max_outstanding_write_requests: MAX_OUTSTANDING_WRITE_REQUESTS,
            max_message_size: MAX_MESSAGE_SIZE as u32,
            max_key_range_count: MAX_KEY_RANGE_COUNT,
            max_identity_count: MAX_IDENTITY_COUNT as u32,
            max_batch_operations: self.config.max_batch_operations as u32,
        }
    }

    fn record(&self, event: String) {
        let mut events = self.events.lock();
        if events.len() == MAX_EVENTS {
            events.pop_front();
        }
        events.push_back(event);
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn allowed_while_locked(message_type: MessageType, body: &Body) -> bool {
    match message_type {
        MessageType::GetLog => true,
        MessageType::Security => matches!(body, Body::Security(SecurityOp::Unlock { .. })),
        _ => false,
    }
}

fn require(acl: &Acl, permission: Permission, key: Option<&[u8]>) -> Result<()> {
    if acl.permits(permission, key) {
        Ok(())
    } else {
        Err(KineticError::NotAuthorized(format!(
            "identity {} lacks {:?}",
            acl.identity, permission
        )))
    }
}

fn open_batch(session: &mut Session, batch_id: u32) -> Result<&mut BatchJournal> {
    match session.batch.as_mut() {
        Some(journal) if journal.batch_id() == batch_id => Ok(journal),
        Some(journal) => Err(KineticError::InvalidBatch(format!(
            "batch {} is open, not {}",
            journal.batch_id(),
            batch_id
        ))),
        None => Err(KineticError::InvalidBatch(format!("batch {} is not open", batch_id))),
    }
}

fn validate_put(kv: &KeyValue, value: &[u8]) -> Result<()> {
    validate_key(&kv.key)?;
    validate_value(value)?;
    validate_version(&kv.db_version)?;
    validate_version(&kv.new_version)?;
    if kv.tag.len() > MAX_TAG_SIZE {
        return Err(KineticError::InvalidRequest(format!(
            "tag length {} exceeds {}",
            kv.tag.len(),
            MAX_TAG_SIZE
        )));
    }
    Ok(())
}

fn entry_reply(entry: Entry, metadata_only: bool) -> Reply {
    let kv = KeyValue {
        key: entry.key,
        db_version: entry.metadata.version,
        tag: entry.metadata.tag,
        algorithm: entry.metadata.algorithm,
        metadata_only,
        ..KeyValue::default()
    };
    Reply {
        body: Body::KeyValue(kv),
        value: if metadata_only { Bytes::new() } else { entry.value },
        status: Status::success(),
    }
}

fn footprint(entry: &Entry) -> u64 {
    (entry.key.len() + entry.value.len() + entry.metadata.version.len() + entry.metadata.tag.len())
        as u64
}

fn temperature(name: &str, current: f32) -> Temperature {
    Temperature {
        name: name.to_string(),
        current,
        minimum: 5.0,
        maximum: 100.0,
        target: 25.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_acl;
    use crate::protocol::Scope;
    use crate::storage::MemoryStore;

    fn drive() -> Drive {
        Drive::new(SimulatorConfig::default(), Box::new(MemoryStore::new()), 8123).unwrap()
    }

    fn run(drive: &Drive, session: &mut Session, acl: &Acl, command: Command, value: &[u8]) -> Command {
        drive.execute(session, acl, command, Bytes::copy_from_slice(value)).0
    }

    fn request(message_type: MessageType, body: Body) -> Command {
        Command::new(message_type, body)
    }

    fn put_kv(key: &[u8], db_version: &[u8], new_version: &[u8]) -> Body {
        Body::KeyValue(KeyValue {
            key: key.to_vec(),
            db_version: db_version.to_vec(),
            new_version: new_version.to_vec(),
            ..KeyValue::default()
        })
    }

    #[test]
    fn test_version_checked_put() {
        let drive = drive();
        let mut session = drive.open_session();
        let acl = default_acl();

        let put = request(MessageType::Put, put_kv(b"k", b"", b"1"));
        let response = run(&drive, &mut session, &acl, put, b"v1");
        assert!(response.status.is_success());

        let put = request(MessageType::Put, put_kv(b"k", b"9", b"2"));
        let response = run(&drive, &mut session, &acl, put, b"v2");
        assert_eq!(response.status.code, StatusCode::VersionMismatch);
        assert_eq!(response.header.message_type, MessageType::PutResponse);

        let entry = drive.store().get(b"k").unwrap().unwrap();
        assert_eq!(entry.value.as_ref(), b"v1");
    }

    #[test]
    fn test_cluster_version_gate() {
        let config = SimulatorConfig::builder().cluster_version(5).build();
        let drive = Drive::new(config, Box::new(MemoryStore::new()), 8123).unwrap();
        let mut session = drive.open_session();

        let noop = request(MessageType::Noop, Body::Empty);
        let response = run(&drive, &mut session, &default_acl(), noop, b"");
        assert_eq!(response.status.code, StatusCode::VersionFailure);
        assert_eq!(response.header.cluster_version, 5);
    }

    #[test]
    fn test_scoped_acl_denies_other_prefix() {
        let drive = drive();
        let mut session = drive.open_session();
        let acl = Acl {
            identity: 2,
            key: b"key".to_vec(),
            scopes: vec![Scope {
                offset: 0,
                value: b"mine/".to_vec(),
                permissions: vec![Permission::Write],
                tls_required: false,
            }],
        };

        let put = request(MessageType::Put, put_kv(b"mine/a", b"", b""));
        let ok = run(&drive, &mut session, &acl, put, b"");
        assert!(ok.status.is_success());

        let put = request(MessageType::Put, put_kv(b"theirs/a", b"", b""));
        let denied = run(&drive, &mut session, &acl, put, b"");
        assert_eq!(denied.status.code, StatusCode::NotAuthorized);
    }

    #[test]
    fn test_capacity_limit() {
        let config = SimulatorConfig::builder().capacity_bytes(16).build();
        let drive = Drive::new(config, Box::new(MemoryStore::new()), 8123).unwrap();
        let mut session = drive.open_session();

        let put = request(MessageType::Put, put_kv(b"k", b"", b""));
        let response = run(&drive, &mut session, &default_acl(), put, &[0u8; 64]);
        assert_eq!(response.status.code, StatusCode::NoSpace);
    }

    #[test]
    fn test_statistics_count_requests() {
        let drive = drive();
        let mut session = drive.open_session();
        let acl = default_acl();

        for _ in 0..3 {
            let get = request(MessageType::Get, put_kv(b"missing", b"", b""));
            run(&drive, &mut session, &acl, get, b"");
        }

        let log = drive.log(&[LogType::Statistics, LogType::Limits]);
        assert_eq!(log.counter(OpKind::Get), 3);
        assert_eq!(log.limits.unwrap().max_key_range_count, MAX_KEY_RANGE_COUNT);
    }
}
