//! Command definitions
//!
//! The schema-encoded message carried in the command part of every frame:
//! a [`Header`] (routing and identity stamps), a [`Body`] (per-operation
//! fields) and a [`Status`] (meaningful on responses only).

use serde::{Deserialize, Serialize};

use crate::entry::Algorithm;
use super::log::{DriveLog, LogType};
use super::Status;

/// Message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Get,
    GetResponse,
    Put,
    PutResponse,
    Delete,
    DeleteResponse,
    GetNext,
    GetNextResponse,
    GetPrevious,
    GetPreviousResponse,
    GetKeyRange,
    GetKeyRangeResponse,
    GetVersion,
    GetVersionResponse,
    Setup,
    SetupResponse,
    GetLog,
    GetLogResponse,
    Security,
    SecurityResponse,
    PeerToPeerPush,
    PeerToPeerPushResponse,
    StartBatch,
    StartBatchResponse,
    EndBatch,
    EndBatchResponse,
    Noop,
    NoopResponse,
    /// Drive-initiated status (connection open, refusal)
    UnsolicitedStatus,
}

impl MessageType {
    /// The response counterpart of a request type
    pub fn response_type(self) -> MessageType {
        use MessageType::*;
        match self {
            Get => GetResponse,
            Put => PutResponse,
            Delete => DeleteResponse,
            GetNext => GetNextResponse,
            GetPrevious => GetPreviousResponse,
            GetKeyRange => GetKeyRangeResponse,
            GetVersion => GetVersionResponse,
            Setup => SetupResponse,
            GetLog => GetLogResponse,
            Security => SecurityResponse,
            PeerToPeerPush => PeerToPeerPushResponse,
            StartBatch => StartBatchResponse,
            EndBatch => EndBatchResponse,
            Noop => NoopResponse,
            other => other,
        }
    }
}

/// Operation kinds tracked by the drive's per-operation counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpKind {
    Get,
    Put,
    Delete,
    GetNext,
    GetPrevious,
    GetKeyRange,
    GetVersion,
    Setup,
    GetLog,
    Security,
    PeerToPeerPush,
}

impl OpKind {
    pub const ALL: [OpKind; 11] = [
        OpKind::Get,
        OpKind::Put,
        OpKind::Delete,
        OpKind::GetNext,
        OpKind::GetPrevious,
        OpKind::GetKeyRange,
        OpKind::GetVersion,
        OpKind::Setup,
        OpKind::GetLog,
        OpKind::Security,
        OpKind::PeerToPeerPush,
    ];

    /// Counter a request type is charged to, if any
    pub fn of(message_type: MessageType) -> Option<OpKind> {
        match message_type {
            MessageType::Get => Some(OpKind::Get),
            MessageType::Put => Some(OpKind::Put),
            MessageType::Delete => Some(OpKind::Delete),
            MessageType::GetNext => Some(OpKind::GetNext),
            MessageType::GetPrevious => Some(OpKind::GetPrevious),
            MessageType::GetKeyRange => Some(OpKind::GetKeyRange),
            MessageType::GetVersion => Some(OpKind::GetVersion),
            MessageType::Setup => Some(OpKind::Setup),
            MessageType::GetLog => Some(OpKind::GetLog),
            MessageType::Security => Some(OpKind::Security),
            MessageType::PeerToPeerPush => Some(OpKind::PeerToPeerPush),
            _ => None,
        }
    }
}

// =============================================================================
// Header / Command
// =============================================================================

/// Routing and identity stamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub cluster_version: i64,
    pub connection_id: i64,
    pub sequence: u64,
    /// Sequence of the request a response answers
    pub ack_sequence: Option<u64>,
    pub message_type: MessageType,
    pub timeout_ms: u64,
    /// Set on START_BATCH, staged operations and END_BATCH
    pub batch_id: Option<u32>,
}

impl Header {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            cluster_version: 0,
            connection_id: 0,
            sequence: 0,
            ack_sequence: None,
            message_type,
            timeout_ms: 0,
            batch_id: None,
        }
    }
}

/// A complete command message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub header: Header,
    pub body: Body,
    pub status: Status,
}

impl Command {
    pub fn new(message_type: MessageType, body: Body) -> Self {
        Self {
            header: Header::new(message_type),
            body,
            status: Status::success(),
        }
    }

    /// Response skeleton acknowledging `request`
    pub fn response_to(request: &Header, cluster_version: i64) -> Self {
        let mut header = Header::new(request.message_type.response_type());
        header.ack_sequence = Some(request.sequence);
        header.connection_id = request.connection_id;
        header.cluster_version = cluster_version;
        header.batch_id = request.batch_id;
        Self {
            header,
            body: Body::Empty,
            status: Status::success(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.header.message_type
    }

    pub fn with_batch(mut self, batch_id: u32) -> Self {
        self.header.batch_id = Some(batch_id);
        self
    }
}

// =============================================================================
// Bodies
// =============================================================================

/// Per-operation fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Body {
    Empty,
    KeyValue(KeyValue),
    Range(KeyRange),
    Setup(Setup),
    GetLog(Vec<LogType>),
    Log(DriveLog),
    Security(SecurityOp),
    PeerToPeer(PeerToPeerRequest),
    PeerToPeerResult(Vec<PeerToPeerOutcome>),
    EndBatch(EndBatch),
    BatchSummary(Vec<BatchOpOutcome>),
}

/// Fields of GET/PUT/DELETE/GETNEXT/GETPREVIOUS/GETVERSION and their responses
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: Vec<u8>,
    /// Version expected on the drive (requests) or stored (responses)
    pub db_version: Vec<u8>,
    /// Version stamped by a PUT
    pub new_version: Vec<u8>,
    pub tag: Vec<u8>,
    pub algorithm: Option<Algorithm>,
    /// Skip the `db_version` precondition
    pub force: bool,
    /// GET without value bytes
    pub metadata_only: bool,
}

/// GETKEYRANGE request and response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyRange {
    pub start_key: Vec<u8>,
    pub start_inclusive: bool,
    pub end_key: Vec<u8>,
    pub end_inclusive: bool,
    pub max_returned: u32,
    pub reverse: bool,
    /// Filled in by the drive
    pub keys: Vec<Vec<u8>>,
}

/// SETUP request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Setup {
    pub new_cluster_version: Option<i64>,
    /// The frame value carries the firmware image
    pub firmware_download: bool,
    pub pin: Vec<u8>,
}

/// SECURITY request variants; an empty PIN stands for "no PIN"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SecurityOp {
    SetAcl(Vec<Acl>),
    SetErasePin { old_pin: Vec<u8>, new_pin: Vec<u8> },
    SetLockPin { old_pin: Vec<u8>, new_pin: Vec<u8> },
    InstantErase { pin: Vec<u8> },
    SecureErase { pin: Vec<u8> },
    Lock { pin: Vec<u8> },
    Unlock { pin: Vec<u8> },
}

/// END_BATCH request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndBatch {
    /// Operations the client staged
    pub count: u32,
    pub abort: bool,
}

/// Staged operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOpKind {
    Put,
    Delete,
}

/// Per-operation result of a committed or refused batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOpOutcome {
    pub index: u32,
    pub kind: BatchOpKind,
    pub key: Vec<u8>,
    pub status: Status,
}

// =============================================================================
// Peer-to-peer
// =============================================================================

/// Address of a peer drive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// One key pushed to a peer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerToPeerOperation {
    pub key: Vec<u8>,
    /// Version expected on the peer
    pub version: Vec<u8>,
    /// Store under a different key on the peer
    pub new_key: Option<Vec<u8>>,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerToPeerRequest {
    pub peer: Peer,
    pub operations: Vec<PeerToPeerOperation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerToPeerOutcome {
    pub key: Vec<u8>,
    pub status: Status,
}

// =============================================================================
// Access Control
// =============================================================================

/// Operation classes an ACL scope can grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    Read,
    Write,
    Delete,
    Range,
    Setup,
    P2pOp,
    GetLog,
    Security,
}

impl Permission {
    pub const ALL: [Permission; 8] = [
        Permission::Read,
        Permission::Write,
        Permission::Delete,
        Permission::Range,
        Permission::Setup,
        Permission::P2pOp,
        Permission::GetLog,
        Permission::Security,
    ];
}

/// Permissions over keys whose bytes at `offset` start with `value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    pub offset: usize,
    pub value: Vec<u8>,
    pub permissions: Vec<Permission>,
    pub tls_required: bool,
}

impl Scope {
    /// Scope covering every key
    pub fn all(permissions: Vec<Permission>) -> Self {
        Self {
            offset: 0,
            value: Vec::new(),
            permissions,
            tls_required: false,
        }
    }

    pub fn matches(&self, key: &[u8]) -> bool {
        if self.value.is_empty() {
            return true;
        }
        key.len() >= self.offset + self.value.len()
            && key[self.offset..self.offset + self.value.len()] == self.value[..]
    }
}

/// Identity, key and scopes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acl {
    pub identity: i64,
    pub key: Vec<u8>,
    pub scopes: Vec<Scope>,
}

impl Acl {
    /// Whether some scope grants `permission`; `key` narrows to scopes
    /// matching that key
    pub fn permits(&self, permission: Permission, key: Option<&[u8]>) -> bool {
        self.scopes.iter().any(|scope| {
            scope.permissions.contains(&permission) && key.map_or(true, |k| scope.matches(k))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_prefix() {
        let scope = Scope {
            offset: 1,
            value: b"ab".to_vec(),
            permissions: vec![Permission::Read],
            tls_required: false,
        };
        assert!(scope.matches(b"xabc"));
        assert!(!scope.matches(b"abc"));
        assert!(!scope.matches(b"xa"));
    }

    #[test]
    fn test_acl_permits() {
        let acl = Acl {
            identity: 2,
            key: b"k".to_vec(),
            scopes: vec![Scope {
                offset: 0,
                value: b"pub/".to_vec(),
                permissions: vec![Permission::Read],
                tls_required: false,
            }],
        };
        assert!(acl.permits(Permission::Read, Some(b"pub/a")));
        assert!(!acl.permits(Permission::Read, Some(b"priv/a")));
        assert!(!acl.permits(Permission::Write, Some(b"pub/a")));
        assert!(acl.permits(Permission::Read, None));
    }

    #[test]
    fn test_counted_kinds() {
        assert_eq!(OpKind::of(MessageType::GetNext), Some(OpKind::GetNext));
        assert_eq!(OpKind::of(MessageType::StartBatch), None);
        assert_eq!(OpKind::of(MessageType::Noop), None);
    }
}
