//! Error types for the Kinetic client and simulator
//!
//! One error type covers wire, drive status, client-side and I/O failures.
//! Drive statuses arrive as [`crate::protocol::Status`] and are turned into
//! these variants by `Status::into_result`.

use thiserror::Error;

/// Result type alias using KineticError
pub type Result<T> = std::result::Result<T, KineticError>;

/// Unified error type for Kinetic operations
#[derive(Debug, Error)]
pub enum KineticError {
    // -------------------------------------------------------------------------
    // Wire Errors
    // -------------------------------------------------------------------------
    #[error("Invalid frame magic: 0x{0:02x}")]
    InvalidMagic(u8),

    #[error("Oversized frame: {part} length {len} exceeds {max}")]
    OversizedFrame {
        part: &'static str,
        len: usize,
        max: usize,
    },

    #[error("Truncated frame: {0}")]
    TruncatedFrame(String),

    #[error("HMAC verification failed")]
    HmacFailure,

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Drive Status Errors
    // -------------------------------------------------------------------------
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Entry not found")]
    NotFound,

    #[error("Version mismatch")]
    VersionMismatch,

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Cluster version mismatch: drive is at {drive_version}")]
    ClusterVersionFailure { drive_version: i64 },

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("No space left on drive")]
    NoSpace,

    #[error("Service busy: {0}")]
    ServiceBusy(String),

    #[error("Device locked")]
    DeviceLocked,

    #[error("Remote connection error: {0}")]
    RemoteConnection(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // -------------------------------------------------------------------------
    // Client-side Errors
    // -------------------------------------------------------------------------
    #[error("Request timed out")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Corrupt big object: {0}")]
    CorruptBigObject(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for KineticError {
    fn from(e: bincode::Error) -> Self {
        KineticError::Serialization(e.to_string())
    }
}
