//! Response status definitions
//!
//! Every response carries a [`Status`]; `into_result` and `from_error` move
//! between drive statuses and [`KineticError`].

use serde::{Deserialize, Serialize};

use crate::error::{KineticError, Result};

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Success,
    /// Batch member that was never applied
    NotAttempted,
    /// Batch member discarded because another member failed validation
    Aborted,
    HmacFailure,
    NotAuthorized,
    /// Cluster version mismatch
    VersionFailure,
    InternalError,
    NotFound,
    VersionMismatch,
    ServiceBusy,
    NoSpace,
    InvalidRequest,
    InvalidBatch,
    DeviceLocked,
    RemoteConnectionError,
}

/// Status code plus optional detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn success() -> Self {
        Self::new(StatusCode::Success, "")
    }

    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == StatusCode::Success
    }

    /// Convert to an error; `drive_cluster_version` fills VERSION_FAILURE
    pub fn into_result(self, drive_cluster_version: i64) -> Result<()> {
        let msg = self.message;
        let err = match self.code {
            StatusCode::Success => return Ok(()),
            StatusCode::NotAttempted => KineticError::InvalidBatch(or(msg, "operation not attempted")),
            StatusCode::Aborted => KineticError::InvalidBatch(or(msg, "batch aborted")),
            StatusCode::HmacFailure => KineticError::HmacFailure,
            StatusCode::NotAuthorized => KineticError::NotAuthorized(msg),
            StatusCode::VersionFailure => KineticError::ClusterVersionFailure {
                drive_version: drive_cluster_version,
            },
            StatusCode::InternalError => KineticError::Internal(msg),
            StatusCode::NotFound => KineticError::NotFound,
            StatusCode::VersionMismatch => KineticError::VersionMismatch,
            StatusCode::ServiceBusy => KineticError::ServiceBusy(msg),
            StatusCode::NoSpace => KineticError::NoSpace,
            StatusCode::InvalidRequest => KineticError::InvalidRequest(msg),
            StatusCode::InvalidBatch => KineticError::InvalidBatch(msg),
            StatusCode::DeviceLocked => KineticError::DeviceLocked,
            StatusCode::RemoteConnectionError => KineticError::RemoteConnection(msg),
        };
        Err(err)
    }

    /// Status reported to a client for a failed operation
    pub fn from_error(err: &KineticError) -> Self {
        let code = match err {
            KineticError::HmacFailure => StatusCode::HmacFailure,
            KineticError::NotAuthorized(_) => StatusCode::NotAuthorized,
            KineticError::ClusterVersionFailure { .. } => StatusCode::VersionFailure,
            KineticError::NotFound => StatusCode::NotFound,
            KineticError::VersionMismatch => StatusCode::VersionMismatch,
            KineticError::ServiceBusy(_) => StatusCode::ServiceBusy,
            KineticError::NoSpace => StatusCode::NoSpace,
            KineticError::InvalidRequest(_)
            | KineticError::InvalidMagic(_)
            | KineticError::OversizedFrame { .. }
            | KineticError::TruncatedFrame(_)
            | KineticError::Serialization(_) => StatusCode::InvalidRequest,
            KineticError::InvalidBatch(_) => StatusCode::InvalidBatch,
            KineticError::DeviceLocked => StatusCode::DeviceLocked,
            KineticError::RemoteConnection(_)
            | KineticError::ConnectionClosed
            | KineticError::Timeout => StatusCode::RemoteConnectionError,
            _ => StatusCode::InternalError,
        };
        Self::new(code, err.to_string())
    }
}

fn or(msg: String, fallback: &str) -> String {
    if msg.is_empty() {
        fallback.to_string()
    } else {
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_round_trip() {
        let status = Status::from_error(&KineticError::VersionMismatch);
        assert_eq!(status.code, StatusCode::VersionMismatch);
        assert!(matches!(
            status.into_result(0),
            Err(KineticError::VersionMismatch)
        ));
    }

    #[test]
    fn test_cluster_version_carried() {
        let status = Status::new(StatusCode::VersionFailure, "");
        match status.into_result(7) {
            Err(KineticError::ClusterVersionFailure { drive_version }) => {
                assert_eq!(drive_version, 7)
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
