//! Protocol Module
//!
//! Defines the wire protocol spoken between clients and drives.
//!
//! ## Frame Format
//! ```text
//! ┌──────────┬──────────────┬──────────────┬───────────────┬─────────────┐
//! │ 'F' (1)  │ CmdLen (4)   │ ValLen (4)   │ Message       │ Value       │
//! └──────────┴──────────────┴──────────────┴───────────────┴─────────────┘
//! ```
//!
//! ### Message
//! An authentication envelope (identity + SHA1-HMAC) around the encoded
//! [`Command`]: header (cluster version, connection id, sequence,
//! ack sequence, message type, batch id), body and status.
//!
//! ### Status Codes
//! See [`StatusCode`]; every response carries one.

mod codec;
mod command;
mod log;
mod response;

pub use codec::{
    compute_hmac, decode_command, decode_frame, encode_command, encode_frame, read_frame, seal,
    verify_hmac, write_frame, Auth, Frame, Message, HEADER_SIZE, MAGIC, MAX_MESSAGE_SIZE,
    MAX_VALUE_SIZE,
};
pub use command::{
    Acl, BatchOpKind, BatchOpOutcome, Body, Command, EndBatch, Header, KeyRange, KeyValue,
    MessageType, OpKind, Peer, PeerToPeerOperation, PeerToPeerOutcome, PeerToPeerRequest,
    Permission, Scope, SecurityOp, Setup,
};
pub use log::{
    Capacity, Configuration, DriveLog, Limits, LogType, Statistics, Temperature, Utilization,
};
pub use response::{Status, StatusCode};
