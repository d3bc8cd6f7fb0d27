//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! ### Frame
//! ```text
//! ┌──────────┬──────────────┬──────────────┬───────────────┬─────────────┐
//! │ 'F' (1)  │ CmdLen (4)   │ ValLen (4)   │ Message       │ Value       │
//! └──────────┴──────────────┴──────────────┴───────────────┴─────────────┘
//! ```
//! Lengths are big-endian. Message and value are each at most 1 MiB.
//!
//! ### Message
//! The message is an envelope `{ auth, command_bytes }`. For HMAC auth the
//! tag is SHA1-HMAC over `be32(len(command_bytes)) || command_bytes` under
//! the identity's key. `command_bytes` is the encoded [`Command`].

use std::io::{ErrorKind, Read, Write};

use bincode::Options;
use bytes::{BufMut, Bytes, BytesMut};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;

use crate::error::{KineticError, Result};
use super::Command;

type HmacSha1 = Hmac<Sha1>;

/// Frame magic byte
pub const MAGIC: u8 = b'F';

/// Header size: magic (1) + message length (4) + value length (4)
pub const HEADER_SIZE: usize = 9;

/// Maximum message size (1 MiB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Maximum value size (1 MiB)
pub const MAX_VALUE_SIZE: usize = 1024 * 1024;

// =============================================================================
// Frames
// =============================================================================

/// One frame: encoded message plus raw value bytes
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub message: Bytes,
    pub value: Bytes,
}

impl Frame {
    pub fn new(message: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            message: message.into(),
            value: value.into(),
        }
    }
}

/// Encode a frame to bytes
pub fn encode_frame(frame: &Frame) -> Result<Bytes> {
    check_lengths(frame.message.len(), frame.value.len())?;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + frame.message.len() + frame.value.len());
    buf.put_u8(MAGIC);
    buf.put_u32(frame.message.len() as u32);
    buf.put_u32(frame.value.len() as u32);
    buf.put_slice(&frame.message);
    buf.put_slice(&frame.value);

    Ok(buf.freeze())
}

/// Decode a frame from bytes
///
/// Returns the frame and number of bytes consumed
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize)> {
    if bytes.len() < HEADER_SIZE {
        return Err(KineticError::TruncatedFrame(format!(
            "header: expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let (message_len, value_len) = parse_header(&bytes[..HEADER_SIZE])?;
    let total_len = HEADER_SIZE + message_len + value_len;
    if bytes.len() < total_len {
        return Err(KineticError::TruncatedFrame(format!(
            "body: expected {} bytes, got {}",
            total_len,
            bytes.len()
        )));
    }

    let message_end = HEADER_SIZE + message_len;
    let frame = Frame::new(
        Bytes::copy_from_slice(&bytes[HEADER_SIZE..message_end]),
        Bytes::copy_from_slice(&bytes[message_end..total_len]),
    );
    Ok((frame, total_len))
}

fn parse_header(header: &[u8]) -> Result<(usize, usize)> {
    if header[0] != MAGIC {
        return Err(KineticError::InvalidMagic(header[0]));
    }
    let message_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    let value_len = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as usize;
    check_lengths(message_len, value_len)?;
    Ok((message_len, value_len))
}

fn check_lengths(message_len: usize, value_len: usize) -> Result<()> {
    if message_len > MAX_MESSAGE_SIZE {
        return Err(KineticError::OversizedFrame {
            part: "message",
            len: message_len,
            max: MAX_MESSAGE_SIZE,
        });
    }
    if value_len > MAX_VALUE_SIZE {
        return Err(KineticError::OversizedFrame {
            part: "value",
            len: value_len,
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read a complete frame from a stream
///
/// A clean EOF before the first header byte is `ConnectionClosed`; an EOF
/// anywhere later is `TruncatedFrame`.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame> {
    let mut header = [0u8; HEADER_SIZE];
    let filled = fill(reader, &mut header)?;
    if filled == 0 {
        return Err(KineticError::ConnectionClosed);
    }
    if filled < HEADER_SIZE {
        return Err(KineticError::TruncatedFrame(format!(
            "header: got {} of {} bytes",
            filled, HEADER_SIZE
        )));
    }

    let (message_len, value_len) = parse_header(&header)?;

    let mut body = vec![0u8; message_len + value_len];
    let filled = fill(reader, &mut body)?;
    if filled < body.len() {
        return Err(KineticError::TruncatedFrame(format!(
            "body: got {} of {} bytes",
            filled,
            body.len()
        )));
    }

    let mut body = Bytes::from(body);
    let value = body.split_off(message_len);
    Ok(Frame::new(body, value))
}

/// Write a frame to a stream
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<()> {
    let bytes = encode_frame(frame)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read until `buf` is full or EOF; returns bytes read
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

// =============================================================================
// Command Encoding/Decoding
// =============================================================================

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_MESSAGE_SIZE as u64)
}

/// Encode a command to its schema bytes
pub fn encode_command(command: &Command) -> Result<Vec<u8>> {
    Ok(wire_options().serialize(command)?)
}

/// Decode a command from its schema bytes
pub fn decode_command(bytes: &[u8]) -> Result<Command> {
    Ok(wire_options().deserialize(bytes)?)
}

// =============================================================================
// Authentication Envelope
// =============================================================================

/// How a message is authenticated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Auth {
    Hmac { identity: i64, hmac: Vec<u8> },
    /// Drive-originated status with no HMAC
    Unsolicited,
}

/// The envelope carried in the message part of a frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub auth: Auth,
    pub command_bytes: Vec<u8>,
}

impl Message {
    /// Encode `command` and tag it for `identity`
    pub fn sign(command: &Command, identity: i64, key: &[u8]) -> Result<Self> {
        let command_bytes = encode_command(command)?;
        let hmac = compute_hmac(key, &command_bytes)?;
        Ok(Self {
            auth: Auth::Hmac { identity, hmac },
            command_bytes,
        })
    }

    pub fn unsolicited(command: &Command) -> Result<Self> {
        Ok(Self {
            auth: Auth::Unsolicited,
            command_bytes: encode_command(command)?,
        })
    }

    pub fn identity(&self) -> Option<i64> {
        match self.auth {
            Auth::Hmac { identity, .. } => Some(identity),
            Auth::Unsolicited => None,
        }
    }

    /// Check the HMAC against `key`
    pub fn verify(&self, key: &[u8]) -> Result<()> {
        match &self.auth {
            Auth::Hmac { hmac, .. } => verify_hmac(key, &self.command_bytes, hmac),
            Auth::Unsolicited => Err(KineticError::HmacFailure),
        }
    }

    pub fn command(&self) -> Result<Command> {
        decode_command(&self.command_bytes)
    }

    pub fn from_frame(frame: &Frame) -> Result<Self> {
        Ok(wire_options().deserialize(&frame.message)?)
    }

    pub fn into_frame(self, value: impl Into<Bytes>) -> Result<Frame> {
        let message = wire_options().serialize(&self)?;
        let frame = Frame::new(message, value);
        check_lengths(frame.message.len(), frame.value.len())?;
        Ok(frame)
    }
}

/// Sign `command` and wrap it with `value` into a frame
pub fn seal(command: &Command, identity: i64, key: &[u8], value: impl Into<Bytes>) -> Result<Frame> {
    Message::sign(command, identity, key)?.into_frame(value)
}

/// SHA1-HMAC over the length-prefixed command bytes
pub fn compute_hmac(key: &[u8], command_bytes: &[u8]) -> Result<Vec<u8>> {
    let mut mac = keyed(key)?;
    mac.update(&(command_bytes.len() as u32).to_be_bytes());
    mac.update(command_bytes);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Constant-time check of an HMAC
pub fn verify_hmac(key: &[u8], command_bytes: &[u8], hmac: &[u8]) -> Result<()> {
    let mut mac = keyed(key)?;
    mac.update(&(command_bytes.len() as u32).to_be_bytes());
    mac.update(command_bytes);
    mac.verify_slice(hmac).map_err(|_| KineticError::HmacFailure)
}

fn keyed(key: &[u8]) -> Result<HmacSha1> {
    HmacSha1::new_from_slice(key).map_err(|e| KineticError::Internal(format!("HMAC key: {}", e)))
}
