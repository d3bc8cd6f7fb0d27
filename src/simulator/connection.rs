//! Connection Handler
//!
//! Serves one client connection: authenticate each frame, hand the command
//! to the [`Drive`], seal and send the reply.

use std::io::{self, BufReader, BufWriter, Write};
use std::net::TcpStream;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{KineticError, Result};
use crate::protocol::{
    read_frame, write_frame, Body, Command, Frame, Header, Message, MessageType, Status, StatusCode,
};
use super::engine::{Drive, Session};

/// Handles a single client connection
pub struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    drive: Arc<Drive>,

    session: Session,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    pub fn new(stream: TcpStream, drive: Arc<Drive>) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let read_stream = stream.try_clone()?;
        let session = drive.open_session();

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(stream),
            drive,
            session,
            peer_addr,
        })
    }

    /// Handle the connection (blocking until closed)
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!(
            "Connection {} established from {}",
            self.session.connection_id,
            self.peer_addr
        );

        self.send_status(Status::success(), None)?;

        loop {
            let frame = match read_frame(&mut self.reader) {
                Ok(frame) => frame,
                Err(KineticError::ConnectionClosed) => {
                    tracing::debug!("Client {} disconnected", self.peer_addr);
                    return Ok(());
                }
                Err(KineticError::Io(ref e)) if is_disconnect(e) => {
                    tracing::debug!("Connection to {} dropped: {}", self.peer_addr, e);
                    return Ok(());
                }
                Err(e) => {
                    // The stream cannot be resynchronized after a bad frame
                    tracing::warn!("Error reading from {}: {}", self.peer_addr, e);
                    let _ = self.send_status(Status::from_error(&e), None);
                    return Err(e);
                }
            };

            let reply = self.process(frame);

            if let Err(e) = reply.and_then(|frame| self.send(&frame)) {
                if let KineticError::Io(ref io_err) = e {
                    if is_disconnect(io_err) {
                        tracing::debug!(
                            "Client {} disconnected before response could be sent: {}",
                            self.peer_addr,
                            e
                        );
                        return Ok(());
                    }
                }
                tracing::warn!("Error writing to {}: {}", self.peer_addr, e);
                return Err(e);
            }
        }
    }

    /// Authenticate, execute and seal
    fn process(&mut self, frame: Frame) -> Result<Frame> {
        let message = match Message::from_frame(&frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Undecodable message from {}: {}", self.peer_addr, e);
                return self.unsolicited(Status::from_error(&e), None);
            }
        };

        // Best effort: the ack sequence lets the client match the rejection
        let claimed = message.command().ok();
        let ack = claimed.as_ref().map(|c| &c.header);

        let Some(identity) = message.identity() else {
            return self.unsolicited(hmac_failure("message is not signed"), ack);
        };
        let Some(acl) = self.drive.acl(identity) else {
            tracing::warn!("Unknown identity {} from {}", identity, self.peer_addr);
            return self.unsolicited(hmac_failure("unknown identity"), ack);
        };
        if message.verify(&acl.key).is_err() {
            tracing::warn!("HMAC failure for identity {} from {}", identity, self.peer_addr);
            return self.unsolicited(hmac_failure("HMAC verification failed"), ack);
        }

        let Some(command) = claimed else {
            let status = Status::new(StatusCode::InvalidRequest, "undecodable command");
            return self.unsolicited(status, None);
        };

        tracing::trace!(
            "Received {:?} seq={} from {}",
            command.header.message_type,
            command.header.sequence,
            self.peer_addr
        );

        let (response, value) = self.drive.execute(&mut self.session, &acl, command, frame.value);
        Message::sign(&response, identity, &acl.key)?.into_frame(value)
    }

    /// Unsigned status frame, optionally acknowledging a request
    fn unsolicited(&self, status: Status, request: Option<&Header>) -> Result<Frame> {
        let mut command = match request {
            Some(header) => Command::response_to(header, self.drive.cluster_version()),
            None => {
                let mut command = Command::new(MessageType::UnsolicitedStatus, Body::Empty);
                command.header.cluster_version = self.drive.cluster_version();
                command
            }
        };
        command.header.connection_id = self.session.connection_id;
        command.status = status;
        Message::unsolicited(&command)?.into_frame(Bytes::new())
    }

    fn send_status(&mut self, status: Status, request: Option<&Header>) -> Result<()> {
        let frame = self.unsolicited(status, request)?;
        self.send(&frame)
    }

    fn send(&mut self, frame: &Frame) -> Result<()> {
        write_frame(&mut self.writer, frame)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Refuse a connection with an unsolicited SERVICE_BUSY status
pub fn refuse(stream: TcpStream, drive: &Drive, reason: &str) -> Result<()> {
    let mut command = Command::new(MessageType::UnsolicitedStatus, Body::Empty);
    command.header.cluster_version = drive.cluster_version();
    command.status = Status::new(StatusCode::ServiceBusy, reason);

    let frame = Message::unsolicited(&command)?.into_frame(Bytes::new())?;
    let mut writer = BufWriter::new(&stream);
    write_frame(&mut writer, &frame)?;
    writer.flush()?;
    drop(writer);
    stream.shutdown(std::net::Shutdown::Both)?;
    Ok(())
}

fn hmac_failure(reason: &str) -> Status {
    Status::new(StatusCode::HmacFailure, reason)
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}
