//! Stream abstraction
//!
//! The transport needs independent read and write halves of one duplex
//! stream plus a way to shut it down from either side. TCP provides that via
//! `try_clone`; a TLS stack plugs in by implementing [`DuplexStream`] and a
//! [`Connector`] that produces it.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};

use crate::config::ClientConfig;
use crate::error::{KineticError, Result};

/// A full-duplex byte stream that can be split into halves
pub trait DuplexStream: Send + Sync {
    fn reader(&self) -> io::Result<Box<dyn Read + Send>>;

    fn writer(&self) -> io::Result<Box<dyn Write + Send>>;

    /// Shut down both directions; unblocks a pending read
    fn shutdown(&self) -> io::Result<()>;

    /// Peer address for logging
    fn peer(&self) -> String;
}

impl DuplexStream for TcpStream {
    fn reader(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn writer(&self) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }

    fn peer(&self) -> String {
        self.peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    }
}

/// Opens the stream a client talks over
pub trait Connector: Send + Sync {
    fn connect(&self, config: &ClientConfig) -> Result<Box<dyn DuplexStream>>;
}

/// Cleartext TCP connector
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, config: &ClientConfig) -> Result<Box<dyn DuplexStream>> {
        if config.use_ssl {
            return Err(KineticError::Config(
                "TLS requested but the TCP connector is cleartext; supply a TLS connector".to_string(),
            ));
        }

        let address = config.address();
        let stream = match config.connect_timeout() {
            None => TcpStream::connect(&address)?,
            Some(timeout) => {
                let mut last_err = None;
                let mut connected = None;
                for addr in address.to_socket_addrs()? {
                    match TcpStream::connect_timeout(&addr, timeout) {
                        Ok(stream) => {
                            connected = Some(stream);
                            break;
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                match (connected, last_err) {
                    (Some(stream), _) => stream,
                    (None, Some(e)) => return Err(e.into()),
                    (None, None) => {
                        return Err(KineticError::Config(format!(
                            "{} did not resolve to any address",
                            address
                        )))
                    }
                }
            }
        };

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;
        tracing::debug!("Connected to {}", address);

        Ok(Box::new(stream))
    }
}
