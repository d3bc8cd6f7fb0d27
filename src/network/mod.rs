//! Network Module
//!
//! Framed connection handling shared by the client and the peer-to-peer path
//! of the simulator.
//!
//! ## Architecture
//! - One reader thread per connection, decoding frames in receive order
//! - One writer thread per connection, draining an outbound queue
//! - Stream creation behind [`Connector`] so TLS can be supplied externally

mod stream;
mod transport;

pub use stream::{Connector, DuplexStream, TcpConnector};
pub use transport::{InboundHandler, Transport};
