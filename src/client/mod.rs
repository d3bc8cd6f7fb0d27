//! Client Module
//!
//! Everything a program needs to talk to a drive.
//!
//! ## Layers
//! ```text
//!   KineticClient / AdminClient / BatchOperation / BigObject
//!                        │
//!                   Multiplexer  (sequence → pending request, deadlines,
//!                        │        async backpressure, callback pool)
//!                    Transport   (reader + writer thread)
//!                        │
//!                   DuplexStream (TCP, or TLS via a Connector)
//! ```

mod admin;
mod batch;
mod bigobject;
mod kinetic;
mod multiplexer;
mod workers;

pub use admin::AdminClient;
pub use batch::{BatchOperation, BatchSummary};
pub use bigobject::{chunk_key, manifest_key, BigObject, Manifest, CHUNK_SIZE};
pub use kinetic::KineticClient;
pub use multiplexer::{Callback, CancelHandle, Multiplexer, PendingCall, Response};
