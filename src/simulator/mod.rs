//! Simulator Module
//!
//! An in-process Kinetic drive for tests and development.
//!
//! ## Architecture
//! ```text
//!   TcpListener ── accept loop ──┬── Connection (thread) ─┐
//!                                ├── Connection (thread) ─┼──▶ Drive ──▶ KvStore
//!                                └── ...                  ┘     │
//!                                                               ├── Security (ACL, PINs)
//!                                                               ├── OperationCounter
//!                                                               └── BatchJournal (per connection)
//! ```

mod batch;
mod connection;
mod counter;
mod engine;
mod security;
mod server;

pub use batch::{BatchJournal, BatchState, CommitReport};
pub use counter::OperationCounter;
pub use engine::{Drive, Session, MAX_KEY_RANGE_COUNT};
pub use security::MAX_IDENTITY_COUNT;
pub use server::Simulator;
