//! # Kinetic
//!
//! Client library and in-process drive simulator for the Kinetic object
//! storage protocol:
//! - Framed, HMAC-authenticated request/response transport
//! - Many in-flight requests per connection, matched by sequence number
//! - Atomic multi-operation batches
//! - Chunked streaming of values larger than one PUT
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │      KineticClient · AdminClient · BatchOperation · BigObject│
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     Multiplexer                              │
//! │      (sequence → pending request, deadlines, backpressure)   │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  Transport (reader + writer thread)
//!                       │  'F' | len | len | message | value
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                   Simulator / Drive                          │
//! │       (auth, ACLs, cluster version, batch journal)           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!                       ▼
//!                ┌─────────────┐
//!                │   KvStore   │
//!                │  (RwLock)   │
//!                └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod entry;

pub mod protocol;
pub mod network;
pub mod client;
pub mod storage;
pub mod simulator;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{KineticError, Result};
pub use config::{ClientConfig, SimulatorConfig};
pub use entry::{Algorithm, Entry, EntryMetadata};
pub use client::{AdminClient, BatchOperation, BatchSummary, BigObject, KineticClient};
pub use simulator::Simulator;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
