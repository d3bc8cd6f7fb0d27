//! GETLOG payloads

use serde::{Deserialize, Serialize};

use super::OpKind;

/// Sections a GETLOG request may ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogType {
    Utilizations,
    Temperatures,
    Capacities,
    Configuration,
    Statistics,
    Messages,
    Limits,
}

impl LogType {
    pub const ALL: [LogType; 7] = [
        LogType::Utilizations,
        LogType::Temperatures,
        LogType::Capacities,
        LogType::Configuration,
        LogType::Statistics,
        LogType::Messages,
        LogType::Limits,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utilization {
    pub name: String,
    /// Fraction in 0.0..=1.0
    pub value: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    pub name: String,
    pub current: f32,
    pub minimum: f32,
    pub maximum: f32,
    pub target: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capacity {
    pub nominal_capacity_bytes: u64,
    pub portion_full: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub vendor: String,
    pub model: String,
    pub serial_number: String,
    pub version: String,
    pub protocol_version: String,
    pub protocol_source_hash: String,
    pub port: u16,
    pub tls_port: u16,
    /// Size of the last downloaded firmware image
    pub firmware_bytes: Option<u64>,
    /// SHA-256 of the last downloaded firmware image
    pub firmware_digest: Option<Vec<u8>>,
}

/// One operation counter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub op: OpKind,
    pub count: u64,
}

/// Limits advertised by the drive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub max_key_size: u32,
    pub max_value_size: u32,
    pub max_version_size: u32,
    pub max_tag_size: u32,
    pub max_connections: u32,
    pub max_outstanding_read_requests: u32,
    pub max_outstanding_write_requests: u32,
    pub max_message_size: u32,
    pub max_key_range_count: u32,
    pub max_identity_count: u32,
    pub max_batch_operations: u32,
}

/// GETLOG response; only the requested sections are filled
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriveLog {
    pub types: Vec<LogType>,
    pub utilizations: Vec<Utilization>,
    pub temperatures: Vec<Temperature>,
    pub capacity: Option<Capacity>,
    pub configuration: Option<Configuration>,
    pub statistics: Vec<Statistics>,
    pub messages: Vec<String>,
    pub limits: Option<Limits>,
}

impl DriveLog {
    /// Counter value for `op`, 0 when absent
    pub fn counter(&self, op: OpKind) -> u64 {
        self.statistics
            .iter()
            .find(|s| s.op == op)
            .map(|s| s.count)
            .unwrap_or(0)
    }
}
