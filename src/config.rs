//! Configuration for Kinetic clients and the drive simulator
//!
//! Centralized configuration with sensible defaults.

use std::env;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::protocol::{Acl, Permission, Scope};

/// Kinetic protocol version implemented by this crate
pub const PROTOCOL_VERSION: &str = "2.0.2";

/// Protocol source commit the message model follows
pub const PROTOCOL_SOURCE_HASH: &str = "f6e21e281272b46c620284781cdb3a36a6c7a564";

/// Default cleartext port
pub const DEFAULT_PORT: u16 = 8123;

/// Default TLS port
pub const DEFAULT_TLS_PORT: u16 = 8443;

/// Fallback request timeout when a non-positive value is configured
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Default identity and key shipped with every drive
pub const DEFAULT_USER_ID: i64 = 1;
pub const DEFAULT_HMAC_KEY: &[u8] = b"asdfasdf";

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for a single client connection
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -------------------------------------------------------------------------
    // Endpoint
    // -------------------------------------------------------------------------
    /// Drive host name
    pub host: String,

    /// Drive port; `None` picks 8123, or 8443 with TLS
    pub port: Option<u16>,

    /// Use a TLS transport
    pub use_ssl: bool,

    /// Connect timeout in milliseconds (0 = system default)
    pub connect_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------
    /// Identity used to sign every request
    pub user_id: i64,

    /// Shared HMAC key for `user_id`
    pub hmac_key: Vec<u8>,

    /// Cluster version this client believes the drive is at
    pub cluster_version: i64,

    /// Connection id stamped until the drive assigns one
    pub connection_id: i64,

    // -------------------------------------------------------------------------
    // Request Handling
    // -------------------------------------------------------------------------
    /// Per-request deadline in milliseconds
    pub request_timeout_ms: u64,

    /// Outstanding async requests before submitters block
    pub async_queue_size: usize,

    /// How long close() waits for each callback worker
    pub thread_pool_await_timeout_ms: u64,

    /// Callback worker threads (0 = available parallelism)
    pub nio_service_threads: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            use_ssl: false,
            connect_timeout_ms: 0,
            user_id: DEFAULT_USER_ID,
            hmac_key: DEFAULT_HMAC_KEY.to_vec(),
            cluster_version: 0,
            connection_id: wall_clock_nanos(),
            request_timeout_ms: 60_000,
            async_queue_size: 10,
            thread_pool_await_timeout_ms: 50,
            nio_service_threads: 0,
        }
    }
}

impl ClientConfig {
    /// Create a new config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Defaults overridden from the environment
    ///
    /// Reads `KINETIC_HOST`, `KINETIC_PORT`, `KINETIC_USER_ID`,
    /// `KINETIC_CONNECTION_ID` (or `kinetic.connectionId`) and the TLS toggle
    /// `kinetic.io.ssl` (or `KINETIC_IO_SSL`). Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = env::var("KINETIC_HOST") {
            config.host = host;
        }
        if let Some(port) = env_parse::<u16>(&["KINETIC_PORT"]) {
            config.port = Some(port);
        }
        if let Some(user_id) = env_parse::<i64>(&["KINETIC_USER_ID"]) {
            config.user_id = user_id;
        }
        if let Some(id) = env_parse::<i64>(&["kinetic.connectionId", "KINETIC_CONNECTION_ID"]) {
            if id != -1 {
                config.connection_id = id;
            }
        }
        if let Some(ssl) = env_parse::<bool>(&["kinetic.io.ssl", "KINETIC_IO_SSL"]) {
            config.use_ssl = ssl;
        }

        config
    }

    /// Port actually dialed
    pub fn effective_port(&self) -> u16 {
        match (self.port, self.use_ssl) {
            (Some(port), _) => port,
            (None, true) => DEFAULT_TLS_PORT,
            (None, false) => DEFAULT_PORT,
        }
    }

    /// `host:port` of the drive
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.effective_port())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// `None` when the system default applies
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }

    /// Apply the request timeout rules
    ///
    /// Non-positive values fall back to 30 seconds; values under 30 seconds
    /// are accepted with a warning.
    pub fn set_request_timeout_ms(&mut self, millis: i64) {
        let millis = if millis <= 0 {
            tracing::warn!(
                "Request timeout {} ms is not supported, using {} ms",
                millis,
                DEFAULT_REQUEST_TIMEOUT_MS
            );
            DEFAULT_REQUEST_TIMEOUT_MS
        } else {
            if (millis as u64) < DEFAULT_REQUEST_TIMEOUT_MS {
                tracing::warn!(
                    "Request timeout set to {} ms; responses may not arrive in time on a slow network",
                    millis
                );
            }
            millis as u64
        };

        self.request_timeout_ms = millis;
        tracing::debug!("Request timeout is {} ms", millis);
    }
}

/// Builder for ClientConfig
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = Some(port);
        self
    }

    pub fn use_ssl(mut self, flag: bool) -> Self {
        self.config.use_ssl = flag;
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn user_id(mut self, user_id: i64) -> Self {
        self.config.user_id = user_id;
        self
    }

    pub fn hmac_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.config.hmac_key = key.into();
        self
    }

    pub fn cluster_version(mut self, version: i64) -> Self {
        self.config.cluster_version = version;
        self
    }

    pub fn connection_id(mut self, id: i64) -> Self {
        self.config.connection_id = id;
        self
    }

    /// Set the request timeout (see [`ClientConfig::set_request_timeout_ms`])
    pub fn request_timeout_ms(mut self, ms: i64) -> Self {
        self.config.set_request_timeout_ms(ms);
        self
    }

    pub fn async_queue_size(mut self, size: usize) -> Self {
        self.config.async_queue_size = size;
        self
    }

    pub fn thread_pool_await_timeout_ms(mut self, ms: u64) -> Self {
        self.config.thread_pool_await_timeout_ms = ms;
        self
    }

    pub fn nio_service_threads(mut self, threads: usize) -> Self {
        self.config.nio_service_threads = threads;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

// =============================================================================
// Simulator Configuration
// =============================================================================

/// Configuration for the drive simulator
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address (port 0 picks an ephemeral port)
    pub listen_addr: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// TLS port advertised in the drive configuration log
    pub tls_port: u16,

    // -------------------------------------------------------------------------
    // Drive State
    // -------------------------------------------------------------------------
    /// Cluster version the drive starts at
    pub cluster_version: i64,

    /// Initial ACL table
    pub acls: Vec<Acl>,

    /// Nominal capacity; PUTs beyond it fail with NO_SPACE
    pub capacity_bytes: u64,

    /// Max staged operations per batch
    pub max_batch_operations: usize,

    // -------------------------------------------------------------------------
    // Peer-to-peer
    // -------------------------------------------------------------------------
    /// Identity used when pushing to a peer drive
    pub p2p_user_id: i64,

    /// HMAC key for `p2p_user_id`
    pub p2p_hmac_key: Vec<u8>,

    /// Request timeout for peer connections (milliseconds)
    pub p2p_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Identification
    // -------------------------------------------------------------------------
    pub vendor: String,
    pub model: String,
    pub serial_number: String,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            max_connections: 1024,
            tls_port: DEFAULT_TLS_PORT,
            cluster_version: 0,
            acls: vec![default_acl()],
            capacity_bytes: 4 * 1024 * 1024 * 1024, // 4 GB
            max_batch_operations: 100,
            p2p_user_id: DEFAULT_USER_ID,
            p2p_hmac_key: DEFAULT_HMAC_KEY.to_vec(),
            p2p_timeout_ms: 30_000,
            vendor: "Kinetic".to_string(),
            model: "Simulator".to_string(),
            serial_number: "SIM-0001".to_string(),
        }
    }
}

impl SimulatorConfig {
    /// Create a new config builder
    pub fn builder() -> SimulatorConfigBuilder {
        SimulatorConfigBuilder::default()
    }
}

/// Builder for SimulatorConfig
#[derive(Default)]
pub struct SimulatorConfigBuilder {
    config: SimulatorConfig,
}

impl SimulatorConfigBuilder {
    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    pub fn tls_port(mut self, port: u16) -> Self {
        self.config.tls_port = port;
        self
    }

    pub fn cluster_version(mut self, version: i64) -> Self {
        self.config.cluster_version = version;
        self
    }

    /// Replace the initial ACL table
    pub fn acls(mut self, acls: Vec<Acl>) -> Self {
        self.config.acls = acls;
        self
    }

    /// Add one identity to the initial ACL table
    pub fn acl(mut self, acl: Acl) -> Self {
        self.config.acls.push(acl);
        self
    }

    pub fn capacity_bytes(mut self, bytes: u64) -> Self {
        self.config.capacity_bytes = bytes;
        self
    }

    pub fn max_batch_operations(mut self, count: usize) -> Self {
        self.config.max_batch_operations = count;
        self
    }

    pub fn p2p_identity(mut self, user_id: i64, key: impl Into<Vec<u8>>) -> Self {
        self.config.p2p_user_id = user_id;
        self.config.p2p_hmac_key = key.into();
        self
    }

    pub fn p2p_timeout_ms(mut self, ms: u64) -> Self {
        self.config.p2p_timeout_ms = ms;
        self
    }

    pub fn serial_number(mut self, serial: impl Into<String>) -> Self {
        self.config.serial_number = serial.into();
        self
    }

    pub fn build(self) -> SimulatorConfig {
        self.config
    }
}

/// Identity 1 with key "asdfasdf" and every permission
pub fn default_acl() -> Acl {
    Acl {
        identity: DEFAULT_USER_ID,
        key: DEFAULT_HMAC_KEY.to_vec(),
        scopes: vec![Scope::all(Permission::ALL.to_vec())],
    }
}

fn wall_clock_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

fn env_parse<T: std::str::FromStr>(names: &[&str]) -> Option<T> {
    names
        .iter()
        .find_map(|name| env::var(name).ok())
        .and_then(|raw| raw.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        let mut config = ClientConfig::default();
        assert_eq!(config.effective_port(), 8123);

        config.use_ssl = true;
        assert_eq!(config.effective_port(), 8443);

        config.port = Some(9000);
        assert_eq!(config.effective_port(), 9000);
    }

    #[test]
    fn test_request_timeout_rules() {
        let mut config = ClientConfig::default();
        assert_eq!(config.request_timeout_ms, 60_000);

        config.set_request_timeout_ms(0);
        assert_eq!(config.request_timeout_ms, 30_000);

        config.set_request_timeout_ms(-5);
        assert_eq!(config.request_timeout_ms, 30_000);

        config.set_request_timeout_ms(1);
        assert_eq!(config.request_timeout_ms, 1);
    }

    #[test]
    fn test_builder_defaults() {
        let config = ClientConfig::builder().host("drive-a").port(1234).build();
        assert_eq!(config.address(), "drive-a:1234");
        assert_eq!(config.user_id, 1);
        assert_eq!(config.hmac_key, b"asdfasdf");
        assert_eq!(config.async_queue_size, 10);
        assert_eq!(config.thread_pool_await_timeout_ms, 50);
        assert!(config.connect_timeout().is_none());
    }
}
