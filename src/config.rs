// ABOUTME: Builder-style configuration for channels and their connections
// ABOUTME: Mirrors the teacher's KeepAliveConfig/ClientBuilder builder-method style

use std::time::Duration;

/// Per-connection tunables: sweeper cadence and the inbound-op pruning
/// horizon. Constructed once per [`crate::channel::Channel`] and shared by
/// every connection it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub timeout_check_interval: Duration,
    pub timeout_fuzz: Duration,
    pub server_timeout_default: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            timeout_check_interval: Duration::from_millis(1000),
            timeout_fuzz: Duration::from_millis(100),
            server_timeout_default: Duration::from_millis(5000),
        }
    }
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout_check_interval(mut self, interval: Duration) -> Self {
        self.timeout_check_interval = interval;
        self
    }

    pub fn with_timeout_fuzz(mut self, fuzz: Duration) -> Self {
        self.timeout_fuzz = fuzz;
        self
    }

    pub fn with_server_timeout_default(mut self, horizon: Duration) -> Self {
        self.server_timeout_default = horizon;
        self
    }
}

/// Channel-wide tunables: default outbound ttl, the checksum algorithm new
/// outbound calls use, and the [`ConnectionOptions`] every owned connection
/// inherits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    pub default_ttl_ms: u32,
    pub default_checksum_type: u8,
    pub connection: ConnectionOptions,
    /// How long `Channel::send` waits for a freshly auto-dialed connection's
    /// init handshake to complete before giving up.
    pub dial_timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            default_ttl_ms: 5000,
            default_checksum_type: crate::checksum::CHECKSUM_NONE,
            connection: ConnectionOptions::default(),
            dial_timeout: Duration::from_millis(1000),
        }
    }
}

impl ChannelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_ttl_ms(mut self, ttl_ms: u32) -> Self {
        self.default_ttl_ms = ttl_ms;
        self
    }

    pub fn with_default_checksum_type(mut self, checksum_type: u8) -> Self {
        self.default_checksum_type = checksum_type;
        self
    }

    pub fn with_connection_options(mut self, connection: ConnectionOptions) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }
}
