//! Centralized configuration for the bridge.
//!
//! Constant holders follow the same layout as the rest of the codebase; the
//! runtime-adjustable subset lives in [`ServerConfig`].

use crate::{BridgeError, Result};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Wire protocol limits.
pub struct ProtocolConfig;

impl ProtocolConfig {
    /// Size of the little-endian length prefix in bytes.
    pub const LENGTH_PREFIX_SIZE: usize = 4;
    /// Default cap on a single message body (16 MiB).
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
}

/// Defaults for the server side of the bridge.
pub struct ServerDefaults;

impl ServerDefaults {
    pub const HOST: &'static str = "127.0.0.1";
    pub const PORT: u16 = 9999;
    /// Bytes read per non-blocking receive.
    pub const READ_CHUNK_SIZE: usize = 4096;
    /// Read timeout while the connection is held in blocking mode.
    pub const HOLD_READ_TIMEOUT: Duration = Duration::from_millis(100);
}

/// Defaults for the blocking client.
pub struct ClientDefaults;

impl ClientDefaults {
    pub const IO_TIMEOUT: Duration = Duration::from_secs(2);
}

/// Runtime configuration for [`crate::Server`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_message_size: usize,
    pub read_chunk_size: usize,
    pub hold_read_timeout: Duration,
    /// Only names starting with this prefix may be called.
    pub allowed_prefix: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: ServerDefaults::HOST.to_string(),
            port: ServerDefaults::PORT,
            max_message_size: ProtocolConfig::MAX_MESSAGE_SIZE,
            read_chunk_size: ServerDefaults::READ_CHUNK_SIZE,
            hold_read_timeout: ServerDefaults::HOLD_READ_TIMEOUT,
            allowed_prefix: None,
        }
    }
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    pub fn with_hold_read_timeout(mut self, timeout: Duration) -> Self {
        self.hold_read_timeout = timeout;
        self
    }

    pub fn with_allowed_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.allowed_prefix = Some(prefix.into());
        self
    }

    /// Check that the configuration can actually be served.
    pub fn validate(&self) -> Result<()> {
        if self.max_message_size == 0 || self.max_message_size > u32::MAX as usize {
            return Err(BridgeError::Config {
                message: format!(
                    "max_message_size must be between 1 and {}, got {}",
                    u32::MAX,
                    self.max_message_size
                ),
            });
        }
        if self.read_chunk_size == 0 {
            return Err(BridgeError::Config {
                message: "read_chunk_size must be non-zero".to_string(),
            });
        }
        // std rejects a zero socket timeout.
        if self.hold_read_timeout.is_zero() {
            return Err(BridgeError::Config {
                message: "hold_read_timeout must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Resolve `host:port` to the first socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| BridgeError::Config {
                message: format!("Invalid address {}:{}: {}", self.host, self.port, e),
            })?
            .next()
            .ok_or_else(|| BridgeError::Config {
                message: format!("Address {}:{} did not resolve", self.host, self.port),
            })
    }
}
