//! Error types for the bridge.
//!
//! [`BridgeError`] covers transport, framing and client-side failures.
//! Request-level failures that end up on the wire as error responses are
//! modelled separately by [`crate::failure::Failure`].

use std::io::ErrorKind;
use std::net::SocketAddr;
use thiserror::Error;

/// Main error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    // Transport errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Peer closed the connection")]
    PeerClosed,

    #[error("No client connected")]
    NotConnected,

    #[error("Interrupted by shutdown")]
    Interrupted,

    // Framing errors
    #[error("Message size {len} exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Client-side errors
    #[error("Remote call failed:\n{traceback}")]
    Remote { traceback: String },

    #[error("Mismatched response: expected id={expected}, got id={actual}")]
    ResponseMismatch { expected: u64, actual: String },

    #[error("hold() does not support nesting")]
    HoldNesting,

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl BridgeError {
    /// Create a bind error for the given address.
    pub fn bind(addr: SocketAddr, source: std::io::Error) -> Self {
        BridgeError::Bind {
            addr: addr.to_string(),
            source,
        }
    }

    /// Check if this error is a retryable "no progress" condition.
    ///
    /// Would-block, timeouts and interrupted syscalls are normal on the
    /// non-blocking and hold-mode paths. Everything else is fatal to the
    /// connection.
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::Io {
                source: Some(err), ..
            } => is_transient_io(err),
            _ => false,
        }
    }

    /// Check if this error means the current connection is unusable.
    pub fn is_connection_fatal(&self) -> bool {
        match self {
            BridgeError::PeerClosed | BridgeError::NotConnected | BridgeError::Interrupted => true,
            BridgeError::FrameTooLarge { .. } => true,
            BridgeError::Io { .. } => !self.is_transient(),
            _ => false,
        }
    }
}

/// Classify a raw IO error as transient.
pub(crate) fn is_transient_io(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}
