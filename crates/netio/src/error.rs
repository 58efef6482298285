//! Error types for link setup

use std::net::SocketAddr;
use thiserror::Error;

/// Result type alias for link setup operations
pub type Result<T> = std::result::Result<T, NetError>;

/// Errors returned while setting up a link or a listener
///
/// Per-connection failures after setup (accept, sniff, camouflage dial) are
/// logged and never surface through this type.
#[derive(Debug, Error)]
pub enum NetError {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Address did not resolve to any socket address
    #[error("Failed to resolve {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Listening socket could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Outbound dial failed
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Role was neither `connect` nor `listen`
    #[error("Invalid role: {0}")]
    InvalidRole(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
