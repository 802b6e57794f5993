//! Tunnel I/O errors

use thiserror::Error;

/// Errors surfaced by a tunnel
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The local side specification could not be parsed
    #[error("Invalid local port {0:?}")]
    InvalidLocalPort(String),

    /// Binding the local listener failed
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The listener stopped accepting connections
    #[error("Listener failed: {0}")]
    Accept(#[source] std::io::Error),

    /// Target could not be resolved from the profile
    #[error("Target resolution failed: {0}")]
    Resolve(#[from] pk_core::ConfigError),

    /// Other I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
