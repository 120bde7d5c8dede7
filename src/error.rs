//! Error types for process bootstrap and the servers.
//!
//! Admission-level failures never surface here: they are rendered into the
//! admission response by the webhook handler.

use thiserror::Error;

/// Error type for starting and running the webhook
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes client error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Invalid process configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS certificate or key could not be loaded
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// An HTTP server stopped with an error
    #[error("Server error: {0}")]
    Server(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for bootstrap operations
pub type Result<T> = std::result::Result<T, Error>;
