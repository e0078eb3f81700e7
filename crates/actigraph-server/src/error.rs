//! Server error types.

use actigraph_store::StoreError;
use actigraph_wire::WireError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur during server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Wire protocol error.
    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Bind failed.
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: String,
        source: std::io::Error,
    },

    /// Authentication failed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Server shutdown.
    #[error("server shutdown")]
    Shutdown,
}
