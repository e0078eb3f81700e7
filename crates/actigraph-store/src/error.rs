//! Store error types.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error on the backing file.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Record encoding or decoding failed.
    #[error("record codec error: {0}")]
    Codec(#[from] postcard::Error),

    /// Event payload could not be serialized.
    #[error("payload serialization error: {0}")]
    Payload(#[from] serde_json::Error),
}
