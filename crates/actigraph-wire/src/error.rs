//! Wire protocol error types.

use thiserror::Error;

/// Result type for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors that can occur while framing or decoding messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// A frame header announced a payload larger than the allowed maximum.
    #[error("frame of {len} bytes exceeds maximum of {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// The frame payload was not a valid protocol message.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}
