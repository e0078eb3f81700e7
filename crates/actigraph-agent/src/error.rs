//! Agent error types.

use actigraph_wire::WireError;
use thiserror::Error;

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors that can occur in the agent transport.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Wire protocol error.
    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The collector closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// The agent task has stopped and no longer accepts commands.
    #[error("agent stopped")]
    Stopped,
}
