//! # actigraph-agent: buffering activity agent
//!
//! The client half of the activity pipeline. Capture glue hands raw
//! [`ActivitySample`](actigraph_types::ActivitySample)s to an
//! [`AgentHandle`]; the agent stamps them, buffers them, and streams
//! them to the collector in periodic batches.
//!
//! The transport is deliberately forgiving: the collector being down
//! never loses events and never blocks capture. Batches are retried
//! until acknowledged, reconnects use capped exponential backoff, and
//! the server's id-based deduplication makes retries harmless.

mod agent;
mod backoff;
mod buffer;
mod error;

pub use agent::{AgentConfig, AgentHandle};
pub use backoff::Backoff;
pub use buffer::EventBuffer;
pub use error::{AgentError, AgentResult};
