//! Wire protocol for the activity streaming connection.
//!
//! Messages are JSON objects discriminated by a `type` field, carried
//! in length-prefixed frames over a persistent TCP connection. The
//! codec is sans-io: framing works on [`bytes::BytesMut`] so the same
//! code serves the server's read loop and the agent's transport.

mod error;
mod frame;
mod message;

pub use error::{WireError, WireResult};
pub use frame::{FRAME_HEADER_SIZE, Frame, MAX_FRAME_SIZE};
pub use message::{ClientMessage, ServerMessage};
