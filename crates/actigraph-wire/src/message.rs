//! Protocol message types.
//!
//! Field names follow the reference wire format: `batchId`, `eventId`
//! and friends are camelCase JSON, discriminated by `type`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use actigraph_types::{ActivityEvent, BatchId};

use crate::error::WireResult;
use crate::frame::Frame;

/// Messages sent by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authentication handshake, first message on every connection.
    Auth { token: String },
    /// One flush's worth of buffered events.
    #[serde(rename_all = "camelCase")]
    ActivityBatch {
        events: Vec<ActivityEvent>,
        batch_id: BatchId,
    },
}

/// Messages sent by the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted; the session is authenticated.
    AuthOk,
    /// Handshake rejected; the agent is expected to close.
    AuthFail { reason: String },
    /// Batch received and ingested; carries the batch's correlation id.
    #[serde(rename_all = "camelCase")]
    BatchAck { batch_id: BatchId },
    /// Per-message protocol error; the session stays open.
    Error { message: String },
}

impl ClientMessage {
    /// Decodes a client message from a frame payload.
    pub fn from_frame(frame: &Frame) -> WireResult<Self> {
        Ok(serde_json::from_slice(frame.payload())?)
    }

    /// Encodes this message into a frame.
    pub fn to_frame(&self) -> WireResult<Frame> {
        let payload = serde_json::to_vec(self)?;
        Ok(Frame::new(Bytes::from(payload)))
    }
}

impl ServerMessage {
    /// Decodes a server message from a frame payload.
    pub fn from_frame(frame: &Frame) -> WireResult<Self> {
        Ok(serde_json::from_slice(frame.payload())?)
    }

    /// Encodes this message into a frame.
    pub fn to_frame(&self) -> WireResult<Frame> {
        let payload = serde_json::to_vec(self)?;
        Ok(Frame::new(Bytes::from(payload)))
    }
}
