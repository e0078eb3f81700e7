//! Idempotent storage for ingested activity events.
//!
//! The store is keyed by the client-generated [`EventId`]: re-delivery
//! of an already-stored event is a silent no-op, never an error. That
//! single property is what turns the protocol's at-least-once delivery
//! into effectively-once storage.
//!
//! Two implementations are provided: [`MemoryStore`] for tests and
//! ephemeral deployments, and [`EventLog`], a durable append-only file
//! store with an in-memory id index.

mod error;
mod log;
mod memory;

use serde::{Deserialize, Serialize};

use actigraph_types::{ActivityEvent, EventId, EventKind, UserId};

pub use error::{StoreError, StoreResult};
pub use log::EventLog;
pub use memory::MemoryStore;

/// Outcome of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// The event was new and has been stored.
    Stored,
    /// An event with this id was already present; nothing was written.
    Duplicate,
}

/// A persisted activity event row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Deduplication key.
    pub event_id: EventId,
    /// The user the event was ingested for.
    pub user_id: UserId,
    /// Event kind discriminator.
    pub kind: EventKind,
    /// Capture timestamp, milliseconds since epoch.
    pub timestamp: u64,
    /// Raw JSON payload as received on the wire.
    pub payload: String,
}

impl StoredEvent {
    /// Builds a row from a wire event and the session's user identity.
    pub fn from_event(user: &UserId, event: &ActivityEvent) -> StoreResult<Self> {
        Ok(Self {
            event_id: event.event_id(),
            user_id: user.clone(),
            kind: event.kind(),
            timestamp: event.timestamp(),
            payload: serde_json::to_string(event)?,
        })
    }
}

/// Durable sink for activity events with per-row idempotent upsert.
///
/// Implementations provide their own per-insert atomicity; callers
/// need no additional locking.
pub trait ActivityStore: Send + Sync {
    /// Inserts an event if its id is not already present.
    fn insert(&self, user: &UserId, event: &ActivityEvent) -> StoreResult<Insert>;

    /// Returns the number of stored events.
    fn len(&self) -> StoreResult<usize>;

    /// Returns true if no events are stored.
    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns all stored events for a user, in ingestion order.
    fn events_for(&self, user: &UserId) -> StoreResult<Vec<StoredEvent>>;
}
