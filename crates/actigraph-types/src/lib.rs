//! Shared identifiers and the activity event model.
//!
//! Everything that crosses a crate boundary lives here: the event
//! discriminated union, the newtype identifiers used as map and dedup
//! keys, and the coarse connection status surfaced to the UI layer.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of key codes retained in a key event's recent-keys ring.
pub const RECENT_KEYS_MAX: usize = 10;

/// Client-generated unique event identifier.
///
/// Immutable for the lifetime of the event and used as the server-side
/// deduplication key: re-delivery of the same `EventId` must be a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Correlation identifier for one flush attempt.
///
/// Unique per attempt; exists only on the wire and in the client's
/// awaiting-ack slot, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// User identity, as carried in token claims and registry keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user identity from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A captured input-activity event, stamped with identity and time.
///
/// Timestamps are milliseconds since the Unix epoch, monotonic per
/// source but not globally ordered across reconnects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityEvent {
    /// Cumulative mouse movement with last known coordinates.
    #[serde(rename_all = "camelCase")]
    Mouse {
        event_id: EventId,
        timestamp: u64,
        x: i32,
        y: i32,
        movements: u64,
    },
    /// Cumulative keystroke count with a bounded ring of recent key codes.
    #[serde(rename_all = "camelCase")]
    Key {
        event_id: EventId,
        timestamp: u64,
        keystrokes: u64,
        recent_keys: Vec<u16>,
    },
}

impl ActivityEvent {
    /// Returns the event's deduplication key.
    pub fn event_id(&self) -> EventId {
        match self {
            Self::Mouse { event_id, .. } | Self::Key { event_id, .. } => *event_id,
        }
    }

    /// Returns the capture timestamp in milliseconds since epoch.
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::Mouse { timestamp, .. } | Self::Key { timestamp, .. } => *timestamp,
        }
    }

    /// Returns the event's kind discriminator.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Mouse { .. } => EventKind::Mouse,
            Self::Key { .. } => EventKind::Key,
        }
    }
}

/// Event kind discriminator, matching the wire `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Mouse,
    Key,
}

impl EventKind {
    /// Returns the wire representation of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mouse => "mouse",
            Self::Key => "key",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capture-side payload, before the core assigns identity and time.
///
/// The capture source delivers one of these per observed input action;
/// [`ActivitySample::stamp`] turns it into a wire-ready event.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivitySample {
    Mouse {
        x: i32,
        y: i32,
        movements: u64,
    },
    Key {
        keystrokes: u64,
        recent_keys: Vec<u16>,
    },
}

impl ActivitySample {
    /// Stamps this sample with a fresh [`EventId`] and the current time.
    ///
    /// The recent-keys ring is clamped to its last [`RECENT_KEYS_MAX`]
    /// entries; the capture glue is trusted but not relied upon.
    pub fn stamp(self) -> ActivityEvent {
        let event_id = EventId::generate();
        let timestamp = now_millis();
        match self {
            Self::Mouse { x, y, movements } => ActivityEvent::Mouse {
                event_id,
                timestamp,
                x,
                y,
                movements,
            },
            Self::Key {
                keystrokes,
                mut recent_keys,
            } => {
                if recent_keys.len() > RECENT_KEYS_MAX {
                    recent_keys.drain(..recent_keys.len() - RECENT_KEYS_MAX);
                }
                ActivityEvent::Key {
                    event_id,
                    timestamp,
                    keystrokes,
                    recent_keys,
                }
            }
        }
    }
}

/// Coarse connection status surfaced to the UI layer.
///
/// Individual message-level failures are invisible by design; this
/// three-valued status is the only user-visible signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Returns the current time as milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before Unix epoch")
        .as_millis() as u64
}
