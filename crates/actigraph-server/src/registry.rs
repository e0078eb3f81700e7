//! Connection registry tracking the live connection per user.
//!
//! Each authenticated user has at most one registered connection. A newer
//! connection for the same user replaces the older one. Unregistration is
//! guarded by the connection id so a slow-closing old connection cannot
//! evict its replacement.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use actigraph_types::UserId;
use actigraph_wire::ServerMessage;
use tokio::sync::mpsc;

/// Unique identifier for a single accepted connection.
///
/// Monotonically increasing for the lifetime of the server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next connection id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Handle to a registered connection: its id plus the outbound message queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub sender: mpsc::UnboundedSender<ServerMessage>,
}

/// Registry mapping authenticated users to their live connection.
#[derive(Debug, Default)]
pub struct Registry {
    connections: Mutex<HashMap<UserId, ConnectionHandle>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection for a user, replacing any previous one.
    ///
    /// Returns the handle of the connection that was displaced, if any.
    pub fn register(&self, user_id: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let mut connections = self.connections.lock().expect("registry lock poisoned");
        connections.insert(user_id, handle)
    }

    /// Removes the registration for `user_id` only if it still belongs to
    /// `connection_id`.
    ///
    /// Returns true if an entry was removed.
    pub fn unregister(&self, user_id: &UserId, connection_id: ConnectionId) -> bool {
        let mut connections = self.connections.lock().expect("registry lock poisoned");
        match connections.get(user_id) {
            Some(handle) if handle.id == connection_id => {
                connections.remove(user_id);
                true
            }
            _ => false,
        }
    }

    /// Sends a message to the user's live connection, if registered.
    ///
    /// Returns false if the user has no registered connection or its
    /// outbound queue is closed.
    pub fn send_to(&self, user_id: &UserId, message: ServerMessage) -> bool {
        let connections = self.connections.lock().expect("registry lock poisoned");
        match connections.get(user_id) {
            Some(handle) => handle.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Returns the number of registered connections.
    pub fn len(&self) -> usize {
        let connections = self.connections.lock().expect("registry lock poisoned");
        connections.len()
    }

    /// Returns true if no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
