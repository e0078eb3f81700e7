//! In-memory store, for tests and ephemeral deployments.

use std::collections::HashSet;
use std::sync::Mutex;

use actigraph_types::{ActivityEvent, EventId, UserId};

use crate::{ActivityStore, Insert, StoreResult, StoredEvent};

/// Mutex-guarded in-memory event store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    ids: HashSet<EventId>,
    rows: Vec<StoredEvent>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActivityStore for MemoryStore {
    fn insert(&self, user: &UserId, event: &ActivityEvent) -> StoreResult<Insert> {
        let row = StoredEvent::from_event(user, event)?;
        let mut inner = self.inner.lock().expect("store lock poisoned");

        if !inner.ids.insert(row.event_id) {
            return Ok(Insert::Duplicate);
        }
        inner.rows.push(row);
        Ok(Insert::Stored)
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.inner.lock().expect("store lock poisoned").rows.len())
    }

    fn events_for(&self, user: &UserId) -> StoreResult<Vec<StoredEvent>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner
            .rows
            .iter()
            .filter(|row| &row.user_id == user)
            .cloned()
            .collect())
    }
}
