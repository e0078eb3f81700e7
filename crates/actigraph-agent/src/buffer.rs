//! Client-side event buffer with at-least-once flush semantics.
//!
//! Events are appended unconditionally, connected or not. A flush
//! snapshots the whole buffer under a fresh batch id; at most one batch
//! is in flight at a time. Events are only retired after an ack, and
//! even then only those older than the retention window, so a batch
//! lost on the wire is simply re-sent on the next flush. The server
//! deduplicates by event id, which makes the re-send harmless.

use std::time::Duration;

use actigraph_types::{ActivityEvent, BatchId};

/// Buffer of captured events awaiting acknowledgement.
#[derive(Debug)]
pub struct EventBuffer {
    events: Vec<ActivityEvent>,
    pending: Option<BatchId>,
    retention: Duration,
}

impl EventBuffer {
    /// Creates an empty buffer with the given retention window.
    pub fn new(retention: Duration) -> Self {
        Self {
            events: Vec::new(),
            pending: None,
            retention,
        }
    }

    /// Appends a captured event. Always succeeds; the buffer grows
    /// without bound while the collector is unreachable.
    pub fn record(&mut self, event: ActivityEvent) {
        self.events.push(event);
    }

    /// Starts a flush: snapshots the buffer under a fresh batch id.
    ///
    /// Returns `None` if the buffer is empty or a batch is already in
    /// flight. The events stay buffered until acknowledged.
    pub fn begin_flush(&mut self) -> Option<(BatchId, Vec<ActivityEvent>)> {
        if self.pending.is_some() || self.events.is_empty() {
            return None;
        }
        let batch_id = BatchId::generate();
        self.pending = Some(batch_id);
        Some((batch_id, self.events.clone()))
    }

    /// Handles a batch acknowledgement.
    ///
    /// An ack for the in-flight batch clears the pending slot and
    /// retires events older than the retention window as of `now`
    /// (milliseconds since epoch). An ack for any other batch id is
    /// stale and ignored. Returns true if the ack was accepted.
    pub fn acknowledge(&mut self, batch_id: BatchId, now: u64) -> bool {
        if self.pending != Some(batch_id) {
            return false;
        }
        self.pending = None;

        let cutoff = now.saturating_sub(self.retention.as_millis() as u64);
        self.events.retain(|e| e.timestamp() >= cutoff);
        true
    }

    /// Forgets the in-flight batch without retiring anything.
    ///
    /// Called on connection loss: the ack is never coming, so the next
    /// flush must be allowed to re-send.
    pub fn clear_pending(&mut self) {
        self.pending = None;
    }

    /// Returns true if a batch is awaiting acknowledgement.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Returns the number of buffered events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if no events are buffered.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
