// SPDX-License-Identifier: Apache-2.0

//! Deadline index over in-flight dispatches.
//!
//! The tracker never owns an event: the owning client's in-flight table is
//! canonical. Entries here are `(deadline, event id) → correlation id`
//! back-references so that the timeout scan on each timer tick walks only the
//! expired prefix of a time-ordered map instead of every in-flight entry.

use std::collections::BTreeMap;
use std::time::Instant;
use uuid::Uuid;

/// An in-flight entry whose ack deadline has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiredEntry {
    /// The event whose delivery timed out.
    pub event_id: Uuid,
    /// The client the event was dispatched to.
    pub correlation_id: Uuid,
}

/// Time-ordered index of in-flight dispatches.
#[derive(Debug, Default)]
pub struct RetryTracker {
    deadlines: BTreeMap<(Instant, Uuid), Uuid>,
}

impl RetryTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a dispatch with its ack deadline.
    pub fn insert(&mut self, deadline: Instant, event_id: Uuid, correlation_id: Uuid) {
        let _previous = self.deadlines.insert((deadline, event_id), correlation_id);
    }

    /// Removes the entry for a dispatch that was acked, nak'd, or requeued.
    /// The deadline comes from the owning client's in-flight entry.
    pub fn remove(&mut self, deadline: Instant, event_id: Uuid) {
        let _removed = self.deadlines.remove(&(deadline, event_id));
    }

    /// Removes and returns every entry whose deadline is at or before `now`.
    pub fn drain_expired(&mut self, now: Instant) -> Vec<ExpiredEntry> {
        let keys: Vec<(Instant, Uuid)> = self
            .deadlines
            .range(..=(now, Uuid::max()))
            .map(|(&key, _)| key)
            .collect();
        let mut expired = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(correlation_id) = self.deadlines.remove(&key) {
                expired.push(ExpiredEntry {
                    event_id: key.1,
                    correlation_id,
                });
            }
        }
        expired
    }

    /// Number of tracked in-flight dispatches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Whether nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
