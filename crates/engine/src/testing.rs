// SPDX-License-Identifier: Apache-2.0

//! In-memory collaborator doubles for engine tests.
//!
//! Every double records what the engine asked of it; tests drive the
//! corresponding completion back into the engine themselves. Nothing here
//! spawns tasks or sleeps, so tests control time and ordering completely.

use crate::capabilities::{CheckpointReader, CheckpointWriter, EventLoader, ReplySink};
use crate::event::{DispatchedEvent, LogPosition, StreamEvent};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// Builds a stream event with deterministic fields derived from `n`.
#[must_use]
pub fn stream_event(n: u64) -> StreamEvent {
    StreamEvent {
        event_number: n,
        event_id: Uuid::new_v4(),
        event_type: "test-event".to_owned(),
        data: Bytes::from_static(b"{}"),
        metadata: Bytes::new(),
        position: LogPosition::new(n),
    }
}

/// Event loader double recording every `begin_load` request.
#[derive(Debug, Default, Clone)]
pub struct RecordingLoader {
    requests: Arc<Mutex<Vec<(u64, usize)>>>,
}

impl RecordingLoader {
    /// Creates a loader with no recorded requests.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(start, count)` requests seen so far.
    #[must_use]
    pub fn requests(&self) -> Vec<(u64, usize)> {
        self.requests.lock().clone()
    }

    /// The most recent request, if any.
    #[must_use]
    pub fn last_request(&self) -> Option<(u64, usize)> {
        self.requests.lock().last().copied()
    }
}

impl EventLoader for RecordingLoader {
    fn begin_load(&self, start_event_number: u64, count: usize, _resolve_link_tos: bool) {
        self.requests.lock().push((start_event_number, count));
    }
}

/// Checkpoint reader double recording every load request.
#[derive(Debug, Default, Clone)]
pub struct RecordingCheckpointReader {
    loads: Arc<Mutex<Vec<String>>>,
}

impl RecordingCheckpointReader {
    /// Creates a reader with no recorded requests.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of load requests seen.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.lock().len()
    }
}

impl CheckpointReader for RecordingCheckpointReader {
    fn begin_load_state(&self, subscription_id: &str) {
        self.loads.lock().push(subscription_id.to_owned());
    }
}

/// Checkpoint writer double recording every written value.
#[derive(Debug, Default, Clone)]
pub struct RecordingCheckpointWriter {
    writes: Arc<Mutex<Vec<u64>>>,
}

impl RecordingCheckpointWriter {
    /// Creates a writer with no recorded writes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All checkpoint values written so far, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<u64> {
        self.writes.lock().clone()
    }
}

impl CheckpointWriter for RecordingCheckpointWriter {
    fn begin_write_state(&self, _subscription_id: &str, checkpoint: u64) {
        self.writes.lock().push(checkpoint);
    }
}

/// Reply sink double collecting every delivered event.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<DispatchedEvent>>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events delivered so far.
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.events.lock().len()
    }

    /// The event numbers delivered so far, in order.
    #[must_use]
    pub fn event_numbers(&self) -> Vec<u64> {
        self.events.lock().iter().map(|e| e.event.event_number).collect()
    }

    /// The event ids delivered so far, in order.
    #[must_use]
    pub fn event_ids(&self) -> Vec<Uuid> {
        self.events.lock().iter().map(|e| e.event.event_id).collect()
    }

    /// The retry counts delivered so far, in order.
    #[must_use]
    pub fn retry_counts(&self) -> Vec<u32> {
        self.events.lock().iter().map(|e| e.retry_count).collect()
    }
}

impl ReplySink for RecordingSink {
    fn send(&self, event: DispatchedEvent) -> bool {
        self.events.lock().push(event);
        true
    }
}

/// Reply sink double that refuses every enqueue, simulating a gone client.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClosedSink;

impl ReplySink for ClosedSink {
    fn send(&self, _event: DispatchedEvent) -> bool {
        false
    }
}
