// SPDX-License-Identifier: Apache-2.0

//! Event records as seen by the subscription engine.
//!
//! [`StreamEvent`] is the immutable record handed over by the log storage.
//! [`BufferedEvent`] wraps it with the bookkeeping the engine needs while the
//! event waits for dispatch; [`DispatchedEvent`] is the shape delivered to a
//! client's reply sink.

use bytes::Bytes;
use uuid::Uuid;

/// An opaque token identifying a position in the underlying log.
///
/// The engine never interprets the token; it only carries it so that live
/// positions can be compared by the collaborators that understand them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct LogPosition(u64);

impl LogPosition {
    /// Wraps a raw log position.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw position value.
    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

/// An immutable event record read from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    /// The event's dense, non-negative sequence number within its stream.
    pub event_number: u64,
    /// The event's unique identifier.
    pub event_id: Uuid,
    /// The application-defined event type.
    pub event_type: String,
    /// The event payload.
    pub data: Bytes,
    /// The event metadata.
    pub metadata: Bytes,
    /// The event's position in the underlying log.
    pub position: LogPosition,
}

/// Where a buffered event entered the engine from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    /// Paged in by the history reader from persistent storage.
    History,
    /// Pushed by the live tail feed.
    Live,
}

/// An event held by the engine between arrival and acknowledgement.
#[derive(Debug, Clone)]
pub struct BufferedEvent {
    /// The underlying event record.
    pub event: StreamEvent,
    /// Whether the event arrived from a history read or the live feed.
    pub source: EventSource,
    /// How many times delivery of this event has been retried.
    pub retry_count: u32,
}

impl BufferedEvent {
    /// Wraps a freshly arrived event with a zero retry count.
    #[must_use]
    pub fn new(event: StreamEvent, source: EventSource) -> Self {
        Self {
            event,
            source,
            retry_count: 0,
        }
    }

    /// The event number of the wrapped event.
    #[must_use]
    pub fn event_number(&self) -> u64 {
        self.event.event_number
    }

    /// The event id of the wrapped event.
    #[must_use]
    pub fn event_id(&self) -> Uuid {
        self.event.event_id
    }
}

/// The shape delivered to a client's reply sink.
///
/// The retry count is part of the delivery so consumers can detect redelivery
/// without comparing event ids themselves.
#[derive(Debug, Clone)]
pub struct DispatchedEvent {
    /// The event record.
    pub event: StreamEvent,
    /// How many times this delivery has been retried before.
    pub retry_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(n: u64) -> StreamEvent {
        StreamEvent {
            event_number: n,
            event_id: Uuid::new_v4(),
            event_type: "test-event".to_owned(),
            data: Bytes::from_static(b"{}"),
            metadata: Bytes::new(),
            position: LogPosition::new(n * 100),
        }
    }

    #[test]
    fn test_buffered_event_starts_unretried() {
        let buffered = BufferedEvent::new(sample_event(7), EventSource::History);
        assert_eq!(buffered.event_number(), 7);
        assert_eq!(buffered.retry_count, 0);
        assert_eq!(buffered.source, EventSource::History);
    }

    #[test]
    fn test_log_position_ordering() {
        assert!(LogPosition::new(1) < LogPosition::new(2));
        assert_eq!(LogPosition::new(5).raw(), 5);
    }
}
