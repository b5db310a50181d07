// SPDX-License-Identifier: Apache-2.0

//! The set of connected clients in a subscription group.
//!
//! The registry is insertion-ordered; dispatch policies walk it by index and
//! keep their cursors against that order. Each client owns its in-flight
//! table — the canonical record of what has been dispatched to it and not yet
//! acknowledged. The retry tracker holds only deadline back-references into
//! these tables.

use crate::capabilities::ReplySink;
use crate::event::{BufferedEvent, DispatchedEvent};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;
use uuid::Uuid;

/// A dispatched event awaiting acknowledgement.
#[derive(Debug)]
pub struct InFlightEntry {
    /// The dispatched event, with its retry count at dispatch time.
    pub event: BufferedEvent,
    /// When the event was handed to the reply sink.
    pub dispatched_at: Instant,
    /// When the delivery times out and is recycled.
    pub deadline: Instant,
}

/// A connected client in the group.
pub struct Client {
    /// The transport connection the client joined on.
    pub connection_id: Uuid,
    /// The identifier the client correlates acks and naks with.
    pub correlation_id: Uuid,
    /// Maximum number of unacknowledged events this client accepts.
    pub allowed_outstanding: usize,
    /// The remote endpoint the client connected from.
    pub from: String,
    /// The authenticated user the client connected as.
    pub user: String,
    reply_target: Box<dyn ReplySink>,
    in_flight: HashMap<Uuid, InFlightEntry>,
}

impl Client {
    /// Creates a client with an empty in-flight table.
    #[must_use]
    pub fn new(
        connection_id: Uuid,
        correlation_id: Uuid,
        reply_target: Box<dyn ReplySink>,
        allowed_outstanding: usize,
        from: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            connection_id,
            correlation_id,
            allowed_outstanding,
            from: from.into(),
            user: user.into(),
            reply_target,
            in_flight: HashMap::new(),
        }
    }

    /// Whether the client can accept another dispatch.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.in_flight.len() < self.allowed_outstanding
    }

    /// Number of unacknowledged events currently held by this client.
    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Records an in-flight entry and enqueues the event on the reply sink.
    ///
    /// Returns whether the sink accepted the enqueue. The entry is recorded
    /// either way: a gone sink is indistinguishable from a slow one, and the
    /// ack timeout recycles the event in both cases.
    pub fn dispatch(&mut self, event: BufferedEvent, now: Instant, deadline: Instant) -> bool {
        let delivery = DispatchedEvent {
            event: event.event.clone(),
            retry_count: event.retry_count,
        };
        let _previous = self.in_flight.insert(
            event.event_id(),
            InFlightEntry {
                event,
                dispatched_at: now,
                deadline,
            },
        );
        self.reply_target.send(delivery)
    }

    /// Removes and returns the in-flight entry for `event_id`, if present.
    pub fn take_in_flight(&mut self, event_id: Uuid) -> Option<InFlightEntry> {
        self.in_flight.remove(&event_id)
    }

    /// Drains the whole in-flight table, e.g. when the client disconnects.
    pub fn drain_in_flight(&mut self) -> Vec<InFlightEntry> {
        self.in_flight.drain().map(|(_, entry)| entry).collect()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("connection_id", &self.connection_id)
            .field("correlation_id", &self.correlation_id)
            .field("allowed_outstanding", &self.allowed_outstanding)
            .field("from", &self.from)
            .field("user", &self.user)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

/// Insertion-ordered set of connected clients.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Vec<Client>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a client, idempotent by `(connection_id, correlation_id)`.
    /// Returns `false` when that pair is already registered.
    pub fn add(&mut self, client: Client) -> bool {
        let duplicate = self.clients.iter().any(|c| {
            c.connection_id == client.connection_id && c.correlation_id == client.correlation_id
        });
        if duplicate {
            return false;
        }
        self.clients.push(client);
        true
    }

    /// Removes the client with `correlation_id`, returning it together with
    /// the index it occupied so dispatch cursors can be adjusted.
    pub fn remove(&mut self, correlation_id: Uuid) -> Option<(usize, Client)> {
        let index = self
            .clients
            .iter()
            .position(|c| c.correlation_id == correlation_id)?;
        Some((index, self.clients.remove(index)))
    }

    /// The client registered with `correlation_id`, if any.
    pub fn get_mut(&mut self, correlation_id: Uuid) -> Option<&mut Client> {
        self.clients
            .iter_mut()
            .find(|c| c.correlation_id == correlation_id)
    }

    /// The client at `index` in insertion order.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Client> {
        self.clients.get(index)
    }

    /// Mutable access to the client at `index` in insertion order.
    pub fn get_index_mut(&mut self, index: usize) -> Option<&mut Client> {
        self.clients.get_mut(index)
    }

    /// Number of connected clients.
    #[must_use]
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Whether any client is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Iterates clients in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.clients.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventSource, LogPosition, StreamEvent};
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct CollectingSink(Arc<Mutex<Vec<DispatchedEvent>>>);

    impl ReplySink for CollectingSink {
        fn send(&self, event: DispatchedEvent) -> bool {
            self.0.lock().push(event);
            true
        }
    }

    fn client(allowed: usize) -> (Client, Arc<Mutex<Vec<DispatchedEvent>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let client = Client::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Box::new(CollectingSink(received.clone())),
            allowed,
            "127.0.0.1:50000",
            "test-user",
        );
        (client, received)
    }

    fn buffered(n: u64) -> BufferedEvent {
        BufferedEvent::new(
            StreamEvent {
                event_number: n,
                event_id: Uuid::new_v4(),
                event_type: "test".to_owned(),
                data: Bytes::new(),
                metadata: Bytes::new(),
                position: LogPosition::new(n),
            },
            EventSource::History,
        )
    }

    #[test]
    fn test_capacity_tracks_in_flight() {
        let (mut client, received) = client(2);
        let now = Instant::now();
        let deadline = now + std::time::Duration::from_secs(30);

        assert!(client.has_capacity());
        assert!(client.dispatch(buffered(0), now, deadline));
        assert!(client.has_capacity());
        assert!(client.dispatch(buffered(1), now, deadline));
        assert!(!client.has_capacity());
        assert_eq!(received.lock().len(), 2);
    }

    #[test]
    fn test_take_in_flight_frees_capacity() {
        let (mut client, _received) = client(1);
        let now = Instant::now();
        let deadline = now + std::time::Duration::from_secs(30);

        let event = buffered(0);
        let event_id = event.event_id();
        assert!(client.dispatch(event, now, deadline));
        assert!(!client.has_capacity());

        let entry = client.take_in_flight(event_id).expect("in flight");
        assert_eq!(entry.event.event_number(), 0);
        assert!(client.has_capacity());
        assert!(client.take_in_flight(event_id).is_none());
    }

    #[test]
    fn test_registry_add_is_idempotent() {
        let mut registry = ClientRegistry::new();
        let connection_id = Uuid::new_v4();
        let correlation_id = Uuid::new_v4();

        let make = |conn: Uuid, corr: Uuid| {
            Client::new(
                conn,
                corr,
                Box::new(CollectingSink(Arc::new(Mutex::new(Vec::new())))),
                10,
                "addr",
                "user",
            )
        };

        assert!(registry.add(make(connection_id, correlation_id)));
        assert!(!registry.add(make(connection_id, correlation_id)));
        assert!(registry.add(make(connection_id, Uuid::new_v4())));
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn test_registry_remove_returns_index() {
        let mut registry = ClientRegistry::new();
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            let _ = registry.add(Client::new(
                Uuid::new_v4(),
                *id,
                Box::new(CollectingSink(Arc::new(Mutex::new(Vec::new())))),
                10,
                "addr",
                "user",
            ));
        }

        let (index, removed) = registry.remove(ids[1]).expect("registered");
        assert_eq!(index, 1);
        assert_eq!(removed.correlation_id, ids[1]);
        assert_eq!(registry.count(), 2);
        assert!(registry.remove(ids[1]).is_none());
    }
}
