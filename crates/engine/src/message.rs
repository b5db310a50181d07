// SPDX-License-Identifier: Apache-2.0

//! Messages posted to a subscription engine's mailbox.
//!
//! Everything that reaches the engine — client traffic, live pushes, and
//! collaborator completions alike — arrives as one of these messages and is
//! processed in arrival order on the engine's serial task. Collaborators hold
//! a [`crate::actor::SubscriptionHandle`] and post completions instead of
//! calling into engine state.

use crate::capabilities::ReplySink;
use crate::event::StreamEvent;
use crate::subscription::NakAction;
use uuid::Uuid;

/// A message processed by the subscription engine's serial loop.
pub enum EngineMsg {
    /// Registers a client in the group and triggers dispatch.
    AddClient {
        /// The transport connection the client joined on.
        connection_id: Uuid,
        /// The identifier the client correlates acks and naks with.
        correlation_id: Uuid,
        /// The client's delivery sink.
        reply_target: Box<dyn ReplySink>,
        /// Maximum number of unacknowledged events the client accepts.
        allowed_outstanding: usize,
        /// The remote endpoint the client connected from.
        from: String,
        /// The authenticated user the client connected as.
        user: String,
    },

    /// Deregisters a client; its in-flight events are requeued.
    RemoveClient {
        /// The correlation id the client registered with.
        correlation_id: Uuid,
    },

    /// Acknowledges delivered events.
    Ack {
        /// The acknowledging client.
        correlation_id: Uuid,
        /// The acknowledged event ids.
        event_ids: Vec<Uuid>,
    },

    /// Refuses delivered events with the requested action.
    Nak {
        /// The refusing client.
        correlation_id: Uuid,
        /// The refused event ids.
        event_ids: Vec<Uuid>,
        /// What to do with the refused events.
        action: NakAction,
    },

    /// Offers an event from the live tail feed.
    LiveEvent(StreamEvent),

    /// Completion of a history read issued through the event loader.
    ReadCompleted {
        /// The page of events, ordered by ascending event number.
        events: Vec<StreamEvent>,
        /// The position the next read starts from, or `None` once the read
        /// reached the live tail.
        next_event_number: Option<u64>,
    },

    /// Failure of a history read; retried after a short backoff.
    ReadFailed {
        /// The failure reported by the event loader.
        details: String,
    },

    /// Completion of the startup checkpoint load, posted exactly once.
    CheckpointLoaded(Option<u64>),

    /// Completion of a durable checkpoint write.
    CheckpointWritten(Result<(), String>),

    /// Requeues every parked event with a fresh retry count.
    ReplayParked,

    /// Stops the engine after a final checkpoint write attempt.
    Stop,
}

impl EngineMsg {
    /// Returns `true` if this message stops the engine.
    #[must_use]
    pub const fn is_stop(&self) -> bool {
        matches!(self, EngineMsg::Stop)
    }
}

impl std::fmt::Debug for EngineMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineMsg::AddClient {
                connection_id,
                correlation_id,
                allowed_outstanding,
                ..
            } => f
                .debug_struct("AddClient")
                .field("connection_id", connection_id)
                .field("correlation_id", correlation_id)
                .field("allowed_outstanding", allowed_outstanding)
                .finish_non_exhaustive(),
            EngineMsg::RemoveClient { correlation_id } => f
                .debug_struct("RemoveClient")
                .field("correlation_id", correlation_id)
                .finish(),
            EngineMsg::Ack {
                correlation_id,
                event_ids,
            } => f
                .debug_struct("Ack")
                .field("correlation_id", correlation_id)
                .field("events", &event_ids.len())
                .finish(),
            EngineMsg::Nak {
                correlation_id,
                event_ids,
                action,
            } => f
                .debug_struct("Nak")
                .field("correlation_id", correlation_id)
                .field("events", &event_ids.len())
                .field("action", action)
                .finish(),
            EngineMsg::LiveEvent(event) => f
                .debug_tuple("LiveEvent")
                .field(&event.event_number)
                .finish(),
            EngineMsg::ReadCompleted {
                events,
                next_event_number,
            } => f
                .debug_struct("ReadCompleted")
                .field("events", &events.len())
                .field("next_event_number", next_event_number)
                .finish(),
            EngineMsg::ReadFailed { details } => {
                f.debug_struct("ReadFailed").field("details", details).finish()
            }
            EngineMsg::CheckpointLoaded(checkpoint) => {
                f.debug_tuple("CheckpointLoaded").field(checkpoint).finish()
            }
            EngineMsg::CheckpointWritten(result) => {
                f.debug_tuple("CheckpointWritten").field(result).finish()
            }
            EngineMsg::ReplayParked => f.write_str("ReplayParked"),
            EngineMsg::Stop => f.write_str("Stop"),
        }
    }
}
