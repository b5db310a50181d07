// SPDX-License-Identifier: Apache-2.0

//! Capability interfaces the engine's collaborators must satisfy.
//!
//! The engine never blocks on a collaborator. Each `begin_*` call is a
//! non-blocking request; the implementation performs the work asynchronously
//! and posts the completion back to the engine as a mailbox message
//! (see [`crate::message::EngineMsg`]), never as a synchronous callback into
//! engine state. Implementations receive a [`crate::actor::SubscriptionHandle`]
//! (or any other way to reach the mailbox) at wiring time.
//!
//! Collaborators may fail or never complete; the engine tolerates both. A
//! read that never completes is retried after the in-flight timeout recycles
//! its need; a reply sink that is gone simply reports the delivery as not
//! enqueued.

use crate::event::DispatchedEvent;

/// Paged access to the persisted stream, used during catch-up.
///
/// At most one `begin_load` is outstanding per subscription. The
/// implementation posts [`crate::message::EngineMsg::ReadCompleted`] with the
/// events ordered by ascending event number and the next number to read from
/// (`None` once the read reached the live tail), or
/// [`crate::message::EngineMsg::ReadFailed`] on error.
pub trait EventLoader: Send + Sync {
    /// Requests a page of up to `count` events starting at
    /// `start_event_number`. `resolve_link_tos` asks the loader to resolve
    /// link events to their targets.
    fn begin_load(&self, start_event_number: u64, count: usize, resolve_link_tos: bool);
}

/// Durable checkpoint loading, consulted once at startup.
///
/// The implementation posts [`crate::message::EngineMsg::CheckpointLoaded`]
/// exactly once, with the persisted checkpoint or `None` if the subscription
/// has never checkpointed.
pub trait CheckpointReader: Send + Sync {
    /// Requests the persisted checkpoint for `subscription_id`.
    fn begin_load_state(&self, subscription_id: &str);
}

/// Durable checkpoint writing.
///
/// Calls are serialized by the engine: a new write is only issued once the
/// previous one posted [`crate::message::EngineMsg::CheckpointWritten`]. The
/// engine treats writes as best-effort; a failed write is retried with the
/// latest value on the next scheduled write.
pub trait CheckpointWriter: Send + Sync {
    /// Requests a durable write of `checkpoint` for `subscription_id`.
    fn begin_write_state(&self, subscription_id: &str, checkpoint: u64);
}

/// A client's delivery sink.
///
/// `send` must be a non-blocking enqueue. The return value only reports
/// whether the event was enqueued; delivery acknowledgement always comes back
/// separately as ack/nak messages.
pub trait ReplySink: Send {
    /// Enqueues an event for delivery to the client. Returns `false` when the
    /// sink is gone; the engine leaves the event in-flight and lets the ack
    /// timeout recycle it.
    fn send(&self, event: DispatchedEvent) -> bool;
}

impl ReplySink for tokio::sync::mpsc::UnboundedSender<DispatchedEvent> {
    fn send(&self, event: DispatchedEvent) -> bool {
        tokio::sync::mpsc::UnboundedSender::send(self, event).is_ok()
    }
}
