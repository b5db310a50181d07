// SPDX-License-Identifier: Apache-2.0

//! Errors for the subscription engine.
//!
//! Only construction ([`crate::subscription::PersistentSubscription::new`])
//! surfaces an error to the caller. Every other kind is isolated where it
//! occurs: the engine logs it, drops it, and keeps serving the remaining
//! clients and collaborators. [`Error::BufferOverflow`] is the exception in
//! severity, not in propagation — it marks an internal invariant violation
//! and stops the engine.

use uuid::Uuid;

/// All errors that can occur in the subscription engine.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The subscription configuration was rejected at construction.
    #[error("Invalid subscription configuration: {0}")]
    Config(#[from] evsub_config::Error),

    /// An ack or nak referenced a correlation id with no registered client.
    /// Logged and ignored.
    #[error("Unknown client: no client registered for correlation {correlation_id}")]
    ClientUnknown {
        /// The unrecognized correlation id.
        correlation_id: Uuid,
    },

    /// An ack or nak referenced an event id that is not in-flight for that
    /// client. Logged and ignored; a dispatch of the same event to another
    /// client, if any, proceeds.
    #[error("Unknown event: event {event_id} is not in-flight for correlation {correlation_id}")]
    EventUnknown {
        /// The client that sent the ack or nak.
        correlation_id: Uuid,
        /// The event id that was not found in-flight.
        event_id: Uuid,
    },

    /// A durable checkpoint write reported failure. Logged; the next
    /// scheduled write retries the latest value.
    #[error("Checkpoint write failed at {checkpoint}: {details}")]
    CheckpointWriteFailed {
        /// The checkpoint value whose write failed.
        checkpoint: u64,
        /// The failure reported by the checkpoint writer.
        details: String,
    },

    /// A history read reported failure. Logged; the read is retried after a
    /// short backoff and the engine stays in catch-up.
    #[error("History read failed from event {from_event_number}: {details}")]
    ReadFailed {
        /// The event number the failed read started from.
        from_event_number: u64,
        /// The failure reported by the event loader.
        details: String,
    },

    /// The buffer exceeded its cap. This violates an internal invariant and
    /// is fatal: the engine transitions to `Stopped`.
    #[error("Buffer overflow: {size} events buffered, capacity {capacity}")]
    BufferOverflow {
        /// The observed segment size.
        size: usize,
        /// The configured segment capacity.
        capacity: usize,
    },
}
