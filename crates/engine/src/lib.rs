// SPDX-License-Identifier: Apache-2.0

//! Persistent subscription engine.
//!
//! A persistent subscription is a server-side cursor over an append-only
//! event stream, shared by a group of competing consumer clients. Each event
//! is dispatched to exactly one client in the group; the engine tracks
//! acknowledgements, retries on timeout, parks poisonous events, and durably
//! checkpoints its progress so the group survives restarts and failover.
//!
//! The engine first catches up from persistent storage through paged reads,
//! then hands over to the live push feed without gap or duplicate. Delivery
//! is at-least-once with idempotent checkpointing; ordering is preserved on
//! the buffer side only — across clients the group sees events out of order
//! under parallel consumption.
//!
//! [`subscription::PersistentSubscription`] is the single-owner state
//! machine; [`actor::SubscriptionActor`] runs it as a serial task fed by
//! [`message::EngineMsg`] mailbox messages; [`capabilities`] defines the
//! interfaces the log storage, checkpoint store, and client transports plug
//! into.

pub mod actor;
pub mod buffer;
pub mod capabilities;
pub mod checkpoint;
pub mod clients;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod message;
pub mod metrics;
pub mod reader;
pub mod retry;
pub mod subscription;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use evsub_config as config;

pub use actor::{SubscriptionActor, SubscriptionHandle};
pub use capabilities::{CheckpointReader, CheckpointWriter, EventLoader, ReplySink};
pub use error::Error;
pub use event::{BufferedEvent, DispatchedEvent, EventSource, LogPosition, StreamEvent};
pub use message::EngineMsg;
pub use subscription::{
    NakAction, PersistentSubscription, SubscriptionInfo, SubscriptionState,
};
