// SPDX-License-Identifier: Apache-2.0

//! The serial task that owns a subscription engine.
//!
//! [`SubscriptionActor::run`] is the only place engine state is touched: it
//! drains the mailbox in arrival order and fires the timer tick that drives
//! timeouts, read retries, and checkpoint-write scheduling. Everyone else —
//! connection handlers, the live feed, the collaborators posting their
//! completions — talks to the engine through a cloneable
//! [`SubscriptionHandle`].

use crate::capabilities::ReplySink;
use crate::event::StreamEvent;
use crate::message::EngineMsg;
use crate::subscription::{NakAction, PersistentSubscription};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Floor for the timer tick period.
const MIN_TICK: Duration = Duration::from_millis(10);

/// Ceiling for the timer tick period.
const MAX_TICK: Duration = Duration::from_secs(1);

/// A cloneable handle posting messages to a subscription engine's mailbox.
///
/// Every method is non-blocking and returns whether the message was posted;
/// `false` means the engine is gone, which callers treat the same way they
/// treat a stopped subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    tx: mpsc::UnboundedSender<EngineMsg>,
}

impl SubscriptionHandle {
    /// Posts a raw message.
    pub fn post(&self, msg: EngineMsg) -> bool {
        self.tx.send(msg).is_ok()
    }

    /// Registers a client in the group.
    pub fn add_client(
        &self,
        connection_id: Uuid,
        correlation_id: Uuid,
        reply_target: Box<dyn ReplySink>,
        allowed_outstanding: usize,
        from: impl Into<String>,
        user: impl Into<String>,
    ) -> bool {
        self.post(EngineMsg::AddClient {
            connection_id,
            correlation_id,
            reply_target,
            allowed_outstanding,
            from: from.into(),
            user: user.into(),
        })
    }

    /// Deregisters a client.
    pub fn remove_client(&self, correlation_id: Uuid) -> bool {
        self.post(EngineMsg::RemoveClient { correlation_id })
    }

    /// Acknowledges delivered events.
    pub fn ack(&self, correlation_id: Uuid, event_ids: Vec<Uuid>) -> bool {
        self.post(EngineMsg::Ack {
            correlation_id,
            event_ids,
        })
    }

    /// Refuses delivered events.
    pub fn nak(&self, correlation_id: Uuid, event_ids: Vec<Uuid>, action: NakAction) -> bool {
        self.post(EngineMsg::Nak {
            correlation_id,
            event_ids,
            action,
        })
    }

    /// Offers a live event from the tail feed.
    pub fn notify_live_event(&self, event: StreamEvent) -> bool {
        self.post(EngineMsg::LiveEvent(event))
    }

    /// Posts a history read completion.
    pub fn read_completed(&self, events: Vec<StreamEvent>, next_event_number: Option<u64>) -> bool {
        self.post(EngineMsg::ReadCompleted {
            events,
            next_event_number,
        })
    }

    /// Posts a history read failure.
    pub fn read_failed(&self, details: impl Into<String>) -> bool {
        self.post(EngineMsg::ReadFailed {
            details: details.into(),
        })
    }

    /// Posts the loaded checkpoint.
    pub fn checkpoint_loaded(&self, checkpoint: Option<u64>) -> bool {
        self.post(EngineMsg::CheckpointLoaded(checkpoint))
    }

    /// Posts a checkpoint write completion.
    pub fn checkpoint_written(&self, result: Result<(), String>) -> bool {
        self.post(EngineMsg::CheckpointWritten(result))
    }

    /// Requeues every parked event.
    pub fn replay_parked(&self) -> bool {
        self.post(EngineMsg::ReplayParked)
    }

    /// Stops the engine.
    pub fn stop(&self) -> bool {
        self.post(EngineMsg::Stop)
    }
}

/// Owns a [`PersistentSubscription`] and its mailbox.
pub struct SubscriptionActor {
    engine: PersistentSubscription,
    rx: mpsc::UnboundedReceiver<EngineMsg>,
}

impl SubscriptionActor {
    /// Wraps an engine, returning the actor and the handle that feeds it.
    #[must_use]
    pub fn new(engine: PersistentSubscription) -> (Self, SubscriptionHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { engine, rx }, SubscriptionHandle { tx })
    }

    /// The tick period for the engine's ack timeout: a tenth of the timeout,
    /// clamped to `[10ms, 1s]`.
    #[must_use]
    pub fn tick_period(timeout: Duration) -> Duration {
        (timeout / 10).clamp(MIN_TICK, MAX_TICK)
    }

    /// Runs the serial loop until the engine stops or every handle is gone.
    ///
    /// Consumes the actor; the engine is returned so a directory can inspect
    /// final state (e.g. the parked list) before dropping it.
    pub async fn run(mut self) -> PersistentSubscription {
        let period = Self::tick_period(self.engine.config().timeout);
        let mut ticks = tokio::time::interval(period);
        ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => {
                            let stop = msg.is_stop();
                            self.apply(msg);
                            if stop {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                subscription = %self.engine.subscription_id(),
                                "all handles dropped, stopping"
                            );
                            self.engine.stop();
                            break;
                        }
                    }
                }
                _ = ticks.tick() => {
                    self.engine.tick(Instant::now());
                }
            }
        }
        self.engine
    }

    fn apply(&mut self, msg: EngineMsg) {
        let now = Instant::now();
        match msg {
            EngineMsg::AddClient {
                connection_id,
                correlation_id,
                reply_target,
                allowed_outstanding,
                from,
                user,
            } => self.engine.add_client(
                connection_id,
                correlation_id,
                reply_target,
                allowed_outstanding,
                from,
                user,
                now,
            ),
            EngineMsg::RemoveClient { correlation_id } => {
                self.engine.remove_client(correlation_id, now);
            }
            EngineMsg::Ack {
                correlation_id,
                event_ids,
            } => self.engine.ack(correlation_id, &event_ids, now),
            EngineMsg::Nak {
                correlation_id,
                event_ids,
                action,
            } => self.engine.nak(correlation_id, &event_ids, action, now),
            EngineMsg::LiveEvent(event) => self.engine.notify_live_event(event, now),
            EngineMsg::ReadCompleted {
                events,
                next_event_number,
            } => self.engine.handle_read_completed(events, next_event_number, now),
            EngineMsg::ReadFailed { details } => self.engine.handle_read_failed(details, now),
            EngineMsg::CheckpointLoaded(checkpoint) => {
                self.engine.handle_checkpoint_loaded(checkpoint, now);
            }
            EngineMsg::CheckpointWritten(result) => {
                self.engine.handle_checkpoint_written(result, now);
            }
            EngineMsg::ReplayParked => self.engine.replay_parked(now),
            EngineMsg::Stop => self.engine.stop(),
        }
    }
}
