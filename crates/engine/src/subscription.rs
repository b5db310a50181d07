// SPDX-License-Identifier: Apache-2.0

//! The persistent subscription engine.
//!
//! One engine owns the whole dispatch state for one `(stream, group)` pair:
//! the event buffer, the client registry, the in-flight deadline index, the
//! checkpoint progress, and the history-read pacing. All operations mutate
//! that state on one logical task; collaborators complete asynchronously and
//! re-enter through the operations below (see [`crate::message`] and
//! [`crate::actor`] for the mailbox wiring).
//!
//! # Lifecycle
//!
//! 1. Construction validates the configuration and requests the persisted
//!    checkpoint.
//! 2. `Initializing` until the checkpoint arrives; live pushes are dropped
//!    (the reader pages them in later).
//! 3. `CatchingUp`: paged history reads fill the buffer; live pushes are
//!    accepted only when contiguous with the read frontier.
//! 4. `Live`: the tail feed drives the buffer; a gap or a full live segment
//!    falls back to `CatchingUp` from the missing position.
//! 5. `Stopped`: terminal; a final checkpoint write is attempted, pending
//!    read completions are ignored, new clients are refused.
//!
//! Dispatch runs in both `CatchingUp` and `Live` whenever the buffer is
//! non-empty and some client has free capacity. Without clients the buffer
//! keeps filling up to its caps.

use crate::buffer::EventBuffer;
use crate::capabilities::{CheckpointReader, CheckpointWriter, EventLoader, ReplySink};
use crate::checkpoint::Checkpointer;
use crate::clients::{Client, ClientRegistry};
use crate::dispatcher::{DispatchPolicy, Dispatcher};
use crate::error::Error;
use crate::event::StreamEvent;
use crate::metrics::SubscriptionMetrics;
use crate::reader::HistoryReadState;
use crate::retry::RetryTracker;
use evsub_config::{StartFrom, SubscriptionConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Minimum interval between repeated warnings for the same recurring
/// condition (failed reads retry on a sub-second backoff).
const WARN_RATE_LIMIT: Duration = Duration::from_secs(10);

/// Lifecycle state of a subscription engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Waiting for the persisted checkpoint to load.
    Initializing,
    /// Paging history from the log until the live tail is reached.
    CatchingUp,
    /// Following the live push feed.
    Live,
    /// Terminal; refuses clients and ignores collaborator completions.
    Stopped,
}

/// What a client asks the engine to do with a delivery it refuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NakAction {
    /// Requeue for redelivery; the retry count saturates at the cap.
    Retry,
    /// Move to the parked list.
    Park,
    /// Treat as acknowledged for checkpointing and drop.
    Skip,
}

/// Monitoring snapshot of one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    /// Lifecycle state.
    pub state: SubscriptionState,
    /// Number of connected clients.
    pub client_count: usize,
    /// Events pending dispatch.
    pub buffered: usize,
    /// Events dispatched and not yet acknowledged.
    pub in_flight: usize,
    /// Events on the parked list.
    pub parked: usize,
    /// Highest contiguously acknowledged event number.
    pub last_checkpoint: Option<u64>,
}

/// A server-side cursor over one stream, shared by a group of competing
/// consumers.
pub struct PersistentSubscription {
    config: SubscriptionConfig,
    subscription_id: String,
    state: SubscriptionState,
    buffer: EventBuffer,
    clients: ClientRegistry,
    dispatcher: Dispatcher,
    retries: RetryTracker,
    checkpoint: Checkpointer,
    reader: HistoryReadState,
    loader: Arc<dyn EventLoader>,
    checkpoint_reader: Arc<dyn CheckpointReader>,
    checkpoint_writer: Arc<dyn CheckpointWriter>,
    /// The event number the next live push must carry while `Live`. `None`
    /// when the tail position is not known yet (start-from-current before the
    /// first push).
    expected_next_live: Option<u64>,
    metrics: SubscriptionMetrics,
    last_read_warn: Option<Instant>,
}

impl PersistentSubscription {
    /// Creates an engine and requests its persisted checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the configuration is invalid (empty
    /// stream or group name, zero buffer sizes, zero timeout).
    pub fn new(
        config: SubscriptionConfig,
        loader: Arc<dyn EventLoader>,
        checkpoint_reader: Arc<dyn CheckpointReader>,
        checkpoint_writer: Arc<dyn CheckpointWriter>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let subscription_id = config.subscription_id();
        let policy = if config.prefer_round_robin {
            DispatchPolicy::RoundRobin
        } else {
            DispatchPolicy::DispatchToSingle
        };
        let engine = Self {
            buffer: EventBuffer::new(config.history_buffer_size, config.live_buffer_size),
            clients: ClientRegistry::new(),
            dispatcher: Dispatcher::new(policy),
            retries: RetryTracker::new(),
            checkpoint: Checkpointer::new(config.checkpoint_interval, config.checkpoint_max_delay),
            reader: HistoryReadState::new(0),
            metrics: SubscriptionMetrics::new(config.latency_statistics),
            state: SubscriptionState::Initializing,
            expected_next_live: None,
            last_read_warn: None,
            subscription_id,
            config,
            loader,
            checkpoint_reader,
            checkpoint_writer,
        };
        engine
            .checkpoint_reader
            .begin_load_state(&engine.subscription_id);
        Ok(engine)
    }

    /// The subscription identity, `"{stream}:{group}"`.
    #[must_use]
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// The finalized configuration this engine was built from.
    #[must_use]
    pub fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    /// The stream this subscription cursors over.
    #[must_use]
    pub fn event_stream_id(&self) -> &str {
        &self.config.stream_name
    }

    /// The consumer group name.
    #[must_use]
    pub fn group_name(&self) -> &str {
        &self.config.group_name
    }

    /// Whether any client is connected.
    #[must_use]
    pub fn has_clients(&self) -> bool {
        !self.clients.is_empty()
    }

    /// Number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.count()
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Lifetime counters.
    #[must_use]
    pub fn metrics(&self) -> &SubscriptionMetrics {
        &self.metrics
    }

    /// Monitoring snapshot.
    #[must_use]
    pub fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            state: self.state,
            client_count: self.clients.count(),
            buffered: self.buffer.len(),
            in_flight: self.retries.len(),
            parked: self.buffer.parked_len(),
            last_checkpoint: self.checkpoint.last_acked(),
        }
    }

    /// Registers a client and triggers dispatch.
    ///
    /// Idempotent by `(connection_id, correlation_id)`. Refused while
    /// stopped, and for a zero outstanding allowance.
    pub fn add_client(
        &mut self,
        connection_id: Uuid,
        correlation_id: Uuid,
        reply_target: Box<dyn ReplySink>,
        allowed_outstanding: usize,
        from: impl Into<String>,
        user: impl Into<String>,
        now: Instant,
    ) {
        if self.state == SubscriptionState::Stopped {
            warn!(
                subscription = %self.subscription_id,
                client = %correlation_id,
                "refusing client: subscription is stopped"
            );
            return;
        }
        if allowed_outstanding == 0 {
            warn!(
                subscription = %self.subscription_id,
                client = %correlation_id,
                "refusing client: allowed outstanding must be positive"
            );
            return;
        }
        let client = Client::new(
            connection_id,
            correlation_id,
            reply_target,
            allowed_outstanding,
            from,
            user,
        );
        if !self.clients.add(client) {
            debug!(
                subscription = %self.subscription_id,
                client = %correlation_id,
                "client already registered"
            );
            return;
        }
        debug!(
            subscription = %self.subscription_id,
            client = %correlation_id,
            allowed_outstanding,
            clients = self.clients.count(),
            "client added"
        );
        self.pump(now);
    }

    /// Deregisters a client and requeues its in-flight events as if nak'd.
    pub fn remove_client(&mut self, correlation_id: Uuid, now: Instant) {
        let Some((index, mut client)) = self.clients.remove(correlation_id) else {
            debug!(
                subscription = %self.subscription_id,
                client = %correlation_id,
                "remove for unknown client ignored"
            );
            return;
        };
        self.dispatcher.on_client_removed(index, self.clients.count());
        let in_flight = client.drain_in_flight();
        let requeued = in_flight.len();
        for entry in in_flight {
            self.retries.remove(entry.deadline, entry.event.event_id());
            // The client vanished rather than refusing the delivery, so the
            // retry count is left untouched.
            self.buffer.requeue(entry.event);
        }
        self.metrics.requeued += requeued as u64;
        debug!(
            subscription = %self.subscription_id,
            client = %correlation_id,
            requeued,
            clients = self.clients.count(),
            "client removed"
        );
        self.pump(now);
    }

    /// Acknowledges delivered events for a client.
    ///
    /// Unknown correlation or event ids are logged and ignored; acks for
    /// already-acknowledged events are a no-op.
    pub fn ack(&mut self, correlation_id: Uuid, event_ids: &[Uuid], now: Instant) {
        if self.state == SubscriptionState::Stopped {
            return;
        }
        let Some(client) = self.clients.get_mut(correlation_id) else {
            let error = Error::ClientUnknown { correlation_id };
            warn!(subscription = %self.subscription_id, %error, "ignoring ack");
            return;
        };
        let mut acked = Vec::with_capacity(event_ids.len());
        for &event_id in event_ids {
            let Some(entry) = client.take_in_flight(event_id) else {
                let error = Error::EventUnknown {
                    correlation_id,
                    event_id,
                };
                debug!(subscription = %self.subscription_id, %error, "ignoring ack");
                continue;
            };
            acked.push(entry);
        }
        for entry in acked {
            self.retries.remove(entry.deadline, entry.event.event_id());
            self.metrics.acked += 1;
            self.metrics
                .record_ack_latency(now.saturating_duration_since(entry.dispatched_at));
            let _ = self.checkpoint.ack(entry.event.event_number(), now);
        }
        self.pump(now);
    }

    /// Refuses delivered events for a client with the requested action.
    pub fn nak(&mut self, correlation_id: Uuid, event_ids: &[Uuid], action: NakAction, now: Instant) {
        if self.state == SubscriptionState::Stopped {
            return;
        }
        let Some(client) = self.clients.get_mut(correlation_id) else {
            let error = Error::ClientUnknown { correlation_id };
            warn!(subscription = %self.subscription_id, %error, "ignoring nak");
            return;
        };
        let mut refused = Vec::with_capacity(event_ids.len());
        for &event_id in event_ids {
            let Some(entry) = client.take_in_flight(event_id) else {
                let error = Error::EventUnknown {
                    correlation_id,
                    event_id,
                };
                debug!(subscription = %self.subscription_id, %error, "ignoring nak");
                continue;
            };
            refused.push(entry);
        }
        for entry in refused {
            self.retries.remove(entry.deadline, entry.event.event_id());
            self.metrics.nacked += 1;
            let mut event = entry.event;
            match action {
                NakAction::Retry => {
                    event.retry_count = (event.retry_count + 1).min(self.config.max_retry_count);
                    self.metrics.requeued += 1;
                    self.buffer.requeue(event);
                }
                NakAction::Park => {
                    self.park(event.event_number(), now);
                    self.buffer.mark_parked(event);
                }
                NakAction::Skip => {
                    let _ = self.checkpoint.ack(event.event_number(), now);
                }
            }
        }
        self.pump(now);
    }

    /// Offers a live event from the tail feed.
    ///
    /// Never fails. The event is accepted only when it is contiguous with
    /// what the engine already covers; anything else is dropped and the
    /// history reader pages it in.
    pub fn notify_live_event(&mut self, event: StreamEvent, now: Instant) {
        match self.state {
            SubscriptionState::Stopped => {}
            SubscriptionState::Initializing => {
                // No checkpoint yet, so no frontier to judge contiguity
                // against. The reader will page this range in.
                debug!(
                    subscription = %self.subscription_id,
                    event_number = event.event_number,
                    "dropping live event while initializing"
                );
                self.metrics.live_dropped += 1;
            }
            SubscriptionState::CatchingUp => self.live_event_while_catching_up(event, now),
            SubscriptionState::Live => self.live_event_while_live(event, now),
        }
    }

    /// Delivers a completed history read.
    ///
    /// `next_event_number` is the position the next read starts from, or
    /// `None` once the read reached the live tail.
    pub fn handle_read_completed(
        &mut self,
        events: Vec<StreamEvent>,
        next_event_number: Option<u64>,
        now: Instant,
    ) {
        if self.state != SubscriptionState::CatchingUp || !self.reader.is_outstanding() {
            debug!(
                subscription = %self.subscription_id,
                state = ?self.state,
                "ignoring read completion"
            );
            return;
        }
        let batch_next = events.last().map(|e| e.event_number + 1);
        match self.buffer.enqueue_history(events) {
            Ok(accepted) => {
                debug!(
                    subscription = %self.subscription_id,
                    accepted,
                    next = ?next_event_number,
                    "history batch buffered"
                );
            }
            Err(error) => {
                self.fail(error);
                return;
            }
        }
        match next_event_number {
            Some(next) => {
                self.reader.completed(next);
                self.pump(now);
            }
            None => {
                let frontier = batch_next
                    .filter(|&n| n > self.reader.position())
                    .unwrap_or_else(|| self.reader.position());
                self.reader.completed(frontier);
                self.go_live(now);
            }
        }
    }

    /// Records a failed history read; retried after a short backoff.
    pub fn handle_read_failed(&mut self, details: String, now: Instant) {
        if self.state != SubscriptionState::CatchingUp || !self.reader.is_outstanding() {
            return;
        }
        self.metrics.read_failures += 1;
        let error = Error::ReadFailed {
            from_event_number: self.reader.position(),
            details,
        };
        if self
            .last_read_warn
            .is_none_or(|last| now.duration_since(last) >= WARN_RATE_LIMIT)
        {
            self.last_read_warn = Some(now);
            warn!(subscription = %self.subscription_id, %error, "history read failed");
        }
        self.reader.failed(now);
    }

    /// Delivers the loaded checkpoint and starts dispatch.
    pub fn handle_checkpoint_loaded(&mut self, checkpoint: Option<u64>, now: Instant) {
        if self.state != SubscriptionState::Initializing {
            debug!(
                subscription = %self.subscription_id,
                state = ?self.state,
                "ignoring checkpoint load"
            );
            return;
        }
        let start = match checkpoint {
            Some(last_acked) => {
                self.checkpoint
                    .initialize(Some(last_acked + 1), Some(last_acked));
                Some(last_acked + 1)
            }
            None => match self.config.start_from {
                StartFrom::Beginning => {
                    self.checkpoint.initialize(Some(0), None);
                    Some(0)
                }
                StartFrom::Event(n) => {
                    self.checkpoint.initialize(Some(n), None);
                    Some(n)
                }
                StartFrom::Current => {
                    self.checkpoint.initialize(None, None);
                    None
                }
            },
        };
        match start {
            Some(from) => {
                info!(
                    subscription = %self.subscription_id,
                    from,
                    "checkpoint loaded, catching up"
                );
                self.state = SubscriptionState::CatchingUp;
                self.reader.reposition(from);
                self.pump(now);
            }
            None => {
                info!(
                    subscription = %self.subscription_id,
                    "checkpoint loaded, subscribing at the live tail"
                );
                self.state = SubscriptionState::Live;
                self.expected_next_live = None;
            }
        }
    }

    /// Records the completion of a durable checkpoint write.
    pub fn handle_checkpoint_written(&mut self, result: Result<(), String>, now: Instant) {
        match result {
            Ok(()) => {
                let _ = self.checkpoint.write_completed(true, now);
            }
            Err(details) => {
                self.metrics.checkpoint_write_failures += 1;
                let checkpoint = self.checkpoint.write_completed(false, now).unwrap_or(0);
                let error = Error::CheckpointWriteFailed {
                    checkpoint,
                    details,
                };
                warn!(subscription = %self.subscription_id, %error, "checkpoint write failed");
            }
        }
    }

    /// Drives timeouts, read retries, and checkpoint-write scheduling.
    pub fn tick(&mut self, now: Instant) {
        if self.state == SubscriptionState::Stopped {
            return;
        }
        for expired in self.retries.drain_expired(now) {
            let Some(client) = self.clients.get_mut(expired.correlation_id) else {
                continue;
            };
            let Some(entry) = client.take_in_flight(expired.event_id) else {
                continue;
            };
            self.metrics.timed_out += 1;
            let mut event = entry.event;
            event.retry_count += 1;
            if event.retry_count > self.config.max_retry_count {
                warn!(
                    subscription = %self.subscription_id,
                    event_number = event.event_number(),
                    retries = event.retry_count,
                    "event exceeded max retries, parking"
                );
                self.park(event.event_number(), now);
                self.buffer.mark_parked(event);
            } else {
                debug!(
                    subscription = %self.subscription_id,
                    event_number = event.event_number(),
                    retries = event.retry_count,
                    "ack timeout, requeueing"
                );
                self.metrics.requeued += 1;
                self.buffer.requeue(event);
            }
        }
        self.pump(now);
    }

    /// Requeues every parked event with a fresh retry count and triggers
    /// dispatch.
    pub fn replay_parked(&mut self, now: Instant) {
        if self.state == SubscriptionState::Stopped {
            return;
        }
        let parked = self.buffer.take_parked();
        if parked.is_empty() {
            return;
        }
        info!(
            subscription = %self.subscription_id,
            replayed = parked.len(),
            "replaying parked events"
        );
        for mut event in parked {
            event.retry_count = 0;
            self.metrics.requeued += 1;
            self.buffer.requeue(event);
        }
        self.pump(now);
    }

    /// Stops the engine: cancels pending reads by ignoring their completions,
    /// refuses new clients, and attempts a final checkpoint write.
    pub fn stop(&mut self) {
        if self.state == SubscriptionState::Stopped {
            return;
        }
        info!(subscription = %self.subscription_id, "stopping");
        self.state = SubscriptionState::Stopped;
        if let Some(value) = self.checkpoint.flush() {
            self.metrics.checkpoint_writes += 1;
            self.checkpoint_writer
                .begin_write_state(&self.subscription_id, value);
        }
    }

    fn live_event_while_catching_up(&mut self, event: StreamEvent, now: Instant) {
        // A live push is usable during catch-up only when it lands exactly on
        // the read frontier with no read outstanding: at that point everything
        // below it is already buffered, so the push itself proves we caught
        // up. Anything else (ahead of the frontier, or racing an outstanding
        // read that may return the same numbers) is dropped and paged in.
        let event_number = event.event_number;
        let at_frontier =
            !self.reader.is_outstanding() && event_number == self.reader.position();
        if at_frontier && self.buffer.enqueue_live(event) {
            self.go_live(now);
        } else {
            debug!(
                subscription = %self.subscription_id,
                event_number,
                frontier = self.reader.position(),
                "dropping live event beyond the read frontier"
            );
            self.metrics.live_dropped += 1;
        }
    }

    fn live_event_while_live(&mut self, event: StreamEvent, now: Instant) {
        match self.expected_next_live {
            Some(expected) if event.event_number < expected => {
                // Duplicate push, already covered.
                debug!(
                    subscription = %self.subscription_id,
                    event_number = event.event_number,
                    expected,
                    "dropping duplicate live event"
                );
            }
            Some(expected) if event.event_number > expected => {
                // The feed skipped ahead; fall back and page the gap in.
                self.metrics.live_dropped += 1;
                self.fall_back_to_catch_up(expected, now);
            }
            _ => {
                let event_number = event.event_number;
                if self.buffer.enqueue_live(event) {
                    self.expected_next_live = Some(event_number + 1);
                    self.pump(now);
                } else {
                    // Live pushes outran the consumers; re-fetch from the
                    // dropped event once the buffer drains.
                    self.metrics.live_dropped += 1;
                    self.fall_back_to_catch_up(event_number, now);
                }
            }
        }
    }

    fn fall_back_to_catch_up(&mut self, from: u64, now: Instant) {
        info!(
            subscription = %self.subscription_id,
            from,
            "live feed diverged from the buffer, falling back to paged reads"
        );
        self.state = SubscriptionState::CatchingUp;
        self.expected_next_live = None;
        // The retained live run precedes everything the reader will fetch;
        // it must drain in the history position.
        self.buffer.demote_live();
        self.reader.reposition(from);
        self.pump(now);
    }

    fn go_live(&mut self, now: Instant) {
        self.state = SubscriptionState::Live;
        self.expected_next_live = self
            .buffer
            .live_next()
            .or_else(|| Some(self.reader.position()));
        info!(
            subscription = %self.subscription_id,
            expected_next = ?self.expected_next_live,
            "caught up, now live"
        );
        self.pump(now);
    }

    /// Parking counts as acknowledged for checkpointing so a poisonous event
    /// cannot stall the group's checkpoint.
    fn park(&mut self, event_number: u64, now: Instant) {
        self.metrics.parked += 1;
        let _ = self.checkpoint.ack(event_number, now);
    }

    fn fail(&mut self, cause: Error) {
        error!(
            subscription = %self.subscription_id,
            error = %cause,
            "internal invariant violated, stopping"
        );
        self.stop();
    }

    /// Runs every deferred reaction in one place: dispatch what can be
    /// dispatched, keep the reader busy, and schedule checkpoint writes.
    fn pump(&mut self, now: Instant) {
        self.try_dispatch(now);
        self.maybe_begin_read(now);
        self.maybe_write_checkpoint(now);
    }

    fn try_dispatch(&mut self, now: Instant) {
        if !matches!(
            self.state,
            SubscriptionState::CatchingUp | SubscriptionState::Live
        ) {
            return;
        }
        while self.buffer.peek().is_some() {
            let Some(index) = self.dispatcher.select(&self.clients) else {
                break;
            };
            let Some(event) = self.buffer.pop() else {
                break;
            };
            let deadline = now + self.config.timeout;
            let Some(client) = self.clients.get_index_mut(index) else {
                // Selection and mutation race nothing on one task; put the
                // event back if the index is somehow gone.
                self.buffer.requeue(event);
                break;
            };
            let correlation_id = client.correlation_id;
            let event_id = event.event_id();
            let event_number = event.event_number();
            self.retries.insert(deadline, event_id, correlation_id);
            self.metrics.dispatched += 1;
            let enqueued = client.dispatch(event, now, deadline);
            debug!(
                subscription = %self.subscription_id,
                event_number,
                client = %correlation_id,
                enqueued,
                "dispatched"
            );
        }
    }

    fn maybe_begin_read(&mut self, now: Instant) {
        if self.state != SubscriptionState::CatchingUp {
            return;
        }
        if let Some((start, count)) = self.reader.next_request(
            self.buffer.history_room(),
            self.config.read_batch_size,
            now,
        ) {
            self.metrics.reads_issued += 1;
            debug!(
                subscription = %self.subscription_id,
                start,
                count,
                "requesting history page"
            );
            self.loader
                .begin_load(start, count, self.config.resolve_link_tos);
        }
    }

    fn maybe_write_checkpoint(&mut self, now: Instant) {
        if let Some(value) = self.checkpoint.poll_write(now) {
            self.metrics.checkpoint_writes += 1;
            debug!(
                subscription = %self.subscription_id,
                checkpoint = value,
                "writing checkpoint"
            );
            self.checkpoint_writer
                .begin_write_state(&self.subscription_id, value);
        }
    }
}
