// SPDX-License-Identifier: Apache-2.0

//! Checkpoint progress tracking and durable-write scheduling.
//!
//! The checkpoint is the highest event number below which everything has been
//! acknowledged. Acks can arrive out of order across competing clients, so
//! numbers above the contiguous frontier wait in a set until the frontier
//! reaches them.
//!
//! Durable writes are best-effort and serialized: at most one write is in
//! flight, a write always carries the latest value, and a failed write is
//! simply retried by the next scheduled one. A write becomes due once either
//! `checkpoint_interval` acknowledged events accumulated or
//! `checkpoint_max_delay` passed since the first unpersisted progress.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// Tracks acknowledged progress and schedules durable checkpoint writes.
#[derive(Debug)]
pub struct Checkpointer {
    /// The lowest event number not yet acknowledged. `None` until the anchor
    /// is known (subscriptions starting at the live tail learn it from the
    /// first acknowledged event).
    next_expected: Option<u64>,
    /// Acknowledged event numbers above the contiguous frontier.
    acked_above: BTreeSet<u64>,
    /// The last value known to be durably persisted.
    persisted: Option<u64>,
    interval: u32,
    max_delay: Duration,
    acks_since_schedule: u32,
    /// When the oldest unpersisted progress was made.
    progress_since: Option<Instant>,
    write_in_flight: Option<u64>,
}

impl Checkpointer {
    /// Creates a checkpointer with the given write-scheduling knobs.
    #[must_use]
    pub fn new(interval: u32, max_delay: Duration) -> Self {
        Self {
            next_expected: None,
            acked_above: BTreeSet::new(),
            persisted: None,
            interval,
            max_delay,
            acks_since_schedule: 0,
            progress_since: None,
            write_in_flight: None,
        }
    }

    /// Sets the contiguity anchor and the already-persisted value.
    ///
    /// For a loaded checkpoint `c` the anchor is `c + 1`; for an explicit
    /// start it is the start event number; for a start at the live tail it is
    /// `None` until the first ack pins it.
    pub fn initialize(&mut self, anchor: Option<u64>, persisted: Option<u64>) {
        self.next_expected = anchor;
        self.persisted = persisted;
    }

    /// Records an acknowledged event number. Returns `false` for duplicates
    /// (already acknowledged), which are a no-op.
    pub fn ack(&mut self, event_number: u64, now: Instant) -> bool {
        if self.next_expected.is_none() {
            self.next_expected = Some(event_number);
        }
        let frontier = self.next_expected.unwrap_or(0);
        if event_number < frontier {
            return false;
        }
        if !self.acked_above.insert(event_number) {
            return false;
        }
        self.advance(now);
        true
    }

    /// The current checkpoint value: the highest contiguously acknowledged
    /// event number (or the loaded checkpoint if nothing advanced yet).
    #[must_use]
    pub fn last_acked(&self) -> Option<u64> {
        match self.next_expected {
            Some(n) => n.checked_sub(1).or(self.persisted),
            None => self.persisted,
        }
    }

    /// The last value known to be durably persisted.
    #[must_use]
    pub fn persisted(&self) -> Option<u64> {
        self.persisted
    }

    /// Returns the value to write if a durable write is due, marking it in
    /// flight. At most one write is in flight at a time.
    pub fn poll_write(&mut self, now: Instant) -> Option<u64> {
        if self.write_in_flight.is_some() {
            return None;
        }
        let value = self.unpersisted_value()?;
        let by_count = self.acks_since_schedule >= self.interval;
        let by_delay = self
            .progress_since
            .is_some_and(|since| now.duration_since(since) >= self.max_delay);
        if !(by_count || by_delay) {
            return None;
        }
        self.mark_write_issued(value);
        Some(value)
    }

    /// Returns the value for a final best-effort write regardless of the
    /// scheduling knobs, e.g. on shutdown. `None` when nothing unpersisted
    /// remains or a write is already in flight.
    pub fn flush(&mut self) -> Option<u64> {
        if self.write_in_flight.is_some() {
            return None;
        }
        let value = self.unpersisted_value()?;
        self.mark_write_issued(value);
        Some(value)
    }

    /// Records the completion of the in-flight write, returning the value
    /// that was being written. On failure the latest value becomes eligible
    /// again after `checkpoint_max_delay`.
    pub fn write_completed(&mut self, success: bool, now: Instant) -> Option<u64> {
        let written = self.write_in_flight.take()?;
        if success {
            if self.persisted.is_none_or(|p| written > p) {
                self.persisted = Some(written);
            }
        } else if self.progress_since.is_none() {
            self.progress_since = Some(now);
        }
        Some(written)
    }

    fn advance(&mut self, now: Instant) {
        let mut advanced = 0u32;
        if let Some(mut frontier) = self.next_expected {
            while self.acked_above.remove(&frontier) {
                frontier += 1;
                advanced += 1;
            }
            self.next_expected = Some(frontier);
        }
        if advanced > 0 {
            self.acks_since_schedule = self.acks_since_schedule.saturating_add(advanced);
            if self.progress_since.is_none() {
                self.progress_since = Some(now);
            }
        }
    }

    fn unpersisted_value(&self) -> Option<u64> {
        let value = self.last_acked()?;
        if self.persisted.is_some_and(|p| value <= p) {
            return None;
        }
        Some(value)
    }

    fn mark_write_issued(&mut self, value: u64) {
        self.write_in_flight = Some(value);
        self.acks_since_schedule = 0;
        self.progress_since = None;
    }
}
