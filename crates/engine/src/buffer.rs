// SPDX-License-Identifier: Apache-2.0

//! Bounded buffer of events pending dispatch.
//!
//! The buffer is partitioned into three segments, drained in this order:
//!
//! 1. requeued events (nak'd or timed out), kept sorted by event number,
//! 2. the history segment, filled by paged reads and capped at
//!    `history_buffer_size`,
//! 3. the live segment, filled by the tail feed and capped at
//!    `live_buffer_size`.
//!
//! History sorts before live, so catch-up drains in event-number order before
//! any live push is delivered. Requeued entries re-enter ahead of both
//! segments and outside the caps: they already occupied buffer space before
//! they were dispatched.
//!
//! The parked list is retained in memory only; parked events leave active
//! dispatch until an operator replays them.

use crate::error::Error;
use crate::event::{BufferedEvent, EventSource, StreamEvent};
use std::collections::VecDeque;

/// Bounded FIFO of events pending dispatch.
#[derive(Debug)]
pub struct EventBuffer {
    requeued: VecDeque<BufferedEvent>,
    history: VecDeque<BufferedEvent>,
    live: VecDeque<BufferedEvent>,
    parked: Vec<BufferedEvent>,
    history_capacity: usize,
    live_capacity: usize,
}

impl EventBuffer {
    /// Creates an empty buffer with the given segment caps.
    #[must_use]
    pub fn new(history_capacity: usize, live_capacity: usize) -> Self {
        Self {
            requeued: VecDeque::new(),
            history: VecDeque::with_capacity(history_capacity),
            live: VecDeque::new(),
            parked: Vec::new(),
            history_capacity,
            live_capacity,
        }
    }

    /// Appends a batch of history events.
    ///
    /// Events that overlap the live segment (event number at or past the
    /// first live-buffered event) are discarded: the live segment already
    /// covers them, and keeping both would deliver duplicates at the
    /// catch-up → live handover. Returns the number of events accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferOverflow`] if the accepted events push the
    /// history segment past its cap. The engine paces reads by the free room
    /// in this segment, so an overflow means the loader returned more than it
    /// was asked for and the engine state can no longer be trusted.
    pub fn enqueue_history(
        &mut self,
        events: impl IntoIterator<Item = StreamEvent>,
    ) -> Result<usize, Error> {
        let live_start = self.live.front().map(BufferedEvent::event_number);
        let mut accepted = 0usize;
        for event in events {
            if live_start.is_some_and(|start| event.event_number >= start) {
                continue;
            }
            self.history
                .push_back(BufferedEvent::new(event, EventSource::History));
            accepted += 1;
        }
        if self.history.len() > self.history_capacity {
            return Err(Error::BufferOverflow {
                size: self.history.len(),
                capacity: self.history_capacity,
            });
        }
        Ok(accepted)
    }

    /// Appends a live event, or refuses it when the live segment is full.
    ///
    /// A refused event is simply dropped here; the history reader re-fetches
    /// the dropped range.
    pub fn enqueue_live(&mut self, event: StreamEvent) -> bool {
        if self.live.len() >= self.live_capacity {
            return false;
        }
        self.live
            .push_back(BufferedEvent::new(event, EventSource::Live));
        true
    }

    /// Moves the live segment onto the history tail.
    ///
    /// Used when live pushes outran the buffer and the engine falls back to
    /// paged reads from the gap: the retained live run precedes everything
    /// the reader will fetch, so it must drain in the history position. The
    /// entries keep their `Live` provenance tag. No cap check happens here —
    /// the combined occupancy is unchanged, and reads stay paused until the
    /// history segment drains below its cap again.
    pub fn demote_live(&mut self) {
        let live = std::mem::take(&mut self.live);
        self.history.extend(live);
    }

    /// Re-inserts a previously dispatched event at the head, keeping the
    /// requeued run ordered by event number.
    pub fn requeue(&mut self, event: BufferedEvent) {
        let at = self
            .requeued
            .partition_point(|e| e.event_number() <= event.event_number());
        self.requeued.insert(at, event);
    }

    /// Moves an event to the parked list.
    pub fn mark_parked(&mut self, event: BufferedEvent) {
        self.parked.push(event);
    }

    /// The next event that would be dispatched, if any.
    #[must_use]
    pub fn peek(&self) -> Option<&BufferedEvent> {
        self.requeued
            .front()
            .or_else(|| self.history.front())
            .or_else(|| self.live.front())
    }

    /// Removes and returns the next event to dispatch.
    pub fn pop(&mut self) -> Option<BufferedEvent> {
        self.requeued
            .pop_front()
            .or_else(|| self.history.pop_front())
            .or_else(|| self.live.pop_front())
    }

    /// Total number of events pending dispatch (all three segments).
    #[must_use]
    pub fn len(&self) -> usize {
        self.requeued.len() + self.history.len() + self.live.len()
    }

    /// Whether no events are pending dispatch.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free room in the history segment; paged reads are clamped to this.
    #[must_use]
    pub fn history_room(&self) -> usize {
        self.history_capacity.saturating_sub(self.history.len())
    }

    /// Event number of the first live-buffered event, if any.
    #[must_use]
    pub fn live_start(&self) -> Option<u64> {
        self.live.front().map(BufferedEvent::event_number)
    }

    /// The event number a contiguous live push would need to carry next.
    #[must_use]
    pub fn live_next(&self) -> Option<u64> {
        self.live.back().map(|e| e.event_number() + 1)
    }

    /// Number of parked events.
    #[must_use]
    pub fn parked_len(&self) -> usize {
        self.parked.len()
    }

    /// Drains the parked list for replay.
    pub fn take_parked(&mut self) -> Vec<BufferedEvent> {
        std::mem::take(&mut self.parked)
    }
}
