// SPDX-License-Identifier: Apache-2.0

//! Pacing state for history reads.
//!
//! The engine pulls pages from the event loader while catching up. This state
//! enforces the reading contract: a single outstanding read, reads clamped to
//! the free room in the buffer's history segment, and a short backoff after a
//! failed read before the same position is requested again.

use std::time::{Duration, Instant};

/// Backoff before retrying a failed history read.
pub(crate) const READ_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Tracks where the history reader is and whether it may issue a read.
#[derive(Debug)]
pub struct HistoryReadState {
    next_read_from: u64,
    outstanding: bool,
    retry_at: Option<Instant>,
}

impl HistoryReadState {
    /// Creates pacing state positioned at `next_read_from`.
    #[must_use]
    pub fn new(next_read_from: u64) -> Self {
        Self {
            next_read_from,
            outstanding: false,
            retry_at: None,
        }
    }

    /// The event number the next read starts from.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.next_read_from
    }

    /// Whether a read is currently outstanding.
    #[must_use]
    pub fn is_outstanding(&self) -> bool {
        self.outstanding
    }

    /// Returns `(start, count)` for the read to issue now, or `None` while a
    /// read is outstanding, the history segment is full, or a failure backoff
    /// is still running. Marks the read outstanding when returned.
    pub fn next_request(
        &mut self,
        history_room: usize,
        batch_size: usize,
        now: Instant,
    ) -> Option<(u64, usize)> {
        if self.outstanding || history_room == 0 {
            return None;
        }
        if self.retry_at.is_some_and(|at| now < at) {
            return None;
        }
        self.retry_at = None;
        self.outstanding = true;
        Some((self.next_read_from, batch_size.min(history_room)))
    }

    /// Records a completed read and the position the next one starts from.
    pub fn completed(&mut self, next_read_from: u64) {
        self.outstanding = false;
        self.next_read_from = next_read_from;
    }

    /// Records a failed read; the position is retried after the backoff.
    pub fn failed(&mut self, now: Instant) {
        self.outstanding = false;
        self.retry_at = Some(now + READ_RETRY_BACKOFF);
    }

    /// Repositions the reader, e.g. when live pushes outran the buffer and
    /// the engine falls back to catch-up from the gap.
    pub fn reposition(&mut self, next_read_from: u64) {
        self.next_read_from = next_read_from;
    }
}
