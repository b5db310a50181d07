// SPDX-License-Identifier: Apache-2.0

//! In-process statistics for one subscription.
//!
//! Counter per outcome, mirroring the ack/nack/retry taxonomy the dispatch
//! loop produces. There is no transport here; a directory or admin surface
//! reads the snapshot through the engine accessor.

use std::time::Duration;

/// Dispatch-to-ack latency aggregate, tracked only when enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyStats {
    /// Number of acknowledged deliveries measured.
    pub count: u64,
    /// Sum of dispatch-to-ack latencies.
    pub total: Duration,
    /// Largest observed dispatch-to-ack latency.
    pub max: Duration,
}

impl LatencyStats {
    /// Folds one observation into the aggregate.
    pub fn record(&mut self, latency: Duration) {
        self.count += 1;
        self.total += latency;
        if latency > self.max {
            self.max = latency;
        }
    }

    /// Mean dispatch-to-ack latency, if anything was measured.
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        if self.count == 0 {
            return None;
        }
        Some(self.total / self.count as u32)
    }
}

/// Counters for one subscription's lifetime.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionMetrics {
    /// Events handed to a client's reply sink.
    pub dispatched: u64,
    /// Events acknowledged by clients.
    pub acked: u64,
    /// Events explicitly nak'd by clients.
    pub nacked: u64,
    /// In-flight deliveries recycled by the ack timeout.
    pub timed_out: u64,
    /// Events moved to the parked list.
    pub parked: u64,
    /// Events requeued for redelivery (nak, timeout, or client removal).
    pub requeued: u64,
    /// Live pushes refused because the live segment was full.
    pub live_dropped: u64,
    /// History reads issued to the event loader.
    pub reads_issued: u64,
    /// History reads that reported failure.
    pub read_failures: u64,
    /// Durable checkpoint writes issued.
    pub checkpoint_writes: u64,
    /// Durable checkpoint writes that reported failure.
    pub checkpoint_write_failures: u64,
    /// Dispatch-to-ack latency aggregate, when `latency_statistics` is on.
    pub latency: Option<LatencyStats>,
}

impl SubscriptionMetrics {
    /// Creates zeroed counters, with latency tracking if `latency_statistics`
    /// is enabled.
    #[must_use]
    pub fn new(latency_statistics: bool) -> Self {
        Self {
            latency: latency_statistics.then(LatencyStats::default),
            ..Self::default()
        }
    }

    /// Records the latency of an acknowledged delivery, if tracking is on.
    pub fn record_ack_latency(&mut self, latency: Duration) {
        if let Some(stats) = self.latency.as_mut() {
            stats.record(latency);
        }
    }
}
