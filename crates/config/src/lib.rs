// SPDX-License-Identifier: Apache-2.0

//! Configuration model for persistent subscriptions.
//!
//! A persistent subscription is identified by the pair `(stream, group)` and
//! is configured once at creation time. The engine consumes a finalized,
//! immutable [`SubscriptionConfig`]; there is no builder and no mutation after
//! construction. All options have defaults except the identity pair.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod error;

pub use error::Error;

/// Default ack timeout for in-flight events.
fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Default number of retries before an event is parked.
fn default_max_retry_count() -> u32 {
    10
}

/// Default cap on the live segment of the event buffer.
fn default_live_buffer_size() -> usize {
    500
}

/// Default cap on the history segment of the event buffer.
fn default_history_buffer_size() -> usize {
    20
}

/// Default number of events requested per history read.
fn default_read_batch_size() -> usize {
    500
}

/// Default dispatch policy selector.
fn default_prefer_round_robin() -> bool {
    true
}

/// Default number of acknowledged events between durable checkpoint writes.
fn default_checkpoint_interval() -> u32 {
    10
}

/// Default maximum delay before acknowledged progress is durably written.
fn default_checkpoint_max_delay() -> Duration {
    Duration::from_secs(2)
}

/// Where dispatch begins when no checkpoint has been persisted yet.
///
/// Serialized as a plain integer: `0` is the beginning of the stream, `-1` is
/// the current live tail, any other non-negative `n` is an explicit event
/// number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum StartFrom {
    /// Start from event number 0.
    #[default]
    Beginning,
    /// Start from the current live tail; no history is replayed.
    Current,
    /// Start from an explicit event number.
    Event(u64),
}

impl From<i64> for StartFrom {
    fn from(value: i64) -> Self {
        match value {
            0 => StartFrom::Beginning,
            v if v < 0 => StartFrom::Current,
            v => StartFrom::Event(v as u64),
        }
    }
}

impl From<StartFrom> for i64 {
    fn from(value: StartFrom) -> Self {
        match value {
            StartFrom::Beginning => 0,
            StartFrom::Current => -1,
            StartFrom::Event(n) => n as i64,
        }
    }
}

/// Configuration for one persistent subscription.
///
/// The identity pair (`stream_name`, `group_name`) is required and must be
/// non-empty; everything else defaults. Validation happens once, at engine
/// construction, via [`SubscriptionConfig::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// The stream the subscription cursors over.
    pub stream_name: String,

    /// The consumer group sharing the cursor.
    pub group_name: String,

    /// Whether the history reader should resolve link events to their
    /// targets.
    #[serde(default)]
    pub resolve_link_tos: bool,

    /// Where dispatch begins when no checkpoint exists.
    #[serde(default)]
    pub start_from: StartFrom,

    /// How long a dispatched event may stay unacknowledged before it is
    /// retried.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,

    /// How many times an event is retried before it is parked.
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,

    /// Cap on the live segment of the event buffer. Live pushes beyond this
    /// are dropped and re-fetched by the history reader.
    #[serde(default = "default_live_buffer_size")]
    pub live_buffer_size: usize,

    /// Cap on the history segment of the event buffer. History reads are
    /// clamped to the free room in this segment.
    #[serde(default = "default_history_buffer_size")]
    pub history_buffer_size: usize,

    /// Number of events requested per history read.
    #[serde(default = "default_read_batch_size")]
    pub read_batch_size: usize,

    /// `true` selects round-robin dispatch across clients; `false` prefers
    /// dispatching to a single client until it saturates.
    #[serde(default = "default_prefer_round_robin")]
    pub prefer_round_robin: bool,

    /// Enables dispatch-to-ack latency aggregation. Off by default.
    #[serde(default)]
    pub latency_statistics: bool,

    /// Number of acknowledged events between durable checkpoint writes.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u32,

    /// Maximum delay before acknowledged progress is durably written, even if
    /// fewer than `checkpoint_interval` events were acked.
    #[serde(with = "humantime_serde", default = "default_checkpoint_max_delay")]
    pub checkpoint_max_delay: Duration,
}

impl SubscriptionConfig {
    /// Creates a configuration with the given identity and all other options
    /// at their defaults.
    #[must_use]
    pub fn new(stream_name: impl Into<String>, group_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            group_name: group_name.into(),
            resolve_link_tos: false,
            start_from: StartFrom::default(),
            timeout: default_timeout(),
            max_retry_count: default_max_retry_count(),
            live_buffer_size: default_live_buffer_size(),
            history_buffer_size: default_history_buffer_size(),
            read_batch_size: default_read_batch_size(),
            prefer_round_robin: default_prefer_round_robin(),
            latency_statistics: false,
            checkpoint_interval: default_checkpoint_interval(),
            checkpoint_max_delay: default_checkpoint_max_delay(),
        }
    }

    /// The subscription identity, formed as `"{stream}:{group}"`.
    #[must_use]
    pub fn subscription_id(&self) -> String {
        format!("{}:{}", self.stream_name, self.group_name)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first offending option: empty identity parts, zero buffer
    /// sizes, a zero read batch, or a zero ack timeout.
    pub fn validate(&self) -> Result<(), Error> {
        if self.stream_name.trim().is_empty() {
            return Err(Error::InvalidStreamName);
        }
        if self.group_name.trim().is_empty() {
            return Err(Error::InvalidGroupName);
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidOption {
                option: "timeout",
                details: "must be greater than zero".to_owned(),
            });
        }
        if self.live_buffer_size == 0 {
            return Err(Error::InvalidOption {
                option: "live_buffer_size",
                details: "must be greater than zero".to_owned(),
            });
        }
        if self.history_buffer_size == 0 {
            return Err(Error::InvalidOption {
                option: "history_buffer_size",
                details: "must be greater than zero".to_owned(),
            });
        }
        if self.read_batch_size == 0 {
            return Err(Error::InvalidOption {
                option: "read_batch_size",
                details: "must be greater than zero".to_owned(),
            });
        }
        if self.checkpoint_interval == 0 {
            return Err(Error::InvalidOption {
                option: "checkpoint_interval",
                details: "must be greater than zero".to_owned(),
            });
        }
        Ok(())
    }
}
