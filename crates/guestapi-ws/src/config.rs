//! Event stream configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Policies for one subscription. The defaults abort on any bad frame, never
/// bound handler concurrency and never time out a read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventStreamConfig {
    /// Skip frames of a known type whose `metadata` does not match that type's
    /// shape instead of ending the subscription.
    #[serde(default)]
    pub skip_malformed_metadata: bool,
    /// Skip frames whose `type` is not a known event type instead of ending
    /// the subscription.
    #[serde(default)]
    pub skip_unknown_types: bool,
    /// Maximum number of handler futures running at once. When reached, the
    /// read loop waits for one to finish. `None` = unbounded.
    #[serde(default)]
    pub max_in_flight: Option<usize>,
    /// Give up on an idle read after this long and re-check cancellation.
    /// An elapsed timeout is not an error.
    #[serde(default, with = "guestapi_core::config::opt_millis")]
    pub read_timeout: Option<Duration>,
}

impl EventStreamConfig {
    /// Skip both unknown types and malformed metadata.
    pub fn lenient() -> Self {
        Self {
            skip_malformed_metadata: true,
            skip_unknown_types: true,
            ..Self::default()
        }
    }

    pub fn max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = Some(limit.max(1));
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }
}
