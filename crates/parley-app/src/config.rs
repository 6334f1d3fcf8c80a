//! Client configuration.

use std::{ops::RangeInclusive, time::Duration};

/// Tunables of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// How long a surfaced error stays visible.
    pub error_ttl: Duration,
    /// Interval of the runtime's housekeeping tick (error expiry).
    pub tick_interval: Duration,
    /// Capacity bounds applied to `create_session`.
    pub capacity_range: RangeInclusive<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            error_ttl: Duration::from_secs(5),
            tick_interval: Duration::from_millis(500),
            capacity_range: 2..=16,
        }
    }
}

impl ClientConfig {
    /// Clamp a requested capacity into the configured bounds.
    pub fn clamp_capacity(&self, requested: u32) -> u32 {
        requested.clamp(*self.capacity_range.start(), *self.capacity_range.end())
    }
}
