//! Typed party-merging configuration.

use crate::error::MergingError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct PartyMergingConfig {
    /// How often the merge tick runs.
    pub tick_interval_ms: u64,
    /// Deadline applied to each individual tick, independent from the
    /// long-lived per-party tokens.
    pub tick_timeout_ms: u64,
    /// How often analytics are pushed to the sink.
    pub analytics_interval_ms: u64,
    /// Keep-alive extension requested while merging demand exists.
    pub keep_alive_ms: u64,
    /// How long status responses may be cached client-side, in seconds.
    pub status_max_age_secs: u32,
    /// Window of the rolling time-in-merger average.
    pub residency_window: usize,
    /// Player count at which a party stops merging.
    pub target_party_size: u32,
}

impl Default for PartyMergingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            tick_timeout_ms: 10_000,
            analytics_interval_ms: 60_000,
            keep_alive_ms: 120_000,
            status_max_age_secs: 5,
            residency_window: 128,
            target_party_size: 4,
        }
    }
}

impl PartyMergingConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn tick_timeout(&self) -> Duration {
        Duration::from_millis(self.tick_timeout_ms)
    }

    pub fn analytics_interval(&self) -> Duration {
        Duration::from_millis(self.analytics_interval_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub fn validate(&self) -> Result<(), MergingError> {
        if self.tick_interval_ms == 0 {
            return Err(MergingError::InvalidConfig(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        if self.tick_timeout_ms == 0 {
            return Err(MergingError::InvalidConfig(
                "tick_timeout_ms must be positive".to_string(),
            ));
        }
        if self.residency_window == 0 {
            return Err(MergingError::InvalidConfig(
                "residency_window must be positive".to_string(),
            ));
        }
        if self.target_party_size < 2 {
            return Err(MergingError::InvalidConfig(
                "target_party_size must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}
