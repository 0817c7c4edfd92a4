//! Typed game-finder configuration.
//!
//! Loaded from TOML by the host; every field has a default so a bare
//! `[gamefinder]` section is valid.

use crate::error::GameFinderError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ready-check phase configuration.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ReadyCheckConfig {
    /// Whether accepted games go through a ready check before resolution.
    pub enabled: bool,
    /// How long players have to vote before unvoted players are treated as
    /// declining.
    pub timeout_ms: u64,
}

impl Default for ReadyCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 20_000,
        }
    }
}

/// Game-finder configuration.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct GameFinderConfig {
    /// Exact number of players per team.
    pub team_size: u32,
    /// Number of teams per game.
    pub team_count: u32,
    /// How often the matching pass runs.
    pub tick_interval_ms: u64,
    pub ready_check: ReadyCheckConfig,
}

impl Default for GameFinderConfig {
    fn default() -> Self {
        Self {
            team_size: 2,
            team_count: 2,
            tick_interval_ms: 1_000,
            ready_check: ReadyCheckConfig::default(),
        }
    }
}

impl GameFinderConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn ready_check_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_check.timeout_ms)
    }

    /// Validates the configuration at load time.
    pub fn validate(&self) -> Result<(), GameFinderError> {
        if self.team_size == 0 {
            return Err(GameFinderError::InvalidConfig(
                "team_size must be at least 1".to_string(),
            ));
        }
        if self.team_count == 0 {
            return Err(GameFinderError::InvalidConfig(
                "team_count must be at least 1".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(GameFinderError::InvalidConfig(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        if self.ready_check.enabled && self.ready_check.timeout_ms == 0 {
            return Err(GameFinderError::InvalidConfig(
                "ready_check.timeout_ms must be positive when enabled".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        GameFinderConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_team_size() {
        let config = GameFinderConfig {
            team_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_toml() {
        let config: GameFinderConfig = toml::from_str(
            r#"
            team_size = 5
            team_count = 2

            [ready_check]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.team_size, 5);
        assert!(!config.ready_check.enabled);
        config.validate().unwrap();
    }
}
