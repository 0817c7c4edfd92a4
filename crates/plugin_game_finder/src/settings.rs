//! Per-party matchmaking settings.
//!
//! Settings are resolved once per party per pass through an injected
//! [`SettingsProvider`] and memoized in the party's [`CacheStorage`] under
//! [`SETTINGS_CACHE_KEY`]. Only parties whose settings produce the same group
//! key are ever considered for the same game; within a group, the pairwise
//! [`MatchSettings::can_match`] predicate decides who may share a team.

use crate::config::GameFinderConfig;
use crate::error::GameFinderError;
use async_trait::async_trait;
use scene_api::types::Party;
use serde::{Deserialize, Serialize};
use std::hash::Hash;

/// Cache key under which resolved settings are memoized per party.
pub const SETTINGS_CACHE_KEY: &str = "quickqueue.settings";

/// Resolved matchmaking settings for one party.
pub trait MatchSettings: Send + Sync + 'static {
    type GroupKey: Eq + Hash + Clone + Send + Sync + std::fmt::Debug;

    /// Parties can only ever match inside the same group. The key must
    /// encode the `(team_count, team_size)` tuple.
    fn group_key(&self) -> Self::GroupKey;

    fn team_size(&self) -> u32;

    fn team_count(&self) -> u32;

    /// Pairwise compatibility between two parties of the same group. The
    /// predicate is not transitive; it is checked for every pair of parties
    /// entering the same team.
    fn can_match(&self, other: &Self) -> bool;
}

/// Computes settings for a party. May be remote and may fail; failures leave
/// the party in the waiting set for the next pass.
#[async_trait]
pub trait SettingsProvider<S: MatchSettings>: Send + Sync {
    async fn settings(&self, party: &Party) -> Result<S, GameFinderError>;
}

// ============================================================================
// Quick-Queue Settings
// ============================================================================

/// Settings used by the quick-queue game finder.
///
/// Group membership is decided by `(team_count, team_size)`; platform
/// compatibility is enforced pairwise, so a cross-play party can bridge two
/// platform-locked parties without making them compatible with each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickQueueSettings {
    pub team_size: u32,
    pub team_count: u32,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default = "default_cross_play")]
    pub cross_play: bool,
}

fn default_cross_play() -> bool {
    true
}

impl MatchSettings for QuickQueueSettings {
    type GroupKey = (u32, u32);

    fn group_key(&self) -> Self::GroupKey {
        (self.team_count, self.team_size)
    }

    fn team_size(&self) -> u32 {
        self.team_size
    }

    fn team_count(&self) -> u32 {
        self.team_count
    }

    fn can_match(&self, other: &Self) -> bool {
        if self.cross_play && other.cross_play {
            return true;
        }
        match (&self.platform, &other.platform) {
            (Some(a), Some(b)) => a == b,
            // A party without a declared platform only matches through
            // cross-play.
            _ => false,
        }
    }
}

/// Resolves [`QuickQueueSettings`] from the party's custom data, falling back
/// to the configured defaults for missing fields.
pub struct PartyDataSettingsProvider {
    defaults: QuickQueueSettings,
}

impl PartyDataSettingsProvider {
    pub fn new(config: &GameFinderConfig) -> Self {
        Self {
            defaults: QuickQueueSettings {
                team_size: config.team_size,
                team_count: config.team_count,
                platform: None,
                cross_play: true,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartyMatchmakingData {
    platform: Option<String>,
    cross_play: Option<bool>,
}

#[async_trait]
impl SettingsProvider<QuickQueueSettings> for PartyDataSettingsProvider {
    async fn settings(&self, party: &Party) -> Result<QuickQueueSettings, GameFinderError> {
        let data: PartyMatchmakingData = match &party.custom_data {
            serde_json::Value::Null => PartyMatchmakingData::default(),
            value => serde_json::from_value(value.clone()).map_err(|e| {
                GameFinderError::Settings {
                    party_id: party.id.clone(),
                    reason: e.to_string(),
                }
            })?,
        };
        Ok(QuickQueueSettings {
            team_size: self.defaults.team_size,
            team_count: self.defaults.team_count,
            platform: data.platform,
            cross_play: data.cross_play.unwrap_or(self.defaults.cross_play),
        })
    }
}
