//! Game-finder error types.

use scene_api::error::SceneApiError;
use scene_api::types::{GameId, PartyId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GameFinderError {
    #[error("settings resolution failed for party {party_id}: {reason}")]
    Settings { party_id: PartyId, reason: String },

    #[error("ready check {0} not found")]
    ReadyCheckNotFound(GameId),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("resolution failed: {0}")]
    Resolution(String),

    #[error("scene API error: {0}")]
    SceneApi(#[from] SceneApiError),
}

// Named to avoid clashing with `scene_api::GameFinderResult`, the matching
// pass output.
pub type FinderResult<T> = Result<T, GameFinderError>;
