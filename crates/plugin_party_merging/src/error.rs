//! Party-merging error types.

use scene_api::error::SceneApiError;
use scene_api::types::PartyId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergingError {
    #[error("merge cancelled")]
    Cancelled,

    #[error("party {0} is already merging")]
    AlreadyMerging(PartyId),

    #[error("unknown party {0} in merge command")]
    UnknownParty(PartyId),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("algorithm error: {0}")]
    Algorithm(String),

    #[error("scene API error: {0}")]
    SceneApi(#[from] SceneApiError),
}

impl MergingError {
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            MergingError::Cancelled | MergingError::SceneApi(SceneApiError::Cancelled)
        )
    }
}

pub type MergingResult<T> = Result<T, MergingError>;
