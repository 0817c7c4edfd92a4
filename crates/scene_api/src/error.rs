//! Shared error taxonomy for scene-hosted plugins.

use crate::types::PartyId;
use thiserror::Error;

/// Failures surfaced by the hosting framework's collaborators or by the
/// shared data model.
#[derive(Debug, Error)]
pub enum SceneApiError {
    #[error("party {0} not found")]
    PartyNotFound(PartyId),

    #[error("team is full: capacity {capacity}, attempted {attempted}")]
    TeamOverflow { capacity: u32, attempted: u32 },

    #[error("messaging failed: {0}")]
    Messaging(String),

    #[error("session provider error: {0}")]
    Session(String),

    #[error("rpc registration failed: {0}")]
    RpcRegistration(String),

    #[error("remote call failed: {0}")]
    Remote(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,
}

/// Errors returned to RPC callers.
///
/// `Client` variants carry the exact wire code shown to the remote peer;
/// `Internal` variants are logged server-side and surfaced as an opaque
/// failure.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Client(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Authorization failure with a wire-visible reason, for example
    /// `notAuthorized?reason=notLeader`.
    pub fn not_authorized(reason: &str) -> Self {
        ApiError::Client(format!("notAuthorized?reason={reason}"))
    }
}

impl From<SceneApiError> for ApiError {
    fn from(e: SceneApiError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

/// Plugin initialization and runtime errors.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Execution failed: {0}")]
    ExecutionError(String),

    #[error("Scene API error: {0}")]
    SceneApi(#[from] SceneApiError),
}

// Result type aliases for convenience
pub type SceneApiResult<T> = Result<T, SceneApiError>;
pub type ApiResult<T> = Result<T, ApiError>;
pub type PluginResult<T> = Result<T, PluginError>;
