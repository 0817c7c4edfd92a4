//! RPC surfaces.
//!
//! The merger scene exposes server-to-server control
//! (`partymerger.startmerge` / `stopmerge` / `getstatus`); the party scene
//! exposes client-facing `partymerging.start` / `stop`, restricted to the
//! party leader.

use crate::error::MergingError;
use crate::party_state::{MergeCompletion, MergingRequestState};
use crate::service::PartyMergingService;
use scene_api::context::{RpcRequest, RpcServer};
use scene_api::error::{ApiError, SceneApiError};
use scene_api::types::PartyId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const START_MERGE_ROUTE: &str = "partymerger.startmerge";
pub const STOP_MERGE_ROUTE: &str = "partymerger.stopmerge";
pub const GET_STATUS_ROUTE: &str = "partymerger.getstatus";

pub const PARTY_START_ROUTE: &str = "partymerging.start";
pub const PARTY_STOP_ROUTE: &str = "partymerging.stop";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartMergeRequest {
    pub party_id: PartyId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopMergeRequest {
    pub party_id: PartyId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartMergeResponse {
    pub connection_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PartyStartRequest {
    /// Overrides the merger configured for the party scene.
    #[serde(default)]
    pub merger_id: Option<String>,
}

// ============================================================================
// Merger Scene (server-to-server)
// ============================================================================

pub struct PartyMergerController {
    service: Arc<PartyMergingService>,
}

impl PartyMergerController {
    pub fn new(service: Arc<PartyMergingService>) -> Self {
        Self { service }
    }

    pub async fn register(&self, rpc: &dyn RpcServer) -> Result<(), SceneApiError> {
        {
            let service = self.service.clone();
            rpc.register(
                START_MERGE_ROUTE,
                Arc::new(move |request: RpcRequest| {
                    let service = service.clone();
                    Box::pin(async move { Self::start_merge(service, request).await })
                }),
            )
            .await?;
        }
        {
            let service = self.service.clone();
            rpc.register(
                STOP_MERGE_ROUTE,
                Arc::new(move |request: RpcRequest| {
                    let service = service.clone();
                    Box::pin(async move { Self::stop_merge(service, request).await })
                }),
            )
            .await?;
        }
        {
            let service = self.service.clone();
            rpc.register(
                GET_STATUS_ROUTE,
                Arc::new(move |request: RpcRequest| {
                    let service = service.clone();
                    Box::pin(async move { Self::get_status(service, request).await })
                }),
            )
            .await?;
        }
        Ok(())
    }

    fn require_server(request: &RpcRequest) -> Result<(), ApiError> {
        if !request.origin.is_server {
            return Err(ApiError::not_authorized("serverOnly"));
        }
        Ok(())
    }

    async fn start_merge(
        service: Arc<PartyMergingService>,
        request: RpcRequest,
    ) -> Result<serde_json::Value, ApiError> {
        Self::require_server(&request)?;
        let start: StartMergeRequest = serde_json::from_value(request.payload)
            .map_err(|e| ApiError::Client(format!("invalidRequest?reason={e}")))?;
        debug!("S2S start merge for party {}", start.party_id);
        match service
            .start_merge_party(&start.party_id, CancellationToken::new())
            .await
        {
            Ok(connection_token) => Ok(serde_json::to_value(StartMergeResponse {
                connection_token,
            })
            .map_err(|e| ApiError::Internal(e.to_string()))?),
            Err(e) if e.is_cancellation() => Err(ApiError::Client("operationCanceled".to_string())),
            Err(e) => Err(ApiError::Internal(e.to_string())),
        }
    }

    async fn stop_merge(
        service: Arc<PartyMergingService>,
        request: RpcRequest,
    ) -> Result<serde_json::Value, ApiError> {
        Self::require_server(&request)?;
        let stop: StopMergeRequest = serde_json::from_value(request.payload)
            .map_err(|e| ApiError::Client(format!("invalidRequest?reason={e}")))?;
        service.stop_merge_party(&stop.party_id);
        Ok(serde_json::Value::Null)
    }

    async fn get_status(
        service: Arc<PartyMergingService>,
        request: RpcRequest,
    ) -> Result<serde_json::Value, ApiError> {
        Self::require_server(&request)?;
        serde_json::to_value(service.status()).map_err(|e| ApiError::Internal(e.to_string()))
    }
}

// ============================================================================
// Party Scene (client-facing, leader only)
// ============================================================================

pub struct PartyMergingController {
    state: Arc<MergingRequestState>,
    default_merger_id: String,
}

impl PartyMergingController {
    pub fn new(state: Arc<MergingRequestState>, default_merger_id: impl Into<String>) -> Self {
        Self {
            state,
            default_merger_id: default_merger_id.into(),
        }
    }

    pub async fn register(&self, rpc: &dyn RpcServer) -> Result<(), SceneApiError> {
        {
            let state = self.state.clone();
            let merger_id = self.default_merger_id.clone();
            rpc.register(
                PARTY_START_ROUTE,
                Arc::new(move |request: RpcRequest| {
                    let state = state.clone();
                    let merger_id = merger_id.clone();
                    Box::pin(async move { Self::start(state, merger_id, request).await })
                }),
            )
            .await?;
        }
        {
            let state = self.state.clone();
            rpc.register(
                PARTY_STOP_ROUTE,
                Arc::new(move |request: RpcRequest| {
                    let state = state.clone();
                    Box::pin(async move { Self::stop(state, request).await })
                }),
            )
            .await?;
        }
        Ok(())
    }

    fn require_leader(
        state: &MergingRequestState,
        request: &RpcRequest,
    ) -> Result<(), ApiError> {
        let user_id = request
            .origin
            .user_id
            .as_ref()
            .ok_or_else(|| ApiError::not_authorized("notAuthenticated"))?;
        if !state.is_leader(user_id) {
            return Err(ApiError::not_authorized("notLeader"));
        }
        Ok(())
    }

    async fn start(
        state: Arc<MergingRequestState>,
        default_merger_id: String,
        request: RpcRequest,
    ) -> Result<serde_json::Value, ApiError> {
        Self::require_leader(&state, &request)?;
        let start: PartyStartRequest = match request.payload {
            serde_json::Value::Null => PartyStartRequest::default(),
            payload => serde_json::from_value(payload)
                .map_err(|e| ApiError::Client(format!("invalidRequest?reason={e}")))?,
        };
        let merger_id = start.merger_id.unwrap_or(default_merger_id);

        match state.start(&merger_id).await {
            Ok(MergeCompletion::Connected(_)) | Ok(MergeCompletion::Completed) => {
                Ok(serde_json::to_value(state.status())
                    .map_err(|e| ApiError::Internal(e.to_string()))?)
            }
            Ok(MergeCompletion::Paused) => Ok(serde_json::to_value(state.status())
                .map_err(|e| ApiError::Internal(e.to_string()))?),
            Err(MergingError::Cancelled) => {
                Err(ApiError::Client("operationCanceled".to_string()))
            }
            Err(MergingError::AlreadyMerging(_)) => {
                Err(ApiError::Client("alreadyMerging".to_string()))
            }
            Err(e) => Err(ApiError::Internal(e.to_string())),
        }
    }

    async fn stop(
        state: Arc<MergingRequestState>,
        request: RpcRequest,
    ) -> Result<serde_json::Value, ApiError> {
        Self::require_leader(&state, &request)?;
        state.stop().await;
        Ok(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::party_state::PartyMergerClient;
    use crate::service::MergerStatusResponse;
    use async_trait::async_trait;
    use scene_api::context::{
        PeerFilter, RequestOrigin, SceneMessaging, SendPriority, SendReliability,
    };
    use scene_api::types::UserId;

    struct InstantClient;

    #[async_trait]
    impl PartyMergerClient for InstantClient {
        async fn start_merge(
            &self,
            _merger_id: &str,
            _party_id: &PartyId,
            _ct: &CancellationToken,
        ) -> Result<Option<String>, SceneApiError> {
            Ok(Some("tok".to_string()))
        }

        async fn stop_merge(
            &self,
            _merger_id: &str,
            _party_id: &PartyId,
        ) -> Result<(), SceneApiError> {
            Ok(())
        }

        async fn get_status(
            &self,
            _merger_id: &str,
        ) -> Result<MergerStatusResponse, SceneApiError> {
            Ok(MergerStatusResponse {
                max_age: 5,
                data: serde_json::Value::Null,
            })
        }
    }

    struct NullMessaging;

    impl SceneMessaging for NullMessaging {
        fn send(
            &self,
            _filter: PeerFilter,
            _route: &str,
            _payload: serde_json::Value,
            _priority: SendPriority,
            _reliability: SendReliability,
        ) -> Result<(), SceneApiError> {
            Ok(())
        }
    }

    fn request_state() -> Arc<MergingRequestState> {
        Arc::new(MergingRequestState::new(
            PartyId::new("p1"),
            UserId::new("leader"),
            Arc::new(InstantClient),
            Arc::new(NullMessaging),
        ))
    }

    #[tokio::test]
    async fn non_leader_start_is_rejected_with_wire_code() {
        let state = request_state();
        let request = RpcRequest {
            route: PARTY_START_ROUTE.to_string(),
            origin: RequestOrigin::client("member", "s1"),
            payload: serde_json::Value::Null,
        };
        let err = PartyMergingController::start(state, "merger-1".to_string(), request)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::Client(code) if code == "notAuthorized?reason=notLeader"
        ));
    }

    #[tokio::test]
    async fn leader_start_runs_the_merge() {
        let state = request_state();
        let request = RpcRequest {
            route: PARTY_START_ROUTE.to_string(),
            origin: RequestOrigin::client("leader", "s0"),
            payload: serde_json::Value::Null,
        };
        let response = PartyMergingController::start(state, "merger-1".to_string(), request)
            .await
            .unwrap();
        assert_eq!(response["status"], "completed");
    }

    #[tokio::test]
    async fn client_origin_cannot_call_s2s_routes() {
        let request = RpcRequest {
            route: START_MERGE_ROUTE.to_string(),
            origin: RequestOrigin::client("anyone", "s1"),
            payload: serde_json::json!({ "party_id": "p1" }),
        };
        let err = PartyMergerController::require_server(&request).unwrap_err();
        assert!(matches!(
            err,
            ApiError::Client(code) if code == "notAuthorized?reason=serverOnly"
        ));
    }
}
