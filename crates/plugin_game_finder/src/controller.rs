//! RPC surface of the game-finder scene.
//!
//! Clients vote on ready checks and cancel their party's search; everything
//! else happens server-side through [`GameFinderService`].

use crate::service::GameFinderService;
use crate::settings::MatchSettings;
use scene_api::context::{RpcRequest, RpcServer};
use scene_api::error::{ApiError, SceneApiError};
use scene_api::types::{GameId, PartyId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const READY_RESOLVE_ROUTE: &str = "gamefinder.readyresolve";
pub const CANCEL_ROUTE: &str = "gamefinder.cancel";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyResolveRequest {
    pub game_id: GameId,
    pub accepts: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSearchRequest {
    pub party_id: PartyId,
}

pub struct GameFinderController<S: MatchSettings> {
    service: Arc<GameFinderService<S>>,
}

impl<S: MatchSettings> GameFinderController<S> {
    pub fn new(service: Arc<GameFinderService<S>>) -> Self {
        Self { service }
    }

    pub async fn register(&self, rpc: &dyn RpcServer) -> Result<(), SceneApiError> {
        {
            let service = self.service.clone();
            rpc.register(
                READY_RESOLVE_ROUTE,
                Arc::new(move |request: RpcRequest| {
                    let service = service.clone();
                    Box::pin(async move { Self::ready_resolve(service, request).await })
                }),
            )
            .await?;
        }
        {
            let service = self.service.clone();
            rpc.register(
                CANCEL_ROUTE,
                Arc::new(move |request: RpcRequest| {
                    let service = service.clone();
                    Box::pin(async move { Self::cancel(service, request).await })
                }),
            )
            .await?;
        }
        Ok(())
    }

    async fn ready_resolve(
        service: Arc<GameFinderService<S>>,
        request: RpcRequest,
    ) -> Result<serde_json::Value, ApiError> {
        let user_id = request
            .origin
            .user_id
            .ok_or_else(|| ApiError::not_authorized("notAuthenticated"))?;
        let vote: ReadyResolveRequest = serde_json::from_value(request.payload)
            .map_err(|e| ApiError::Client(format!("invalidRequest?reason={e}")))?;
        let check = service
            .ready_check(&vote.game_id)
            .ok_or_else(|| ApiError::Client("gameNotFound".to_string()))?;
        debug!("{} voted accepts={} on {}", user_id, vote.accepts, vote.game_id);
        check.resolve_player(&user_id, vote.accepts);
        Ok(serde_json::Value::Null)
    }

    async fn cancel(
        service: Arc<GameFinderService<S>>,
        request: RpcRequest,
    ) -> Result<serde_json::Value, ApiError> {
        let cancel: CancelSearchRequest = serde_json::from_value(request.payload)
            .map_err(|e| ApiError::Client(format!("invalidRequest?reason={e}")))?;
        // Servers may cancel any search; clients only their own party's.
        if !request.origin.is_server {
            let user_id = request
                .origin
                .user_id
                .ok_or_else(|| ApiError::not_authorized("notAuthenticated"))?;
            if !service.is_waiting_member(&cancel.party_id, &user_id) {
                return Err(ApiError::not_authorized("notInParty"));
            }
        }
        let removed = service.cancel_search(&cancel.party_id);
        Ok(serde_json::json!({ "removed": removed }))
    }
}
