//! # Scene Collaborator Traits
//!
//! The hosting framework provides every service a plugin needs at runtime:
//! peer messaging, session/token creation, party model lookups, telemetry
//! ingestion, scene keep-alive, and RPC route registration. Plugins receive
//! them through [`SceneContext`] and never talk to the framework directly.
//!
//! Implementations live in the host process and are out of scope for this
//! workspace; tests supply in-memory stand-ins.

use crate::error::{ApiError, PluginError, SceneApiError};
use crate::types::{GameId, Party, PartyId, SessionId, UserId};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Messaging
// ============================================================================

/// Selects which connected peers receive a message.
#[derive(Debug, Clone)]
pub enum PeerFilter {
    Session(SessionId),
    Sessions(Vec<SessionId>),
    Broadcast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPriority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendReliability {
    Unreliable,
    Reliable,
    ReliableOrdered,
}

/// Delivers serialized commands to connected peers.
///
/// Fire-and-forget: delivery failures for individual peers are the
/// transport's concern, not the caller's.
pub trait SceneMessaging: Send + Sync {
    fn send(
        &self,
        filter: PeerFilter,
        route: &str,
        payload: serde_json::Value,
        priority: SendPriority,
        reliability: SendReliability,
    ) -> Result<(), SceneApiError>;
}

// ============================================================================
// Sessions and Connection Tokens
// ============================================================================

/// A slot reservation placed against a party before players connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub party_id: PartyId,
    pub players: Vec<UserId>,
    #[serde(default)]
    pub custom_data: serde_json::Value,
}

/// Creates game sessions, reservations, and the tokens players use to
/// connect to them.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Mints a token that lets the holder connect to the scene hosting the
    /// given party.
    async fn create_connection_token_from_party_id(
        &self,
        party_id: &PartyId,
        extra_data: &serde_json::Value,
        ct: &CancellationToken,
    ) -> Result<String, SceneApiError>;

    /// Reserves slots in the given party ahead of a merge.
    async fn create_reservation(
        &self,
        party_id: &PartyId,
        reservation: &Reservation,
        ct: &CancellationToken,
    ) -> Result<(), SceneApiError>;

    /// Creates a fresh game session for a newly assembled game.
    async fn create_game_session(
        &self,
        game_id: &GameId,
        config: &serde_json::Value,
        ct: &CancellationToken,
    ) -> Result<SessionId, SceneApiError>;

    /// Mints a per-player token for an existing game session.
    async fn create_connection_token(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        ct: &CancellationToken,
    ) -> Result<String, SceneApiError>;
}

// ============================================================================
// Party Models
// ============================================================================

/// Fetches the current live membership and settings of a party.
///
/// Lookups can fail (network errors, party torn down); callers are expected
/// to isolate failures per party.
#[async_trait]
pub trait PartyModelProvider: Send + Sync {
    async fn get_model(
        &self,
        party_id: &PartyId,
        ct: &CancellationToken,
    ) -> Result<Party, SceneApiError>;
}

// ============================================================================
// Telemetry and Lifetime
// ============================================================================

/// Fire-and-forget telemetry ingestion, batched and flushed by the host.
pub trait AnalyticsSink: Send + Sync {
    fn push(&self, category: &str, subcategory: &str, payload: serde_json::Value);
}

/// Extends the lifetime of the hosting scene.
pub trait SceneKeepAlive: Send + Sync {
    fn keep_alive(&self, duration: Duration);
}

// ============================================================================
// RPC
// ============================================================================

/// Who issued an RPC request.
#[derive(Debug, Clone, Default)]
pub struct RequestOrigin {
    /// Authenticated user, when the call came from a client peer.
    pub user_id: Option<UserId>,
    pub session_id: Option<SessionId>,
    /// Set for server-to-server calls, which bypass per-user authorization.
    pub is_server: bool,
}

impl RequestOrigin {
    pub fn server() -> Self {
        Self {
            user_id: None,
            session_id: None,
            is_server: true,
        }
    }

    pub fn client(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(UserId::new(user_id)),
            session_id: Some(SessionId::new(session_id)),
            is_server: false,
        }
    }
}

/// An incoming RPC request with its JSON payload.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub route: String,
    pub origin: RequestOrigin,
    pub payload: serde_json::Value,
}

/// Type-erased asynchronous RPC handler. The framework owns the wire
/// serialization; handlers see JSON in and JSON out.
pub type RpcHandler =
    Arc<dyn Fn(RpcRequest) -> BoxFuture<'static, Result<serde_json::Value, ApiError>> + Send + Sync>;

/// Registers RPC routes on the hosting scene.
#[async_trait]
pub trait RpcServer: Send + Sync {
    async fn register(&self, route: &str, handler: RpcHandler) -> Result<(), SceneApiError>;
}

// ============================================================================
// Scene Context and Plugin Contract
// ============================================================================

/// Everything the hosting scene hands to a plugin at initialization.
pub trait SceneContext: Send + Sync {
    fn messaging(&self) -> Arc<dyn SceneMessaging>;
    fn sessions(&self) -> Arc<dyn SessionProvider>;
    fn parties(&self) -> Arc<dyn PartyModelProvider>;
    fn analytics(&self) -> Arc<dyn AnalyticsSink>;
    fn keep_alive(&self) -> Arc<dyn SceneKeepAlive>;
    fn rpc(&self) -> Arc<dyn RpcServer>;
    /// Fires when the hosting scene shuts down; background loops must exit.
    fn shutdown_token(&self) -> CancellationToken;
}

/// Contract implemented by every scene-hosted plugin.
#[async_trait]
pub trait ScenePlugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Called once when the hosting scene starts. Register routes and spawn
    /// background loops here.
    async fn init(&mut self, context: Arc<dyn SceneContext>) -> Result<(), PluginError>;

    /// Called once when the hosting scene shuts down.
    async fn shutdown(&mut self, context: Arc<dyn SceneContext>) -> Result<(), PluginError>;
}
