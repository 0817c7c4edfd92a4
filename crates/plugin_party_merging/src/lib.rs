//! Party Merging Plugins
//!
//! Continuous merging of small parties into larger ones:
//! - A merger-scene engine pairing parties toward a target size, with
//!   per-party cancellation, rolling analytics and keep-alive feedback
//! - A party-scene request state driving one party's merge lifecycle,
//!   including pause/restart around game-finder runs
//! - Server-to-server and leader-only client RPC surfaces

use async_trait::async_trait;
use scene_api::context::{SceneContext, ScenePlugin};
use scene_api::error::PluginError;
use scene_api::types::{PartyId, UserId};
use std::sync::Arc;
use tracing::info;

pub mod algorithm;
pub mod analytics;
pub mod cancellation;
pub mod config;
pub mod controller;
pub mod error;
pub mod party_state;
pub mod service;

pub use algorithm::{
    MergeCommand, MergingContext, PartyMergingAlgorithm, SimplePartyMergingAlgorithm,
};
pub use analytics::AnalyticsAccumulator;
pub use cancellation::LinkedCancellation;
pub use config::PartyMergingConfig;
pub use controller::{PartyMergerController, PartyMergingController};
pub use error::{MergingError, MergingResult};
pub use party_state::{MergeCompletion, MergingRequestState, MergingStatus, PartyMergerClient};
pub use service::{MergeOutcome, MergerStatusResponse, MergingAnalytics, PartyMergingService};

// ============================================================================
// Merger-Scene Plugin
// ============================================================================

/// Hosts the merging engine on a merger scene.
pub struct PartyMergerPlugin {
    name: String,
    version: String,
    config: PartyMergingConfig,
    service: Option<Arc<PartyMergingService>>,
}

impl PartyMergerPlugin {
    pub fn new(config: PartyMergingConfig) -> Self {
        Self {
            name: "party_merger".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            config,
            service: None,
        }
    }

    pub fn service(&self) -> Option<Arc<PartyMergingService>> {
        self.service.clone()
    }
}

#[async_trait]
impl ScenePlugin for PartyMergerPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    async fn init(&mut self, context: Arc<dyn SceneContext>) -> Result<(), PluginError> {
        self.config
            .validate()
            .map_err(|e| PluginError::InitializationFailed(e.to_string()))?;

        let algorithm = Arc::new(SimplePartyMergingAlgorithm::new(
            self.config.target_party_size,
        ));
        let service = Arc::new(PartyMergingService::new(
            self.config.clone(),
            algorithm,
            context.parties(),
            context.sessions(),
            context.analytics(),
            context.keep_alive(),
        ));

        PartyMergerController::new(service.clone())
            .register(context.rpc().as_ref())
            .await
            .map_err(|e| PluginError::InitializationFailed(e.to_string()))?;

        tokio::spawn(service.clone().run(context.shutdown_token()));
        self.service = Some(service);

        info!("✅ Party merger plugin initialized");
        Ok(())
    }

    async fn shutdown(&mut self, _context: Arc<dyn SceneContext>) -> Result<(), PluginError> {
        self.service = None;
        info!("🛑 Party merger plugin shut down");
        Ok(())
    }
}

// ============================================================================
// Party-Scene Plugin
// ============================================================================

/// Hosts the merge request state on a party scene.
///
/// The merger client is framework glue (service locator plus S2S transport)
/// and is injected by the host.
pub struct PartyMergingPlugin {
    name: String,
    version: String,
    party_id: PartyId,
    leader_id: UserId,
    merger_id: String,
    client: Arc<dyn PartyMergerClient>,
    state: Option<Arc<MergingRequestState>>,
}

impl PartyMergingPlugin {
    pub fn new(
        party_id: PartyId,
        leader_id: UserId,
        merger_id: impl Into<String>,
        client: Arc<dyn PartyMergerClient>,
    ) -> Self {
        Self {
            name: "party_merging".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            party_id,
            leader_id,
            merger_id: merger_id.into(),
            client,
            state: None,
        }
    }

    /// The request state, once initialized. Host glue uses this to pause and
    /// restart merging around game-finder runs.
    pub fn state(&self) -> Option<Arc<MergingRequestState>> {
        self.state.clone()
    }
}

#[async_trait]
impl ScenePlugin for PartyMergingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    async fn init(&mut self, context: Arc<dyn SceneContext>) -> Result<(), PluginError> {
        let state = Arc::new(MergingRequestState::new(
            self.party_id.clone(),
            self.leader_id.clone(),
            self.client.clone(),
            context.messaging(),
        ));

        PartyMergingController::new(state.clone(), self.merger_id.clone())
            .register(context.rpc().as_ref())
            .await
            .map_err(|e| PluginError::InitializationFailed(e.to_string()))?;

        self.state = Some(state);
        info!("Party merging plugin initialized for party {}", self.party_id);
        Ok(())
    }

    async fn shutdown(&mut self, _context: Arc<dyn SceneContext>) -> Result<(), PluginError> {
        if let Some(state) = self.state.take() {
            state.stop().await;
        }
        info!("Party merging plugin shut down for party {}", self.party_id);
        Ok(())
    }
}
