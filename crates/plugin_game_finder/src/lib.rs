//! Quick-Queue Game Finder Plugin
//!
//! Matchmaking for scene-hosted game servers:
//! - Greedy bin-packing of waiting parties into exact-size teams
//! - Optional multi-party ready check before a match commits
//! - Resolution into sessions and per-player connection tokens
//! - Periodic background pass over the waiting set

use async_trait::async_trait;
use scene_api::context::{SceneContext, ScenePlugin};
use scene_api::error::PluginError;
use std::sync::Arc;
use tracing::info;

pub mod config;
pub mod controller;
pub mod error;
pub mod finder;
pub mod ready_check;
pub mod resolver;
pub mod service;
pub mod settings;

pub use config::{GameFinderConfig, ReadyCheckConfig};
pub use controller::GameFinderController;
pub use error::GameFinderError;
pub use finder::QuickQueueGameFinder;
pub use ready_check::{ReadyCheck, ReadyCheckRegistry, ReadyCheckResult, ReadyCheckSnapshot};
pub use resolver::{GameFinderResolver, QuickQueueResolver};
pub use service::GameFinderService;
pub use settings::{
    MatchSettings, PartyDataSettingsProvider, QuickQueueSettings, SettingsProvider,
};

/// Game-finder plugin for one matchmaking scene.
pub struct GameFinderPlugin {
    name: String,
    version: String,
    config: GameFinderConfig,
    service: Option<Arc<GameFinderService<QuickQueueSettings>>>,
}

impl GameFinderPlugin {
    pub fn new(config: GameFinderConfig) -> Self {
        Self {
            name: "game_finder".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            config,
            service: None,
        }
    }

    /// The running service, once the plugin is initialized. Host glue uses
    /// this to enqueue parties arriving from party scenes.
    pub fn service(&self) -> Option<Arc<GameFinderService<QuickQueueSettings>>> {
        self.service.clone()
    }
}

#[async_trait]
impl ScenePlugin for GameFinderPlugin {
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

        let provider = Arc::new(PartyDataSettingsProvider::new(&self.config));
        let resolver = Arc::new(QuickQueueResolver::new(
            context.sessions(),
            context.messaging(),
        ));
        let service = Arc::new(GameFinderService::new(
            self.config.clone(),
            provider,
            resolver,
            context.messaging(),
        ));

        GameFinderController::new(service.clone())
            .register(context.rpc().as_ref())
            .await
            .map_err(|e| PluginError::InitializationFailed(e.to_string()))?;

        tokio::spawn(service.clone().run(context.shutdown_token()));
        self.service = Some(service);

        info!("✅ Game finder plugin initialized");
        Ok(())
    }

    async fn shutdown(&mut self, _context: Arc<dyn SceneContext>) -> Result<(), PluginError> {
        // The background loop exits with the scene shutdown token.
        self.service = None;
        info!("🛑 Game finder plugin shut down");
        Ok(())
    }
}
