//! # Scene API
//!
//! Framework-facing surface shared by all scene-hosted plugins. The hosting
//! framework (scene lifecycle, peer transport, dependency resolution) lives
//! outside this workspace; plugins consume it exclusively through the traits
//! defined here.
//!
//! ## Key Modules
//!
//! - [`types`] - Identifiers and the party/team/game data model
//! - [`cache`] - Per-party scratch storage shared across algorithm passes
//! - [`context`] - Collaborator traits provided by the hosting scene
//! - [`error`] - Shared error taxonomy for plugins and RPC surfaces

pub mod cache;
pub mod context;
pub mod error;
pub mod types;

pub use cache::CacheStorage;
pub use context::{
    AnalyticsSink, PartyModelProvider, PeerFilter, Reservation, RequestOrigin, RpcHandler,
    RpcRequest, RpcServer, SceneContext, SceneKeepAlive, SceneMessaging, ScenePlugin,
    SendPriority, SendReliability, SessionProvider,
};
pub use error::{ApiError, PluginError, SceneApiError};
pub use types::{
    ExistingGame, GameCandidate, GameFinderResult, GameId, NewGame, OpenGameSessionTicket, Party,
    PartyId, Player, Readiness, SessionId, Team, UserId,
};
