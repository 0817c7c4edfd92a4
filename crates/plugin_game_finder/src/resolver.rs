//! # Game Resolution
//!
//! Turns an accepted game candidate into a concrete session plus a
//! per-player connection instruction. New games get a fresh session; joins
//! to existing games and open-session tickets reuse or create theirs. Every
//! player receives an individual connection token over the scene messaging
//! transport.

use crate::error::GameFinderError;
use async_trait::async_trait;
use futures::future::try_join_all;
use scene_api::context::{
    PeerFilter, SceneMessaging, SendPriority, SendReliability, SessionProvider,
};
use scene_api::types::{
    ExistingGame, GameCandidate, GameId, NewGame, OpenGameSessionTicket, Player, SessionId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Route on which per-player connection instructions are delivered.
pub const RESOLUTION_ROUTE: &str = "gamefinder.match.found";

/// Per-player instruction sent once resolution succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerResolution {
    pub game_id: GameId,
    pub session_id: SessionId,
    pub connection_token: String,
    #[serde(default)]
    pub public_data: serde_json::Value,
}

/// Context for players joining a game session that is already running.
#[derive(Debug, Clone)]
pub struct JoinExistingGameContext {
    pub game: ExistingGame,
    pub session_id: SessionId,
}

/// Context for players claiming slots advertised by an open-session ticket.
#[derive(Debug, Clone)]
pub struct JoinOpenGameContext {
    pub ticket: OpenGameSessionTicket,
    pub session_id: SessionId,
}

/// Resolves accepted candidates into connectable sessions.
#[async_trait]
pub trait GameFinderResolver: Send + Sync {
    async fn resolve(
        &self,
        game: &GameCandidate,
        ct: &CancellationToken,
    ) -> Result<(), GameFinderError>;
}

pub struct QuickQueueResolver {
    sessions: Arc<dyn SessionProvider>,
    messaging: Arc<dyn SceneMessaging>,
}

impl QuickQueueResolver {
    pub fn new(sessions: Arc<dyn SessionProvider>, messaging: Arc<dyn SceneMessaging>) -> Self {
        Self {
            sessions,
            messaging,
        }
    }

    async fn resolve_new_game(
        &self,
        game: &NewGame,
        ct: &CancellationToken,
    ) -> Result<(), GameFinderError> {
        let session_id = self
            .sessions
            .create_game_session(&game.id, &game.private_data, ct)
            .await?;
        info!("Created session {} for game {}", session_id, game.id);
        let players: Vec<&Player> = game.teams.iter().flat_map(|t| t.players()).collect();
        self.connect_players(game.id, &session_id, &players, &game.public_data, ct)
            .await
    }

    async fn resolve_existing_game(
        &self,
        game: &ExistingGame,
        ct: &CancellationToken,
    ) -> Result<(), GameFinderError> {
        let context = JoinExistingGameContext {
            game: game.clone(),
            session_id: game.session_id.clone(),
        };
        debug!(
            "Joining {} players to existing session {}",
            context.game.teams.iter().map(|t| t.player_count()).sum::<u32>(),
            context.session_id
        );
        let players: Vec<&Player> = context.game.teams.iter().flat_map(|t| t.players()).collect();
        self.connect_players(
            context.game.id,
            &context.session_id,
            &players,
            &serde_json::Value::Null,
            ct,
        )
        .await
    }

    async fn resolve_open_ticket(
        &self,
        ticket: &OpenGameSessionTicket,
        ct: &CancellationToken,
    ) -> Result<(), GameFinderError> {
        let session_id = self
            .sessions
            .create_game_session(&ticket.id, &ticket.custom_data, ct)
            .await?;
        let context = JoinOpenGameContext {
            ticket: ticket.clone(),
            session_id,
        };
        info!(
            "Opened session {} for ticket {}",
            context.session_id, context.ticket.id
        );
        let players: Vec<&Player> = context
            .ticket
            .teams
            .iter()
            .flat_map(|t| t.players())
            .collect();
        self.connect_players(
            context.ticket.id,
            &context.session_id,
            &players,
            &context.ticket.custom_data,
            ct,
        )
        .await
    }

    /// Mints one token per player, then delivers every instruction. Token
    /// creation runs concurrently; a single failure aborts the whole game
    /// so no partial lobby ever forms.
    async fn connect_players(
        &self,
        game_id: GameId,
        session_id: &SessionId,
        players: &[&Player],
        public_data: &serde_json::Value,
        ct: &CancellationToken,
    ) -> Result<(), GameFinderError> {
        let tokens = try_join_all(players.iter().map(|player| {
            let sessions = self.sessions.clone();
            async move {
                sessions
                    .create_connection_token(session_id, &player.user_id, ct)
                    .await
            }
        }))
        .await?;

        for (player, token) in players.iter().zip(tokens) {
            let resolution = PlayerResolution {
                game_id,
                session_id: session_id.clone(),
                connection_token: token,
                public_data: public_data.clone(),
            };
            let payload = serde_json::to_value(&resolution)
                .map_err(scene_api::error::SceneApiError::from)?;
            self.messaging.send(
                PeerFilter::Session(player.session_id.clone()),
                RESOLUTION_ROUTE,
                payload,
                SendPriority::High,
                SendReliability::ReliableOrdered,
            )?;
        }
        debug!(
            "Delivered {} connection tokens for game {}",
            players.len(),
            game_id
        );
        Ok(())
    }
}

#[async_trait]
impl GameFinderResolver for QuickQueueResolver {
    async fn resolve(
        &self,
        game: &GameCandidate,
        ct: &CancellationToken,
    ) -> Result<(), GameFinderError> {
        match game {
            GameCandidate::New(game) => self.resolve_new_game(game, ct).await,
            GameCandidate::Existing(game) => self.resolve_existing_game(game, ct).await,
            GameCandidate::OpenTicket(ticket) => self.resolve_open_ticket(ticket, ct).await,
        }
    }
}
