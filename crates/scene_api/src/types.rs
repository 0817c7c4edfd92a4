//! # Core Type Definitions
//!
//! Identifiers and the party/team/game data model shared by the matchmaking
//! plugins. Wrapper types prevent ID confusion (a `PartyId` can never be
//! passed where a `SessionId` is expected), and every type that crosses the
//! wire supports JSON serialization.

use crate::cache::CacheStorage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a user account.
///
/// User identifiers are assigned by the platform's identity service and are
/// treated as opaque strings by the matchmaking plugins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a party.
///
/// Parties are created and owned by the hosting framework's party scenes;
/// the matchmaking plugins only ever reference them by id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(pub String);

impl PartyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PartyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Peer session identifier used to address a connected client through the
/// scene messaging transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a candidate game produced by a matching pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GameId(pub Uuid);

impl GameId {
    /// Creates a new random game ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GameId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Party Model
// ============================================================================

/// A player inside a party.
///
/// Carries the peer session id so resolution results (connection tokens,
/// ready-check updates) can be delivered to the right client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub user_id: UserId,
    pub session_id: SessionId,
    /// Opaque custom data attached by the party scene.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Player {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            session_id: SessionId::new(session_id),
            data: serde_json::Value::Null,
        }
    }
}

/// A party of players waiting to be matched or merged.
///
/// The party model is fetched from the party scene on demand; the attached
/// [`CacheStorage`] survives re-fetches so per-party computed values
/// (resolved matchmaking settings, for example) are computed once and reused
/// across algorithm passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Party {
    pub id: PartyId,
    pub leader_id: UserId,
    /// Ordered party membership.
    pub players: Vec<Player>,
    #[serde(default)]
    pub custom_data: serde_json::Value,
    #[serde(skip, default)]
    pub cache: CacheStorage,
}

impl Party {
    pub fn new(id: impl Into<String>, leader_id: impl Into<String>) -> Self {
        Self {
            id: PartyId::new(id),
            leader_id: UserId::new(leader_id),
            players: Vec::new(),
            custom_data: serde_json::Value::Null,
            cache: CacheStorage::new(),
        }
    }

    pub fn with_players(mut self, players: Vec<Player>) -> Self {
        self.players = players;
        self
    }

    pub fn player_count(&self) -> u32 {
        self.players.len() as u32
    }

    pub fn contains_user(&self, user_id: &UserId) -> bool {
        self.players.iter().any(|p| &p.user_id == user_id)
    }
}

// ============================================================================
// Teams
// ============================================================================

/// An ordered collection of parties filling one side of a game.
///
/// The sum of contained players never exceeds `target_size`; a team is
/// complete when the player count equals the target exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    parties: Vec<Party>,
    target_size: u32,
}

impl Team {
    pub fn new(target_size: u32) -> Self {
        Self {
            parties: Vec::new(),
            target_size,
        }
    }

    pub fn target_size(&self) -> u32 {
        self.target_size
    }

    pub fn player_count(&self) -> u32 {
        self.parties.iter().map(|p| p.player_count()).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.player_count() == self.target_size
    }

    /// Adds a party, rejecting the insertion if it would overflow the team.
    pub fn add_party(&mut self, party: Party) -> Result<(), crate::error::SceneApiError> {
        let attempted = self.player_count() + party.player_count();
        if attempted > self.target_size {
            return Err(crate::error::SceneApiError::TeamOverflow {
                capacity: self.target_size,
                attempted,
            });
        }
        self.parties.push(party);
        Ok(())
    }

    pub fn parties(&self) -> &[Party] {
        &self.parties
    }

    pub fn into_parties(self) -> Vec<Party> {
        self.parties
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.parties.iter().flat_map(|p| p.players.iter())
    }
}

// ============================================================================
// Game Candidates
// ============================================================================

/// A brand new game assembled from waiting parties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGame {
    pub id: GameId,
    pub teams: Vec<Team>,
    /// Data broadcast to every participant.
    pub public_data: serde_json::Value,
    /// Data reserved for the session host.
    pub private_data: serde_json::Value,
}

impl NewGame {
    pub fn new(teams: Vec<Team>) -> Self {
        Self {
            id: GameId::new(),
            teams,
            public_data: serde_json::Value::Null,
            private_data: serde_json::Value::Null,
        }
    }
}

/// Parties joining a game session that is already running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistingGame {
    pub id: GameId,
    pub session_id: SessionId,
    pub teams: Vec<Team>,
}

/// A ticket advertising free slots in a session that accepts late joiners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenGameSessionTicket {
    pub id: GameId,
    pub teams: Vec<Team>,
    #[serde(default)]
    pub custom_data: serde_json::Value,
}

/// A candidate match produced by a matching pass.
///
/// Candidates live for exactly one pass: created by the matching algorithm,
/// handed to the resolver, then discarded whatever the outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GameCandidate {
    New(NewGame),
    Existing(ExistingGame),
    OpenTicket(OpenGameSessionTicket),
}

impl GameCandidate {
    pub fn id(&self) -> GameId {
        match self {
            GameCandidate::New(g) => g.id,
            GameCandidate::Existing(g) => g.id,
            GameCandidate::OpenTicket(t) => t.id,
        }
    }

    pub fn teams(&self) -> &[Team] {
        match self {
            GameCandidate::New(g) => &g.teams,
            GameCandidate::Existing(g) => &g.teams,
            GameCandidate::OpenTicket(t) => &t.teams,
        }
    }

    /// Every party contained in the candidate, in team order.
    pub fn parties(&self) -> impl Iterator<Item = &Party> {
        self.teams().iter().flat_map(|t| t.parties().iter())
    }

    /// Every player contained in the candidate, in team order.
    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.teams().iter().flat_map(|t| t.players())
    }
}

/// Everything one matching pass produced.
#[derive(Debug, Clone, Default)]
pub struct GameFinderResult {
    pub games: Vec<GameCandidate>,
}

impl GameFinderResult {
    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}

// ============================================================================
// Readiness
// ============================================================================

/// Vote state of a player (or the aggregate of a whole check) during a
/// ready check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Readiness {
    Unknown,
    Ready,
    NotReady,
}

impl Default for Readiness {
    fn default() -> Self {
        Readiness::Unknown
    }
}
