//! # Ready-Check State Machine
//!
//! Per-candidate-game consensus protocol. Every player in the candidate
//! votes `Ready` or `NotReady`; the aggregate resolves as soon as the
//! outcome is decided:
//!
//! - `NotReady` the moment any player declines
//! - `Ready` once every player has accepted
//! - `Unknown` otherwise
//!
//! The check only aggregates votes. Timeout policy is the owner's: the
//! deadline is exposed so the owner can race it against completion and
//! decline any player still at `Unknown` when it fires.

use dashmap::DashMap;
use scene_api::types::{GameCandidate, GameId, Party, Readiness, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

/// Outcome of a completed ready check.
///
/// On failure the parties are partitioned: a party is unready iff any of its
/// players voted `NotReady`. The owner requeues the ready group and drops
/// the unready one.
#[derive(Debug, Clone)]
pub struct ReadyCheckResult {
    pub game_id: GameId,
    pub success: bool,
    pub ready_parties: Vec<Party>,
    pub unready_parties: Vec<Party>,
}

/// Serializable state snapshot broadcast to clients on every vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyCheckSnapshot {
    pub game_id: GameId,
    pub players: Vec<PlayerReadiness>,
    pub remaining_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerReadiness {
    pub user_id: UserId,
    pub readiness: Readiness,
}

type StateChangedCallback = Box<dyn Fn(ReadyCheckSnapshot) + Send + Sync>;

struct VoteState {
    votes: HashMap<UserId, Readiness>,
    resolved: bool,
}

/// A ready check for one game candidate.
pub struct ReadyCheck {
    game: GameCandidate,
    deadline: Instant,
    state: Mutex<VoteState>,
    completion_tx: watch::Sender<Option<ReadyCheckResult>>,
    on_state_changed: Option<StateChangedCallback>,
}

impl ReadyCheck {
    pub fn new(game: GameCandidate, timeout: Duration) -> Self {
        let votes = game
            .players()
            .map(|p| (p.user_id.clone(), Readiness::Unknown))
            .collect();
        let (completion_tx, _) = watch::channel(None);
        Self {
            game,
            deadline: Instant::now() + timeout,
            state: Mutex::new(VoteState {
                votes,
                resolved: false,
            }),
            completion_tx,
            on_state_changed: None,
        }
    }

    /// Installs the snapshot callback fired on every state change.
    pub fn with_state_changed(
        mut self,
        callback: impl Fn(ReadyCheckSnapshot) + Send + Sync + 'static,
    ) -> Self {
        self.on_state_changed = Some(Box::new(callback));
        self
    }

    pub fn game_id(&self) -> GameId {
        self.game.id()
    }

    /// Deadline the owner races against [`Self::when_complete`].
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Records a player's vote. Votes from players outside the check and
    /// repeat votes are ignored; each player transitions out of `Unknown`
    /// exactly once.
    pub fn resolve_player(&self, user_id: &UserId, accepts: bool) {
        let (snapshot, result) = {
            let mut state = match self.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if state.resolved {
                return;
            }
            match state.votes.get_mut(user_id) {
                Some(vote @ Readiness::Unknown) => {
                    *vote = if accepts {
                        Readiness::Ready
                    } else {
                        Readiness::NotReady
                    };
                }
                Some(_) | None => return,
            }

            let aggregate = Self::aggregate(&state.votes);
            let result = if aggregate != Readiness::Unknown {
                state.resolved = true;
                Some(self.partition(&state.votes, aggregate == Readiness::Ready))
            } else {
                None
            };
            (self.snapshot(&state.votes), result)
        };

        if let Some(callback) = &self.on_state_changed {
            callback(snapshot);
        }
        if let Some(result) = result {
            info!(
                "Ready check {} resolved: success={}",
                result.game_id, result.success
            );
            let _ = self.completion_tx.send(Some(result));
        }
    }

    /// Declines on behalf of a player, used for disconnects and timeouts.
    pub fn cancel_player(&self, user_id: &UserId) {
        self.resolve_player(user_id, false);
    }

    /// Declines every player still at `Unknown`, forcing resolution. Called
    /// by the owner when the deadline fires.
    pub fn expire(&self) {
        let unresolved: Vec<UserId> = {
            let state = match self.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            state
                .votes
                .iter()
                .filter(|(_, r)| **r == Readiness::Unknown)
                .map(|(u, _)| u.clone())
                .collect()
        };
        for user_id in unresolved {
            debug!("Ready check {}: {} timed out", self.game.id(), user_id);
            self.cancel_player(&user_id);
        }
    }

    pub fn global_state(&self) -> Readiness {
        let state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Self::aggregate(&state.votes)
    }

    /// Resolves once every player has voted (or the owner expired the
    /// check). Returns `None` only if the check is torn down unresolved.
    pub async fn when_complete(&self) -> Option<ReadyCheckResult> {
        let mut rx = self.completion_tx.subscribe();
        let result = rx.wait_for(|v| v.is_some()).await.ok()?;
        result.clone()
    }

    fn aggregate(votes: &HashMap<UserId, Readiness>) -> Readiness {
        let mut all_ready = true;
        for readiness in votes.values() {
            match readiness {
                Readiness::NotReady => return Readiness::NotReady,
                Readiness::Unknown => all_ready = false,
                Readiness::Ready => {}
            }
        }
        if all_ready {
            Readiness::Ready
        } else {
            Readiness::Unknown
        }
    }

    fn partition(&self, votes: &HashMap<UserId, Readiness>, success: bool) -> ReadyCheckResult {
        let mut ready_parties = Vec::new();
        let mut unready_parties = Vec::new();
        for party in self.game.parties() {
            let declined = party
                .players
                .iter()
                .any(|p| votes.get(&p.user_id) == Some(&Readiness::NotReady));
            if declined {
                unready_parties.push(party.clone());
            } else {
                ready_parties.push(party.clone());
            }
        }
        ReadyCheckResult {
            game_id: self.game.id(),
            success,
            ready_parties,
            unready_parties,
        }
    }

    fn snapshot(&self, votes: &HashMap<UserId, Readiness>) -> ReadyCheckSnapshot {
        // Snapshot players in team order for a stable client display.
        let players = self
            .game
            .players()
            .map(|p| PlayerReadiness {
                user_id: p.user_id.clone(),
                readiness: votes
                    .get(&p.user_id)
                    .copied()
                    .unwrap_or(Readiness::Unknown),
            })
            .collect();
        ReadyCheckSnapshot {
            game_id: self.game.id(),
            players,
            remaining_ms: self.remaining().as_millis() as u64,
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Per-scene registry of in-flight ready checks.
///
/// Owners close a check when it completes; closing releases the slot so the
/// game id can never resolve twice.
#[derive(Default)]
pub struct ReadyCheckRegistry {
    checks: DashMap<GameId, std::sync::Arc<ReadyCheck>>,
}

impl ReadyCheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, check: ReadyCheck) -> std::sync::Arc<ReadyCheck> {
        let check = std::sync::Arc::new(check);
        self.checks.insert(check.game_id(), check.clone());
        check
    }

    pub fn get(&self, game_id: &GameId) -> Option<std::sync::Arc<ReadyCheck>> {
        self.checks.get(game_id).map(|c| c.clone())
    }

    pub fn close(&self, game_id: &GameId) {
        self.checks.remove(game_id);
    }

    /// Ids of every in-flight check.
    pub fn ids(&self) -> Vec<GameId> {
        self.checks.iter().map(|c| *c.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}
