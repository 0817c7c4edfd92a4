//! # Game-Finder Service
//!
//! Owns the waiting-party collection and drives the periodic matching pass.
//! Accepted games optionally go through a ready check before resolution;
//! ready parties from a failed check are requeued, unready parties are
//! dropped from matchmaking.

use crate::config::GameFinderConfig;
use crate::finder::QuickQueueGameFinder;
use crate::ready_check::{ReadyCheck, ReadyCheckRegistry, ReadyCheckResult};
use crate::resolver::GameFinderResolver;
use crate::settings::{MatchSettings, SettingsProvider};
use scene_api::context::{PeerFilter, SceneMessaging, SendPriority, SendReliability};
use scene_api::types::{GameCandidate, GameId, Party, PartyId, SessionId};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Route on which ready-check state snapshots are broadcast.
pub const READY_CHECK_UPDATE_ROUTE: &str = "gamefinder.readycheck.update";

pub struct GameFinderService<S: MatchSettings> {
    finder: QuickQueueGameFinder<S>,
    resolver: Arc<dyn GameFinderResolver>,
    ready_checks: ReadyCheckRegistry,
    messaging: Arc<dyn SceneMessaging>,
    config: GameFinderConfig,
    waiting: Mutex<Vec<Party>>,
}

impl<S: MatchSettings> GameFinderService<S> {
    pub fn new(
        config: GameFinderConfig,
        provider: Arc<dyn SettingsProvider<S>>,
        resolver: Arc<dyn GameFinderResolver>,
        messaging: Arc<dyn SceneMessaging>,
    ) -> Self {
        Self {
            finder: QuickQueueGameFinder::new(provider),
            resolver,
            ready_checks: ReadyCheckRegistry::new(),
            messaging,
            config,
            waiting: Mutex::new(Vec::new()),
        }
    }

    /// Adds a party to the waiting set. Re-enqueueing an already waiting
    /// party is a no-op.
    pub fn enqueue(&self, party: Party) {
        let mut waiting = match self.waiting.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if waiting.iter().any(|p| p.id == party.id) {
            debug!("Party {} is already waiting", party.id);
            return;
        }
        info!(
            "Party {} entered matchmaking ({} players)",
            party.id,
            party.player_count()
        );
        waiting.push(party);
    }

    /// Removes a party from the waiting set. Returns whether it was
    /// waiting.
    pub fn cancel_search(&self, party_id: &PartyId) -> bool {
        let mut waiting = match self.waiting.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = waiting.len();
        waiting.retain(|p| &p.id != party_id);
        let removed = waiting.len() < before;
        if removed {
            info!("Party {} left matchmaking", party_id);
        }
        removed
    }

    pub fn waiting_count(&self) -> usize {
        match self.waiting.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Whether the given user belongs to a waiting party with the given id.
    pub fn is_waiting_member(&self, party_id: &PartyId, user_id: &scene_api::UserId) -> bool {
        let waiting = match self.waiting.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        waiting
            .iter()
            .any(|p| &p.id == party_id && p.contains_user(user_id))
    }

    pub fn ready_check(&self, game_id: &GameId) -> Option<Arc<ReadyCheck>> {
        self.ready_checks.get(game_id)
    }

    /// Ids of every in-flight ready check.
    pub fn ready_check_ids(&self) -> Vec<GameId> {
        self.ready_checks.ids()
    }

    /// Background loop. Exits when the scene shutdown token fires.
    pub async fn run(self: Arc<Self>, ct: CancellationToken) {
        info!(
            "Game finder started (team_size={}, team_count={})",
            self.config.team_size, self.config.team_count
        );
        let mut tick = tokio::time::interval(self.config.tick_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ct.cancelled() => {
                    info!("Game finder loop shutting down");
                    break;
                }
                _ = tick.tick() => {
                    self.run_pass(&ct).await;
                }
            }
        }
    }

    /// One matching pass. Never propagates errors into the loop.
    pub async fn run_pass(self: &Arc<Self>, ct: &CancellationToken) {
        let mut parties = {
            let mut waiting = match self.waiting.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *waiting)
        };

        let result = self.finder.find_games(&mut parties).await;

        {
            // Put survivors back in front of parties enqueued mid-pass.
            let mut waiting = match self.waiting.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            parties.append(&mut waiting);
            *waiting = parties;
        }

        for game in result.games {
            let service = self.clone();
            let ct = ct.clone();
            if self.config.ready_check.enabled {
                tokio::spawn(async move {
                    service.drive_ready_check(game, ct).await;
                });
            } else {
                tokio::spawn(async move {
                    service.resolve_game(&game, &ct).await;
                });
            }
        }
    }

    /// Runs the ready check for one accepted game, racing the deadline
    /// against completion, then resolves or requeues.
    async fn drive_ready_check(self: Arc<Self>, game: GameCandidate, ct: CancellationToken) {
        let game_id = game.id();
        let peers: Vec<SessionId> = game.players().map(|p| p.session_id.clone()).collect();
        let messaging = self.messaging.clone();
        let check = self.ready_checks.insert(
            ReadyCheck::new(game.clone(), self.config.ready_check_timeout()).with_state_changed(
                move |snapshot| {
                    let payload = match serde_json::to_value(&snapshot) {
                        Ok(payload) => payload,
                        Err(e) => {
                            error!("Failed to serialize ready-check snapshot: {}", e);
                            return;
                        }
                    };
                    if let Err(e) = messaging.send(
                        PeerFilter::Sessions(peers.clone()),
                        READY_CHECK_UPDATE_ROUTE,
                        payload,
                        SendPriority::Medium,
                        SendReliability::ReliableOrdered,
                    ) {
                        warn!("Failed to broadcast ready-check update: {}", e);
                    }
                },
            ),
        );

        let result = tokio::select! {
            result = check.when_complete() => result,
            _ = tokio::time::sleep_until(check.deadline()) => {
                debug!("Ready check {} timed out", game_id);
                check.expire();
                check.when_complete().await
            }
            _ = ct.cancelled() => None,
        };
        self.ready_checks.close(&game_id);

        match result {
            Some(ReadyCheckResult { success: true, .. }) => {
                self.resolve_game(&game, &ct).await;
            }
            Some(result) => {
                info!(
                    "Ready check {} failed: requeueing {} parties, dropping {}",
                    game_id,
                    result.ready_parties.len(),
                    result.unready_parties.len()
                );
                for party in result.ready_parties {
                    self.enqueue(party);
                }
            }
            None => {
                debug!("Ready check {} abandoned during shutdown", game_id);
            }
        }
    }

    async fn resolve_game(&self, game: &GameCandidate, ct: &CancellationToken) {
        if let Err(e) = self.resolver.resolve(game, ct).await {
            error!("Failed to resolve game {}: {}", game.id(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReadyCheckConfig;
    use crate::error::GameFinderError;
    use crate::settings::QuickQueueSettings;
    use async_trait::async_trait;
    use scene_api::error::SceneApiError;
    use scene_api::types::Player;
    use std::time::Duration;

    struct FixedProvider;

    #[async_trait]
    impl SettingsProvider<QuickQueueSettings> for FixedProvider {
        async fn settings(&self, _party: &Party) -> Result<QuickQueueSettings, GameFinderError> {
            Ok(QuickQueueSettings {
                team_size: 2,
                team_count: 2,
                platform: None,
                cross_play: true,
            })
        }
    }

    #[derive(Default)]
    struct RecordingResolver {
        resolved: Mutex<Vec<GameId>>,
    }

    #[async_trait]
    impl GameFinderResolver for RecordingResolver {
        async fn resolve(
            &self,
            game: &GameCandidate,
            _ct: &CancellationToken,
        ) -> Result<(), GameFinderError> {
            self.resolved.lock().unwrap().push(game.id());
            Ok(())
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

    fn party_of(id: &str, players: usize) -> Party {
        let players = (0..players)
            .map(|i| Player::new(format!("{id}-u{i}"), format!("{id}-s{i}")))
            .collect();
        Party::new(id, format!("{id}-u0")).with_players(players)
    }

    fn service(ready_check_enabled: bool) -> (Arc<GameFinderService<QuickQueueSettings>>, Arc<RecordingResolver>) {
        let resolver = Arc::new(RecordingResolver::default());
        let config = GameFinderConfig {
            team_size: 2,
            team_count: 2,
            tick_interval_ms: 50,
            ready_check: ReadyCheckConfig {
                enabled: ready_check_enabled,
                timeout_ms: 5_000,
            },
        };
        let service = Arc::new(GameFinderService::new(
            config,
            Arc::new(FixedProvider),
            resolver.clone(),
            Arc::new(NullMessaging),
        ));
        (service, resolver)
    }

    #[tokio::test]
    async fn pass_resolves_matched_games_without_ready_check() {
        let (service, resolver) = service(false);
        service.enqueue(party_of("a", 2));
        service.enqueue(party_of("b", 1));
        service.enqueue(party_of("c", 1));

        service.run_pass(&CancellationToken::new()).await;
        // Resolution is spawned; give it a moment.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(resolver.resolved.lock().unwrap().len(), 1);
        assert_eq!(service.waiting_count(), 0);
    }

    #[tokio::test]
    async fn failed_ready_check_requeues_ready_parties() {
        let (service, resolver) = service(true);
        service.enqueue(party_of("a", 2));
        service.enqueue(party_of("b", 2));

        let ct = CancellationToken::new();
        service.run_pass(&ct).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // One in-flight check; a accepts, b declines.
        let game_id = service
            .ready_checks
            .ids()
            .pop()
            .expect("ready check should be registered");
        let check = service.ready_check(&game_id).unwrap();
        check.resolve_player(&scene_api::UserId::new("a-u0"), true);
        check.resolve_player(&scene_api::UserId::new("a-u1"), true);
        check.resolve_player(&scene_api::UserId::new("b-u0"), false);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(resolver.resolved.lock().unwrap().is_empty());
        // Party a is waiting again, party b is gone.
        assert_eq!(service.waiting_count(), 1);
        ct.cancel();
    }

    #[tokio::test]
    async fn cancel_search_removes_waiting_party() {
        let (service, _) = service(false);
        service.enqueue(party_of("a", 1));
        assert!(service.cancel_search(&PartyId::new("a")));
        assert!(!service.cancel_search(&PartyId::new("a")));
        assert_eq!(service.waiting_count(), 0);
    }
}
