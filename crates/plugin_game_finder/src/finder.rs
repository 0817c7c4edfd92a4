//! # Quick-Queue Matching Algorithm
//!
//! Greedy bin-packing of waiting parties into games of `team_count` teams of
//! exactly `team_size` players each:
//!
//! 1. Resolve per-party settings (memoized in the party cache).
//! 2. Group parties by their settings group key.
//! 3. Within a group, sort by descending player count and fill teams
//!    largest-first; only exact-size teams ship.
//! 4. Repeat until a pass produces no new game.
//!
//! Parties used by an accepted game are removed from the waiting set; every
//! other party is left untouched for the next pass. Starvation of parties
//! that never group with anyone is an accepted trade-off of the greedy
//! design.

use crate::error::GameFinderError;
use crate::settings::{MatchSettings, SettingsProvider, SETTINGS_CACHE_KEY};
use scene_api::types::{GameCandidate, GameFinderResult, NewGame, Party, PartyId, Team};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// One party with its resolved settings, inside a matching pass.
struct Candidate<S> {
    party: Party,
    settings: Arc<S>,
}

pub struct QuickQueueGameFinder<S: MatchSettings> {
    provider: Arc<dyn SettingsProvider<S>>,
}

impl<S: MatchSettings> QuickQueueGameFinder<S> {
    pub fn new(provider: Arc<dyn SettingsProvider<S>>) -> Self {
        Self { provider }
    }

    /// Runs one matching pass over the waiting set.
    ///
    /// Matched parties are removed from `waiting`; incompatible or
    /// insufficient parties stay for the next pass. An empty waiting set is
    /// a no-op.
    pub async fn find_games(&self, waiting: &mut Vec<Party>) -> GameFinderResult {
        let mut result = GameFinderResult::default();
        if waiting.is_empty() {
            return result;
        }

        let mut groups: HashMap<S::GroupKey, Vec<Candidate<S>>> = HashMap::new();
        for party in waiting.iter() {
            let settings = match self.resolve_settings(party).await {
                Ok(settings) => settings,
                Err(e) => {
                    // The party stays in the waiting set and is retried on
                    // the next pass.
                    warn!("Skipping party {} this pass: {}", party.id, e);
                    continue;
                }
            };
            groups
                .entry(settings.group_key())
                .or_default()
                .push(Candidate {
                    party: party.clone(),
                    settings,
                });
        }

        let mut matched: HashSet<PartyId> = HashSet::new();
        for (key, mut candidates) in groups {
            // Largest parties first minimizes fragmentation.
            candidates.sort_by(|a, b| b.party.player_count().cmp(&a.party.player_count()));

            let (team_size, team_count) = match candidates.first() {
                Some(c) => (c.settings.team_size(), c.settings.team_count()),
                None => continue,
            };

            // Fixed point: every accepted game strictly shrinks the
            // candidate list, so this terminates.
            loop {
                match Self::try_build_game(&candidates, team_size, team_count) {
                    Some((teams, used)) => {
                        let game = NewGame::new(teams);
                        debug!(
                            "Assembled game {} from group {:?} ({} parties)",
                            game.id,
                            key,
                            used.len()
                        );
                        let mut used_indices: Vec<usize> = used.into_iter().collect();
                        used_indices.sort_unstable_by(|a, b| b.cmp(a));
                        for index in used_indices {
                            matched.insert(candidates.remove(index).party.id.clone());
                        }
                        result.games.push(GameCandidate::New(game));
                    }
                    None => break,
                }
            }
        }

        waiting.retain(|p| !matched.contains(&p.id));
        result
    }

    async fn resolve_settings(&self, party: &Party) -> Result<Arc<S>, GameFinderError> {
        if let Some(cached) = party.cache.get::<S>(SETTINGS_CACHE_KEY) {
            return Ok(cached);
        }
        let settings = self.provider.settings(party).await?;
        Ok(party.cache.insert(SETTINGS_CACHE_KEY, settings))
    }

    /// Attempts to assemble one complete game from unassigned candidates.
    ///
    /// Returns the teams and the candidate indices they consumed, or `None`
    /// when no pivot yields `team_count` exactly-filled teams.
    fn try_build_game(
        candidates: &[Candidate<S>],
        team_size: u32,
        team_count: u32,
    ) -> Option<(Vec<Team>, HashSet<usize>)> {
        let mut assigned: HashSet<usize> = HashSet::new();
        let mut teams = Vec::with_capacity(team_count as usize);

        for _slot in 0..team_count {
            let (team, members) = Self::try_fill_team(candidates, &assigned, team_size)?;
            assigned.extend(members);
            teams.push(team);
        }

        Some((teams, assigned))
    }

    /// Fills one team to exactly `team_size` players, trying each unassigned
    /// party as pivot in order.
    fn try_fill_team(
        candidates: &[Candidate<S>],
        assigned: &HashSet<usize>,
        team_size: u32,
    ) -> Option<(Team, Vec<usize>)> {
        for pivot in 0..candidates.len() {
            if assigned.contains(&pivot) {
                continue;
            }
            if candidates[pivot].party.player_count() > team_size {
                continue;
            }

            let mut members = vec![pivot];
            let mut player_count = candidates[pivot].party.player_count();

            for next in pivot + 1..candidates.len() {
                if player_count == team_size {
                    break;
                }
                if assigned.contains(&next) {
                    continue;
                }
                let candidate = &candidates[next];
                if player_count + candidate.party.player_count() > team_size {
                    continue;
                }
                // The predicate is not transitive: every pair sharing the
                // team must agree, not just the pivot.
                let compatible = members.iter().all(|&m| {
                    candidates[m].settings.can_match(&candidate.settings)
                        && candidate.settings.can_match(&candidates[m].settings)
                });
                if compatible {
                    player_count += candidate.party.player_count();
                    members.push(next);
                }
            }

            if player_count != team_size {
                continue;
            }
            match Self::assemble_team(candidates, &members, team_size) {
                Ok(team) => return Some((team, members)),
                Err(e) => {
                    error!("Rejecting assembled team: {}", e);
                    continue;
                }
            }
        }
        None
    }

    fn assemble_team(
        candidates: &[Candidate<S>],
        members: &[usize],
        team_size: u32,
    ) -> Result<Team, GameFinderError> {
        let mut team = Team::new(team_size);
        for &member in members {
            team.add_party(candidates[member].party.clone())?;
        }
        Ok(team)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::QuickQueueSettings;
    use async_trait::async_trait;
    use scene_api::types::Player;

    /// Provider that derives settings from the party custom data written by
    /// the test, with a configurable failure set.
    struct TestProvider {
        team_size: u32,
        team_count: u32,
        fail_for: HashSet<String>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl TestProvider {
        fn new(team_size: u32, team_count: u32) -> Self {
            Self {
                team_size,
                team_count,
                fail_for: HashSet::new(),
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SettingsProvider<QuickQueueSettings> for TestProvider {
        async fn settings(&self, party: &Party) -> Result<QuickQueueSettings, GameFinderError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if self.fail_for.contains(party.id.as_str()) {
                return Err(GameFinderError::Settings {
                    party_id: party.id.clone(),
                    reason: "unavailable".to_string(),
                });
            }
            let platform = party.custom_data.get("platform").and_then(|v| v.as_str());
            let cross_play = party
                .custom_data
                .get("cross_play")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);
            Ok(QuickQueueSettings {
                team_size: self.team_size,
                team_count: self.team_count,
                platform: platform.map(str::to_string),
                cross_play,
            })
        }
    }

    fn party_of(id: &str, players: usize) -> Party {
        let players = (0..players)
            .map(|i| Player::new(format!("{id}-u{i}"), format!("{id}-s{i}")))
            .collect();
        Party::new(id, format!("{id}-u0")).with_players(players)
    }

    fn finder(provider: TestProvider) -> QuickQueueGameFinder<QuickQueueSettings> {
        QuickQueueGameFinder::new(Arc::new(provider))
    }

    #[tokio::test]
    async fn empty_waiting_set_is_a_noop() {
        let finder = finder(TestProvider::new(2, 2));
        let mut waiting = Vec::new();
        let result = finder.find_games(&mut waiting).await;
        assert!(result.is_empty());
        assert!(waiting.is_empty());
    }

    #[tokio::test]
    async fn insufficient_players_leave_waiting_set_unchanged() {
        let finder = finder(TestProvider::new(2, 2));
        let mut waiting = vec![party_of("a", 1), party_of("b", 2)];
        let result = finder.find_games(&mut waiting).await;
        assert!(result.is_empty());
        assert_eq!(waiting.len(), 2);
    }

    #[tokio::test]
    async fn matches_one_one_two_into_two_teams_of_two() {
        let finder = finder(TestProvider::new(2, 2));
        let mut waiting = vec![party_of("a", 1), party_of("b", 1), party_of("c", 2)];
        let result = finder.find_games(&mut waiting).await;

        assert_eq!(result.games.len(), 1);
        assert!(waiting.is_empty());

        let game = &result.games[0];
        let teams = game.teams();
        assert_eq!(teams.len(), 2);
        for team in teams {
            assert_eq!(team.player_count(), 2);
            assert!(team.is_complete());
        }
        // The size-2 party fills one team alone; the two singles share the
        // other.
        let sizes: Vec<usize> = teams.iter().map(|t| t.parties().len()).collect();
        let mut sorted = sizes.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 2]);
        // Every party appears exactly once across the game.
        let mut ids: Vec<&str> = game.parties().map(|p| p.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn repeats_passes_until_fixed_point() {
        // Eight singles, teams of two: a single pass over the sorted list
        // must still emit both games.
        let finder = finder(TestProvider::new(2, 2));
        let mut waiting: Vec<Party> = (0..8).map(|i| party_of(&format!("p{i}"), 1)).collect();
        let result = finder.find_games(&mut waiting).await;
        assert_eq!(result.games.len(), 2);
        assert!(waiting.is_empty());
    }

    #[tokio::test]
    async fn incompatible_parties_never_share_a_team() {
        let finder = finder(TestProvider::new(2, 1));
        let mut locked_pc = party_of("pc", 1);
        locked_pc.custom_data = serde_json::json!({"platform": "pc", "cross_play": false});
        let mut locked_xbox = party_of("xbox", 1);
        locked_xbox.custom_data = serde_json::json!({"platform": "xbox", "cross_play": false});

        let mut waiting = vec![locked_pc, locked_xbox];
        let result = finder.find_games(&mut waiting).await;
        assert!(result.is_empty());
        assert_eq!(waiting.len(), 2);
    }

    #[tokio::test]
    async fn bridge_party_does_not_make_locked_parties_compatible() {
        // Teams of three: the cross-play party matches both locked parties,
        // but the locked parties reject each other, so no team forms.
        let finder = finder(TestProvider::new(3, 1));
        let mut locked_pc = party_of("pc", 1);
        locked_pc.custom_data = serde_json::json!({"platform": "pc", "cross_play": false});
        let mut locked_xbox = party_of("xbox", 1);
        locked_xbox.custom_data = serde_json::json!({"platform": "xbox", "cross_play": false});
        let mut bridge = party_of("bridge", 1);
        bridge.custom_data = serde_json::json!({"platform": "pc", "cross_play": true});

        let mut waiting = vec![locked_pc, locked_xbox, bridge];
        let result = finder.find_games(&mut waiting).await;
        assert!(result.is_empty());
        assert_eq!(waiting.len(), 3);
    }

    #[tokio::test]
    async fn settings_are_memoized_across_passes() {
        let provider = Arc::new(TestProvider::new(2, 2));
        let finder = QuickQueueGameFinder::new(
            provider.clone() as Arc<dyn SettingsProvider<QuickQueueSettings>>
        );
        let mut waiting = vec![party_of("a", 1)];

        finder.find_games(&mut waiting).await;
        finder.find_games(&mut waiting).await;

        // One resolution despite two passes; the second pass hits the party
        // cache.
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(waiting[0]
            .cache
            .get::<QuickQueueSettings>(SETTINGS_CACHE_KEY)
            .is_some());
    }

    #[tokio::test]
    async fn settings_failure_leaves_party_waiting() {
        let mut provider = TestProvider::new(2, 1);
        provider.fail_for.insert("broken".to_string());
        let finder = QuickQueueGameFinder::new(Arc::new(provider));

        let mut waiting = vec![party_of("broken", 2), party_of("a", 1), party_of("b", 1)];
        let result = finder.find_games(&mut waiting).await;

        // The healthy singles still match; the broken party stays queued for
        // the next pass.
        assert_eq!(result.games.len(), 1);
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].id.as_str(), "broken");
    }
}
