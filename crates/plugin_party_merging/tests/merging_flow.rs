//! End-to-end merging flow: party-scene requests driving the merger engine
//! through an in-process server-to-server client.

use async_trait::async_trait;
use dashmap::DashMap;
use plugin_party_merging::algorithm::SimplePartyMergingAlgorithm;
use plugin_party_merging::config::PartyMergingConfig;
use plugin_party_merging::party_state::{MergingRequestState, PartyMergerClient};
use plugin_party_merging::service::{MergerStatusResponse, PartyMergingService};
use plugin_party_merging::{MergeCompletion, MergingStatus};
use scene_api::context::{
    AnalyticsSink, PartyModelProvider, PeerFilter, Reservation, SceneKeepAlive, SceneMessaging,
    SendPriority, SendReliability, SessionProvider,
};
use scene_api::error::SceneApiError;
use scene_api::types::{GameId, Party, PartyId, Player, SessionId, UserId};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct FakeParties {
    models: DashMap<PartyId, Party>,
}

impl FakeParties {
    fn put(&self, id: &str, players: usize) {
        let players = (0..players)
            .map(|i| Player::new(format!("{id}-u{i}"), format!("{id}-s{i}")))
            .collect();
        let party = Party::new(id, format!("{id}-u0")).with_players(players);
        self.models.insert(party.id.clone(), party);
    }
}

#[async_trait]
impl PartyModelProvider for FakeParties {
    async fn get_model(
        &self,
        party_id: &PartyId,
        _ct: &CancellationToken,
    ) -> Result<Party, SceneApiError> {
        self.models
            .get(party_id)
            .map(|p| p.clone())
            .ok_or_else(|| SceneApiError::PartyNotFound(party_id.clone()))
    }
}

struct FakeSessions;

#[async_trait]
impl SessionProvider for FakeSessions {
    async fn create_connection_token_from_party_id(
        &self,
        party_id: &PartyId,
        _extra_data: &serde_json::Value,
        _ct: &CancellationToken,
    ) -> Result<String, SceneApiError> {
        Ok(format!("join-{party_id}"))
    }

    async fn create_reservation(
        &self,
        _party_id: &PartyId,
        _reservation: &Reservation,
        _ct: &CancellationToken,
    ) -> Result<(), SceneApiError> {
        Ok(())
    }

    async fn create_game_session(
        &self,
        _game_id: &GameId,
        _config: &serde_json::Value,
        _ct: &CancellationToken,
    ) -> Result<SessionId, SceneApiError> {
        Ok(SessionId::new("unused"))
    }

    async fn create_connection_token(
        &self,
        _session_id: &SessionId,
        _user_id: &UserId,
        _ct: &CancellationToken,
    ) -> Result<String, SceneApiError> {
        Ok("unused".to_string())
    }
}

struct NullAnalytics;

impl AnalyticsSink for NullAnalytics {
    fn push(&self, _category: &str, _subcategory: &str, _payload: serde_json::Value) {}
}

struct NullKeepAlive;

impl SceneKeepAlive for NullKeepAlive {
    fn keep_alive(&self, _duration: Duration) {}
}

#[derive(Default)]
struct RecordingMessaging {
    sent: Mutex<Vec<String>>,
}

impl SceneMessaging for RecordingMessaging {
    fn send(
        &self,
        _filter: PeerFilter,
        route: &str,
        _payload: serde_json::Value,
        _priority: SendPriority,
        _reliability: SendReliability,
    ) -> Result<(), SceneApiError> {
        self.sent.lock().unwrap().push(route.to_string());
        Ok(())
    }
}

/// In-process stand-in for the service-locator S2S client: calls land
/// directly on the merger service.
struct LoopbackClient {
    service: Arc<PartyMergingService>,
}

#[async_trait]
impl PartyMergerClient for LoopbackClient {
    async fn start_merge(
        &self,
        _merger_id: &str,
        party_id: &PartyId,
        ct: &CancellationToken,
    ) -> Result<Option<String>, SceneApiError> {
        self.service
            .start_merge_party(party_id, ct.clone())
            .await
            .map_err(|e| {
                if e.is_cancellation() {
                    SceneApiError::Cancelled
                } else {
                    SceneApiError::Remote(e.to_string())
                }
            })
    }

    async fn stop_merge(
        &self,
        _merger_id: &str,
        party_id: &PartyId,
    ) -> Result<(), SceneApiError> {
        self.service.stop_merge_party(party_id);
        Ok(())
    }

    async fn get_status(&self, _merger_id: &str) -> Result<MergerStatusResponse, SceneApiError> {
        Ok(self.service.status())
    }
}

struct World {
    service: Arc<PartyMergingService>,
    parties: Arc<FakeParties>,
    messaging: Arc<RecordingMessaging>,
}

impl World {
    fn new(target_party_size: u32) -> Self {
        let parties = Arc::new(FakeParties::default());
        let config = PartyMergingConfig {
            target_party_size,
            ..Default::default()
        };
        let service = Arc::new(PartyMergingService::new(
            config,
            Arc::new(SimplePartyMergingAlgorithm::new(target_party_size)),
            parties.clone(),
            Arc::new(FakeSessions),
            Arc::new(NullAnalytics),
            Arc::new(NullKeepAlive),
        ));
        Self {
            service,
            parties,
            messaging: Arc::new(RecordingMessaging::default()),
        }
    }

    fn request(&self, party_id: &str) -> Arc<MergingRequestState> {
        Arc::new(MergingRequestState::new(
            PartyId::new(party_id),
            UserId::new(format!("{party_id}-u0")),
            Arc::new(LoopbackClient {
                service: self.service.clone(),
            }),
            self.messaging.clone(),
        ))
    }
}

fn spawn_start(
    state: &Arc<MergingRequestState>,
) -> tokio::task::JoinHandle<Result<MergeCompletion, plugin_party_merging::MergingError>> {
    let state = state.clone();
    tokio::spawn(async move { state.start("merger-1").await })
}

#[tokio::test]
async fn sizes_3_1_2_2_merge_toward_target_4() {
    let world = World::new(4);
    for (id, n) in [("trio", 3), ("solo", 1), ("pair1", 2), ("pair2", 2)] {
        world.parties.put(id, n);
    }

    let trio = world.request("trio");
    let solo = world.request("solo");
    let pair1 = world.request("pair1");
    let pair2 = world.request("pair2");
    let handles = [
        spawn_start(&trio),
        spawn_start(&solo),
        spawn_start(&pair1),
        spawn_start(&pair2),
    ];
    tokio::time::sleep(Duration::from_millis(50)).await;

    world
        .service
        .merge(&CancellationToken::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut completions = Vec::new();
    for handle in handles {
        completions.push(handle.await.unwrap().unwrap());
    }

    // The solo joined the trio (exact fit), one pair joined the other; both
    // targets completed in-memory at exactly four players.
    assert_eq!(
        completions[0], // trio
        MergeCompletion::Completed
    );
    assert_eq!(
        completions[1], // solo
        MergeCompletion::Connected("join-trio".to_string())
    );
    match (&completions[2], &completions[3]) {
        (MergeCompletion::Completed, MergeCompletion::Connected(token)) => {
            assert_eq!(token, "join-pair1");
        }
        (MergeCompletion::Connected(token), MergeCompletion::Completed) => {
            assert_eq!(token, "join-pair2");
        }
        other => panic!("pairs did not merge together: {other:?}"),
    }
    assert_eq!(world.service.merging_count(), 0);

    // Every party that received a token broadcast it to its players.
    let sent = world.messaging.sent.lock().unwrap();
    assert_eq!(
        sent.iter()
            .filter(|r| r.as_str() == plugin_party_merging::party_state::CONNECTION_TOKEN_ROUTE)
            .count(),
        2
    );

    for state in [trio, solo, pair1, pair2] {
        assert_eq!(state.status(), MergingStatus::Completed);
    }
}

#[tokio::test]
async fn undersized_parties_wait_across_ticks() {
    let world = World::new(4);
    world.parties.put("trio1", 3);
    world.parties.put("trio2", 3);

    let trio1 = world.request("trio1");
    let trio2 = world.request("trio2");
    let h1 = spawn_start(&trio1);
    let h2 = spawn_start(&trio2);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Two trios cannot merge under a target of four. Several ticks change
    // nothing.
    for _ in 0..3 {
        world
            .service
            .merge(&CancellationToken::new())
            .await
            .unwrap();
    }
    assert_eq!(world.service.merging_count(), 2);

    trio1.stop().await;
    trio2.stop().await;
    assert!(h1.await.unwrap().is_err());
    assert!(h2.await.unwrap().is_err());
    assert_eq!(world.service.merging_count(), 0);
}

#[tokio::test]
async fn stopped_party_reports_cancelled_status() {
    let world = World::new(4);
    world.parties.put("lonely", 2);

    let lonely = world.request("lonely");
    let handle = spawn_start(&lonely);
    tokio::time::sleep(Duration::from_millis(50)).await;

    lonely.stop().await;
    assert!(handle.await.unwrap().is_err());
    assert_eq!(lonely.status(), MergingStatus::Cancelled);
}

#[tokio::test]
async fn paused_party_resumes_into_a_merge() {
    let world = World::new(4);
    world.parties.put("trio", 3);
    world.parties.put("solo", 1);

    let trio = world.request("trio");
    let solo = world.request("solo");
    let trio_handle = spawn_start(&trio);
    let solo_handle = spawn_start(&solo);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The solo yields to a game-finder run before any tick happens.
    solo.pause_merging();
    assert_eq!(solo_handle.await.unwrap().unwrap(), MergeCompletion::Paused);

    // A tick while paused merges nothing: the solo's registration was
    // cancelled with it.
    world
        .service
        .merge(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(world.service.merging_count(), 1);

    // The game-finder run ends; the merge resumes and completes.
    let resumed = {
        let solo = solo.clone();
        tokio::spawn(async move { solo.try_restart_merging().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    world
        .service
        .merge(&CancellationToken::new())
        .await
        .unwrap();

    let completion = resumed.await.unwrap().unwrap();
    assert_eq!(
        completion,
        Some(MergeCompletion::Connected("join-trio".to_string()))
    );
    let _ = trio_handle.await.unwrap();
    drop(trio);
}
