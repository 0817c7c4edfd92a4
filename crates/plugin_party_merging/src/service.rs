//! # Party-Merging Engine
//!
//! Continuously grows small parties toward a target size without blocking
//! the callers waiting to be merged. Each registered party gets one state
//! entry carrying its cancellation, completion channel and cache mirror;
//! a periodic tick fetches live models, runs the pluggable algorithm and
//! executes the resulting merge commands.
//!
//! Failure isolation is per party and per command: a model fetch error or a
//! failed merge cancels only the affected party, never the tick.

use crate::algorithm::{MergeCommand, MergingContext, PartyMergingAlgorithm};
use crate::analytics::{mean, AnalyticsAccumulator};
use crate::cancellation::LinkedCancellation;
use crate::config::PartyMergingConfig;
use crate::error::{MergingError, MergingResult};
use dashmap::DashMap;
use scene_api::cache::CacheStorage;
use scene_api::context::{AnalyticsSink, PartyModelProvider, Reservation, SceneKeepAlive, SessionProvider};
use scene_api::types::{PartyId, Player};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a party left the merger.
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    /// Merged into another party; the token connects to it.
    Connected(String),
    /// Reached a terminal size with no session handoff needed.
    Completed,
}

/// Cached status answer for polling callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergerStatusResponse {
    /// How long the caller may cache this response, in seconds.
    pub max_age: u32,
    pub data: serde_json::Value,
}

/// Snapshot pushed to the analytics sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergingAnalytics {
    pub party_count: usize,
    pub player_count: usize,
    pub average_seconds_in_merger: f64,
    pub custom: serde_json::Value,
}

// ============================================================================
// Per-Party State
// ============================================================================

/// Bookkeeping for one party inside the merger.
///
/// At most one state exists per party id; registering again links another
/// cancellation source into the existing state instead of replacing it.
pub struct MergingPartyState {
    party_id: PartyId,
    entered_at: Instant,
    cancellation: LinkedCancellation,
    outcome_tx: watch::Sender<Option<MergeOutcome>>,
    cache: CacheStorage,
}

impl MergingPartyState {
    fn new(party_id: PartyId) -> Arc<Self> {
        let (outcome_tx, _) = watch::channel(None);
        Arc::new(Self {
            party_id,
            entered_at: Instant::now(),
            cancellation: LinkedCancellation::new(),
            outcome_tx,
            cache: CacheStorage::new(),
        })
    }

    pub fn party_id(&self) -> &PartyId {
        &self.party_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome_tx.borrow().is_some()
    }

    /// First resolution wins; later outcomes are dropped.
    fn resolve(&self, outcome: MergeOutcome) {
        self.outcome_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(outcome);
                true
            } else {
                false
            }
        });
    }

    /// Waits until the party is resolved or cancelled. A resolution that
    /// arrived before the cancellation is still honored.
    async fn wait(&self) -> MergingResult<Option<String>> {
        let mut rx = self.outcome_tx.subscribe();
        let token = self.cancellation.token();
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return Ok(match outcome {
                    MergeOutcome::Connected(token) => Some(token),
                    MergeOutcome::Completed => None,
                });
            }
            tokio::select! {
                _ = token.cancelled() => return Err(MergingError::Cancelled),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(MergingError::Cancelled);
                    }
                }
            }
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct PartyMergingService {
    states: DashMap<PartyId, Arc<MergingPartyState>>,
    algorithm: Arc<dyn PartyMergingAlgorithm>,
    parties: Arc<dyn PartyModelProvider>,
    sessions: Arc<dyn SessionProvider>,
    analytics_sink: Arc<dyn AnalyticsSink>,
    keep_alive: Arc<dyn SceneKeepAlive>,
    config: PartyMergingConfig,
    /// Rolling time-in-merger average; the mutex is the serialization the
    /// accumulator requires.
    residency: Mutex<AnalyticsAccumulator<f64, f64>>,
    last_party_count: AtomicUsize,
    last_player_count: AtomicUsize,
}

impl PartyMergingService {
    pub fn new(
        config: PartyMergingConfig,
        algorithm: Arc<dyn PartyMergingAlgorithm>,
        parties: Arc<dyn PartyModelProvider>,
        sessions: Arc<dyn SessionProvider>,
        analytics_sink: Arc<dyn AnalyticsSink>,
        keep_alive: Arc<dyn SceneKeepAlive>,
    ) -> Self {
        let residency = Mutex::new(AnalyticsAccumulator::new(config.residency_window, mean));
        Self {
            states: DashMap::new(),
            algorithm,
            parties,
            sessions,
            analytics_sink,
            keep_alive,
            config,
            residency,
            last_party_count: AtomicUsize::new(0),
            last_player_count: AtomicUsize::new(0),
        }
    }

    /// Registers the party (or links another cancellation source onto its
    /// existing registration) and waits until merging completes.
    ///
    /// Returns a connection token when the party was merged into another
    /// party, `None` when merging completed without a session handoff, and
    /// [`MergingError::Cancelled`] when any linked source fired first. The
    /// state is dropped from the map and the residency recorded on every
    /// exit path.
    pub async fn start_merge_party(
        &self,
        party_id: &PartyId,
        ct: CancellationToken,
    ) -> MergingResult<Option<String>> {
        let state = {
            match self.states.entry(party_id.clone()) {
                dashmap::mapref::entry::Entry::Occupied(entry) => {
                    debug!("Party {} already merging; linking cancellation", party_id);
                    let state = entry.get().clone();
                    state.cancellation.link(ct);
                    state
                }
                dashmap::mapref::entry::Entry::Vacant(entry) => {
                    info!("Party {} entered the merger", party_id);
                    let state = MergingPartyState::new(party_id.clone());
                    state.cancellation.link(ct);
                    entry.insert(state.clone());
                    state
                }
            }
        };

        let result = state.wait().await;

        self.states
            .remove_if(party_id, |_, current| Arc::ptr_eq(current, &state));
        let elapsed = state.entered_at.elapsed().as_secs_f64();
        match self.residency.lock() {
            Ok(mut residency) => residency.add(elapsed),
            Err(poisoned) => poisoned.into_inner().add(elapsed),
        }
        if let Err(e) = &result {
            debug!("Party {} left the merger: {}", party_id, e);
        }
        result
    }

    /// Cancels any in-progress merge for the party. No-op when the party is
    /// not merging.
    pub fn stop_merge_party(&self, party_id: &PartyId) {
        if let Some(state) = self.states.get(party_id) {
            info!("Stopping merge for party {}", party_id);
            state.cancellation.cancel();
        }
    }

    pub fn merging_count(&self) -> usize {
        self.states.len()
    }

    /// One merge tick: snapshot live registrations, fetch their models, run
    /// the algorithm and execute its commands.
    pub async fn merge(&self, ct: &CancellationToken) -> MergingResult<()> {
        let snapshot: Vec<Arc<MergingPartyState>> = self
            .states
            .iter()
            .filter(|entry| !entry.value().is_cancelled() && !entry.value().is_resolved())
            .map(|entry| entry.value().clone())
            .collect();

        if snapshot.is_empty() {
            self.last_party_count.store(0, Ordering::Relaxed);
            self.last_player_count.store(0, Ordering::Relaxed);
            return Ok(());
        }

        // Fetch live models concurrently; a failed fetch cancels only the
        // affected party.
        let fetches = futures::future::join_all(snapshot.iter().map(|state| {
            let provider = self.parties.clone();
            async move { (state, provider.get_model(&state.party_id, ct).await) }
        }))
        .await;

        let mut live = Vec::new();
        for (state, fetched) in fetches {
            match fetched {
                Ok(mut party) => {
                    // Re-attach the cache so memoized values survive
                    // re-fetches.
                    party.cache = state.cache.clone();
                    live.push(party);
                }
                Err(e) => {
                    warn!("Failed to fetch model for party {}: {}", state.party_id, e);
                    state.cancellation.cancel();
                }
            }
        }

        self.last_party_count.store(live.len(), Ordering::Relaxed);
        self.last_player_count.store(
            live.iter().map(|p| p.players.len()).sum(),
            Ordering::Relaxed,
        );

        let mut context = MergingContext::new(live);
        self.algorithm.merge(&mut context).await?;

        for command in context.take_commands() {
            self.execute_command(&mut context, command, ct).await;
        }

        // Parties that reached a terminal size leave without a session
        // handoff.
        let complete: Vec<PartyId> = context
            .parties()
            .filter(|party| self.algorithm.can_complete_merge(party))
            .map(|party| party.id.clone())
            .collect();
        for party_id in complete {
            if let Some((_, state)) = self.states.remove(&party_id) {
                debug!("Party {} completed merging", party_id);
                state.resolve(MergeOutcome::Completed);
            }
        }
        Ok(())
    }

    /// Executes one merge command: reserve slots and mint a token against
    /// the target, then move the players in-memory and resolve the source
    /// party's waiters.
    async fn execute_command(
        &self,
        context: &mut MergingContext,
        command: MergeCommand,
        ct: &CancellationToken,
    ) {
        // The state can disappear between snapshot and execution; treat that
        // as already resolved elsewhere.
        let from_state = match self.states.get(&command.from) {
            Some(state) if !state.is_cancelled() && !state.is_resolved() => state.clone(),
            _ => {
                debug!("Skipping merge of {}: state gone", command.from);
                return;
            }
        };
        let players: Vec<Player> = match context.party(&command.from) {
            Some(party) => party.players.clone(),
            None => return,
        };

        let reservation = Reservation {
            party_id: command.from.clone(),
            players: players.iter().map(|p| p.user_id.clone()).collect(),
            custom_data: command.custom_data.clone(),
        };
        let token = async {
            self.sessions
                .create_reservation(&command.into, &reservation, ct)
                .await?;
            self.sessions
                .create_connection_token_from_party_id(&command.into, &command.custom_data, ct)
                .await
        }
        .await;

        match token {
            Ok(token) => {
                context.append_players(&command.into, players);
                info!("Merged party {} into {}", command.from, command.into);
                from_state.resolve(MergeOutcome::Connected(token));
            }
            Err(e) => {
                warn!(
                    "Merge command {} -> {} failed: {}",
                    command.from, command.into, e
                );
                from_state.cancellation.cancel();
            }
        }
    }

    /// Background loop: merge ticks under a bounded deadline, periodic
    /// analytics pushes, keep-alive while demand exists. The loop never
    /// exits because of a failed tick.
    pub async fn run(self: Arc<Self>, ct: CancellationToken) {
        info!(
            "Party merging started (target size {})",
            self.config.target_party_size
        );
        let mut tick = tokio::time::interval(self.config.tick_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let analytics_period = self.config.analytics_interval();
        let mut analytics =
            tokio::time::interval_at(Instant::now() + analytics_period, analytics_period);
        analytics.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ct.cancelled() => {
                    info!("Party merging loop shutting down");
                    break;
                }
                _ = tick.tick() => {
                    match tokio::time::timeout(self.config.tick_timeout(), self.merge(&ct)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!("Merge tick failed: {}", e),
                        Err(_) => error!(
                            "Merge tick exceeded its {:?} deadline",
                            self.config.tick_timeout()
                        ),
                    }
                }
                _ = analytics.tick() => {
                    self.push_analytics();
                }
            }
        }
    }

    pub fn get_analytics(&self) -> MergingAnalytics {
        let average_seconds_in_merger = match self.residency.lock() {
            Ok(residency) => residency.result(),
            Err(poisoned) => poisoned.into_inner().result(),
        };
        MergingAnalytics {
            party_count: self.last_party_count.load(Ordering::Relaxed),
            player_count: self.last_player_count.load(Ordering::Relaxed),
            average_seconds_in_merger,
            custom: self.algorithm.analytics(),
        }
    }

    /// Status answer for polling callers, with the configured cache window.
    pub fn status(&self) -> MergerStatusResponse {
        let data = match serde_json::to_value(self.get_analytics()) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to serialize merger status: {}", e);
                serde_json::Value::Null
            }
        };
        MergerStatusResponse {
            max_age: self.config.status_max_age_secs,
            data,
        }
    }

    fn push_analytics(&self) {
        let analytics = self.get_analytics();
        match serde_json::to_value(&analytics) {
            Ok(payload) => self.analytics_sink.push("partymerging", "status", payload),
            Err(e) => error!("Failed to serialize merging analytics: {}", e),
        }
        if analytics.player_count > 0 {
            debug!(
                "Merging demand present ({} players); extending scene lifetime",
                analytics.player_count
            );
            self.keep_alive.keep_alive(self.config.keep_alive());
        }
    }
}
