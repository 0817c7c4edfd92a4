//! # Party-Side Merge Requests
//!
//! Lives on the party scene. Tracks one party's merge lifecycle against a
//! remote merger: the public status players see, the composable
//! cancellation driving it, and the pause/restart dance used to yield to a
//! game-finder run without losing the merge intent.

use crate::cancellation::LinkedCancellation;
use crate::error::{MergingError, MergingResult};
use crate::service::MergerStatusResponse;
use async_trait::async_trait;
use scene_api::context::{PeerFilter, SceneMessaging, SendPriority, SendReliability};
use scene_api::error::SceneApiError;
use scene_api::types::{PartyId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Route on which the party broadcasts a received connection token.
pub const CONNECTION_TOKEN_ROUTE: &str = "partymerging.connectiontoken";

/// Server-to-server client for a remote merger scene, resolved through the
/// hosting framework's service locator.
#[async_trait]
pub trait PartyMergerClient: Send + Sync {
    /// Registers the party with the merger and waits for completion.
    /// Returns `Err(SceneApiError::Cancelled)` when the merge is cancelled.
    async fn start_merge(
        &self,
        merger_id: &str,
        party_id: &PartyId,
        ct: &CancellationToken,
    ) -> Result<Option<String>, SceneApiError>;

    async fn stop_merge(&self, merger_id: &str, party_id: &PartyId)
        -> Result<(), SceneApiError>;

    async fn get_status(&self, merger_id: &str) -> Result<MergerStatusResponse, SceneApiError>;
}

/// Public merge status surfaced to the party's players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergingStatus {
    Idle,
    InProgress { merger_id: String },
    Cancelled,
    Error { message: String },
    Completed,
}

impl MergingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MergingStatus::Cancelled | MergingStatus::Error { .. } | MergingStatus::Completed
        )
    }
}

/// How a `start` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeCompletion {
    /// Merged into another party; carries the connection token.
    Connected(String),
    /// Completed without a session handoff.
    Completed,
    /// Pre-empted by [`MergingRequestState::pause_merging`]; the intent is
    /// kept for a later restart.
    Paused,
}

struct ActiveMerge {
    merger_id: String,
    cancellation: Arc<LinkedCancellation>,
}

struct Inner {
    status: MergingStatus,
    active: Option<ActiveMerge>,
    paused_merger_id: Option<String>,
}

/// Per-party merge request state.
pub struct MergingRequestState {
    party_id: PartyId,
    leader_id: Mutex<UserId>,
    client: Arc<dyn PartyMergerClient>,
    messaging: Arc<dyn SceneMessaging>,
    inner: Mutex<Inner>,
}

impl MergingRequestState {
    pub fn new(
        party_id: PartyId,
        leader_id: UserId,
        client: Arc<dyn PartyMergerClient>,
        messaging: Arc<dyn SceneMessaging>,
    ) -> Self {
        Self {
            party_id,
            leader_id: Mutex::new(leader_id),
            client,
            messaging,
            inner: Mutex::new(Inner {
                status: MergingStatus::Idle,
                active: None,
                paused_merger_id: None,
            }),
        }
    }

    pub fn party_id(&self) -> &PartyId {
        &self.party_id
    }

    pub fn is_leader(&self, user_id: &UserId) -> bool {
        match self.leader_id.lock() {
            Ok(leader) => &*leader == user_id,
            Err(poisoned) => &*poisoned.into_inner() == user_id,
        }
    }

    /// Updates the leader after a party leadership change.
    pub fn set_leader(&self, user_id: UserId) {
        match self.leader_id.lock() {
            Ok(mut leader) => *leader = user_id,
            Err(poisoned) => *poisoned.into_inner() = user_id,
        }
    }

    pub fn status(&self) -> MergingStatus {
        match self.inner.lock() {
            Ok(inner) => inner.status.clone(),
            Err(poisoned) => poisoned.into_inner().status.clone(),
        }
    }

    /// Runs one merge through the given merger and waits for it to finish.
    ///
    /// Cancellation surfaces as [`MergingError::Cancelled`] and marks the
    /// public status `Cancelled` unless the merge already reached a terminal
    /// status through another path. Unexpected failures are recorded as an
    /// `Error` status and rethrown.
    pub async fn start(&self, merger_id: &str) -> MergingResult<MergeCompletion> {
        let token = {
            let mut inner = self.lock_inner();
            if inner.active.is_some() {
                return Err(MergingError::AlreadyMerging(self.party_id.clone()));
            }
            // A fresh start supersedes any paused intent.
            inner.paused_merger_id = None;
            let cancellation = Arc::new(LinkedCancellation::new());
            let token = cancellation.token();
            inner.active = Some(ActiveMerge {
                merger_id: merger_id.to_string(),
                cancellation,
            });
            inner.status = MergingStatus::InProgress {
                merger_id: merger_id.to_string(),
            };
            token
        };
        info!("Party {} merging through {}", self.party_id, merger_id);

        let result = self.client.start_merge(merger_id, &self.party_id, &token).await;

        let mut inner = self.lock_inner();
        inner.active = None;
        match result {
            Ok(connection_token) => {
                inner.status = MergingStatus::Completed;
                drop(inner);
                match connection_token {
                    Some(connection_token) => {
                        self.broadcast_token(&connection_token);
                        Ok(MergeCompletion::Connected(connection_token))
                    }
                    None => Ok(MergeCompletion::Completed),
                }
            }
            Err(SceneApiError::Cancelled) => {
                if inner.paused_merger_id.as_deref() == Some(merger_id) {
                    debug!(
                        "Party {} merge through {} paused",
                        self.party_id, merger_id
                    );
                    Ok(MergeCompletion::Paused)
                } else {
                    // A stale cancellation never clobbers a terminal status.
                    if !inner.status.is_terminal() {
                        inner.status = MergingStatus::Cancelled;
                    }
                    Err(MergingError::Cancelled)
                }
            }
            Err(e) => {
                warn!("Party {} merge failed: {}", self.party_id, e);
                inner.status = MergingStatus::Error {
                    message: e.to_string(),
                };
                Err(MergingError::SceneApi(e))
            }
        }
    }

    /// Cancels the in-flight merge and asks the merger to drop the
    /// registration. No-op when nothing is merging.
    pub async fn stop(&self) {
        let active = {
            let mut inner = self.lock_inner();
            inner.paused_merger_id = None;
            inner
                .active
                .as_ref()
                .map(|a| (a.merger_id.clone(), a.cancellation.clone()))
        };
        let Some((merger_id, cancellation)) = active else {
            return;
        };
        info!("Party {} stopping merge through {}", self.party_id, merger_id);
        cancellation.cancel();
        if let Err(e) = self.client.stop_merge(&merger_id, &self.party_id).await {
            warn!("Remote stop for party {} failed: {}", self.party_id, e);
        }
    }

    /// Cancels the current merge but keeps the merge intent so
    /// [`Self::try_restart_merging`] can relaunch it. Used to yield to an
    /// external game-finder run.
    pub fn pause_merging(&self) {
        let cancellation = {
            let mut inner = self.lock_inner();
            match inner.active.take() {
                Some(active) => {
                    inner.paused_merger_id = Some(active.merger_id.clone());
                    Some(active.cancellation)
                }
                None => None,
            }
        };
        if let Some(cancellation) = cancellation {
            debug!("Party {} pausing merge", self.party_id);
            cancellation.cancel();
        }
    }

    /// Relaunches a merge paused by [`Self::pause_merging`]. Returns
    /// `Ok(None)` when nothing was paused.
    pub async fn try_restart_merging(&self) -> MergingResult<Option<MergeCompletion>> {
        let merger_id = {
            let mut inner = self.lock_inner();
            inner.paused_merger_id.take()
        };
        match merger_id {
            Some(merger_id) => {
                info!("Party {} resuming merge through {}", self.party_id, merger_id);
                self.start(&merger_id).await.map(Some)
            }
            None => Ok(None),
        }
    }

    fn broadcast_token(&self, connection_token: &str) {
        let payload = serde_json::json!({ "connection_token": connection_token });
        if let Err(e) = self.messaging.send(
            PeerFilter::Broadcast,
            CONNECTION_TOKEN_ROUTE,
            payload,
            SendPriority::High,
            SendReliability::ReliableOrdered,
        ) {
            warn!(
                "Failed to broadcast connection token for party {}: {}",
                self.party_id, e
            );
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
