//! # Merging Algorithms
//!
//! An algorithm inspects the live, not-yet-merged parties of one tick and
//! emits merge commands directing one party's players into another. The
//! engine executes the commands; the algorithm never touches collaborators
//! itself.

use crate::error::MergingError;
use async_trait::async_trait;
use scene_api::types::{Party, PartyId, Player};
use std::collections::HashMap;
use tracing::debug;

/// Directive that `from`'s players join `into`.
#[derive(Debug, Clone)]
pub struct MergeCommand {
    pub from: PartyId,
    pub into: PartyId,
    pub custom_data: serde_json::Value,
}

/// Live parties of one tick plus the commands emitted against them.
pub struct MergingContext {
    parties: HashMap<PartyId, Party>,
    order: Vec<PartyId>,
    commands: Vec<MergeCommand>,
}

impl MergingContext {
    pub fn new(parties: Vec<Party>) -> Self {
        let order = parties.iter().map(|p| p.id.clone()).collect();
        let parties = parties.into_iter().map(|p| (p.id.clone(), p)).collect();
        Self {
            parties,
            order,
            commands: Vec::new(),
        }
    }

    /// Parties in registration order.
    pub fn parties(&self) -> impl Iterator<Item = &Party> {
        self.order.iter().filter_map(|id| self.parties.get(id))
    }

    pub fn party(&self, id: &PartyId) -> Option<&Party> {
        self.parties.get(id)
    }

    /// Emits a merge command after validating both endpoints exist.
    pub fn request_merge(
        &mut self,
        from: &PartyId,
        into: &PartyId,
        custom_data: serde_json::Value,
    ) -> Result<(), MergingError> {
        if !self.parties.contains_key(from) {
            return Err(MergingError::UnknownParty(from.clone()));
        }
        if !self.parties.contains_key(into) {
            return Err(MergingError::UnknownParty(into.clone()));
        }
        self.commands.push(MergeCommand {
            from: from.clone(),
            into: into.clone(),
            custom_data,
        });
        Ok(())
    }

    pub fn commands(&self) -> &[MergeCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<MergeCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Applies an executed merge in-memory so later decisions in the same
    /// tick see the grown party.
    pub fn append_players(&mut self, into: &PartyId, players: Vec<Player>) {
        if let Some(party) = self.parties.get_mut(into) {
            party.players.extend(players);
        }
    }
}

/// Pluggable merge policy.
#[async_trait]
pub trait PartyMergingAlgorithm: Send + Sync {
    /// Inspects the context's parties and emits merge commands.
    async fn merge(&self, ctx: &mut MergingContext) -> Result<(), MergingError>;

    /// Whether a party has reached a terminal size and can leave the merger
    /// without a session handoff.
    fn can_complete_merge(&self, party: &Party) -> bool;

    /// Algorithm-specific analytics payload.
    fn analytics(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

// ============================================================================
// Simple Size-Target Algorithm
// ============================================================================

/// Greedy pairing toward a fixed party size.
///
/// Parties are considered largest-first; each gets paired with the largest
/// other party that still fits under the target. A party never grows past
/// the target, and each party participates in at most one merge per tick.
pub struct SimplePartyMergingAlgorithm {
    target_party_size: u32,
}

impl SimplePartyMergingAlgorithm {
    pub fn new(target_party_size: u32) -> Self {
        Self { target_party_size }
    }
}

#[async_trait]
impl PartyMergingAlgorithm for SimplePartyMergingAlgorithm {
    async fn merge(&self, ctx: &mut MergingContext) -> Result<(), MergingError> {
        let mut candidates: Vec<(PartyId, u32)> = ctx
            .parties()
            .filter(|p| p.player_count() < self.target_party_size)
            .map(|p| (p.id.clone(), p.player_count()))
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1));

        let mut used = vec![false; candidates.len()];
        for i in 0..candidates.len() {
            if used[i] {
                continue;
            }
            for j in i + 1..candidates.len() {
                if used[j] {
                    continue;
                }
                if candidates[i].1 + candidates[j].1 > self.target_party_size {
                    continue;
                }
                debug!(
                    "Merging {} ({} players) into {} ({} players)",
                    candidates[j].0, candidates[j].1, candidates[i].0, candidates[i].1
                );
                let from = candidates[j].0.clone();
                let into = candidates[i].0.clone();
                ctx.request_merge(&from, &into, serde_json::Value::Null)?;
                used[i] = true;
                used[j] = true;
                break;
            }
        }
        Ok(())
    }

    fn can_complete_merge(&self, party: &Party) -> bool {
        party.player_count() >= self.target_party_size
    }

    fn analytics(&self) -> serde_json::Value {
        serde_json::json!({ "targetPartySize": self.target_party_size })
    }
}
