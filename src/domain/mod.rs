// =============================================================================
// Persisted record types — spec §3 DATA MODEL
// =============================================================================

pub mod agent;
pub mod discussion;
pub mod proposal;
pub mod sector;

pub use agent::Agent;
pub use discussion::{
    Discussion, ManagerDecision, Message, RefinementCycle, RoundSnapshot,
};
pub use proposal::{Proposal, ProposalFields};
pub use sector::{Candle, PriceHistoryEntry, Sector};

use serde::{Deserialize, Serialize};

use crate::types::{ActionType, ChecklistStatus};

/// Executable payload derived from a `Proposal`, subject to manager
/// evaluation. The only constructor for a persisted item is
/// `checklist::create_checklist_from_proposal` — see that module.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    pub id: String,
    pub source_agent_id: String,
    pub action_type: ActionType,
    pub symbol: String,
    pub amount: f64,
    pub allocation_percent: f64,
    pub confidence: f64,
    pub rationale: String,
    pub status: ChecklistStatus,
    /// `proposal.signalStrength`, defaulted to `proposal.confidence` when
    /// absent, captured at creation time and never touched by refinement —
    /// the confidence engine's input (spec §4.2), independent of whatever
    /// `confidence`/`amount` the manager later revises.
    #[serde(default)]
    pub signal_strength: f64,
    #[serde(default)]
    pub round: Option<u32>,
    #[serde(default)]
    pub previous_versions: Vec<ChecklistItem>,
    #[serde(default)]
    pub revision_count: u32,
    #[serde(default)]
    pub refinement_log: Vec<String>,
}

impl ChecklistItem {
    /// Push the current state into `previous_versions` before mutating it in
    /// place — used by the manager engine's revision path so provenance is
    /// never lost (spec §4.6 "preserves provenance").
    pub fn snapshot_before_revision(&mut self) {
        let mut snapshot = self.clone();
        snapshot.previous_versions.clear();
        self.previous_versions.push(snapshot);
    }
}
