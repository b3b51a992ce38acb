// =============================================================================
// Discussion — spec §3 DATA MODEL, §4.9 DISCUSSION ENGINE
// =============================================================================
//
// A discussion owns the full transcript (messages), the working checklist,
// and the manager's audit trail (decisions). `round` is the target round
// count fixed at creation; `current_round` advances as the engine drives the
// loop — see spec §9 Open Questions, resolved in DESIGN.md: `round` fields on
// persisted items always mean "the round this item was authored in", never
// "the discussion's target round count".
// =============================================================================

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ChecklistItem;
use crate::types::{ChecklistStatus, DiscussionStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub agent_id: String,
    pub round: u32,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub proposal: Option<crate::domain::Proposal>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        agent_id: impl Into<String>,
        round: u32,
        role: impl Into<String>,
        content: impl Into<String>,
        proposal: Option<crate::domain::Proposal>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            round,
            role: role.into(),
            content: content.into(),
            proposal,
            created_at: Utc::now(),
        }
    }
}

/// Tracks a single checklist item through repeated `REVISE_REQUIRED` cycles
/// (spec §4.8: capped at `MAX_REFINEMENT_ROUNDS` before forced collapse).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinementCycle {
    pub item_id: String,
    pub reason: String,
    pub rounds: u32,
    #[serde(default)]
    pub history: Vec<String>,
}

impl RefinementCycle {
    pub fn new(item_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            reason: reason.into(),
            rounds: 1,
            history: Vec::new(),
        }
    }

    pub fn record_round(&mut self, note: impl Into<String>) {
        self.rounds += 1;
        self.history.push(note.into());
    }
}

/// One entry in the manager's audit trail (spec §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerDecision {
    pub id: String,
    pub checklist_item_id: String,
    pub decision: ChecklistStatus,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl ManagerDecision {
    pub fn new(
        checklist_item_id: impl Into<String>,
        decision: ChecklistStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            checklist_item_id: checklist_item_id.into(),
            decision,
            reason: reason.into(),
            at: Utc::now(),
        }
    }
}

/// A frozen view of the checklist at the end of a round, kept for replay and
/// debugging (spec §4.9 "round history").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSnapshot {
    pub round: u32,
    pub checklist: Vec<ChecklistItem>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discussion {
    pub id: String,
    pub sector_id: String,
    pub title: String,
    pub participant_ids: Vec<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub checklist: Vec<ChecklistItem>,
    pub round: u32,
    #[serde(default)]
    pub current_round: u32,
    #[serde(default)]
    pub round_history: Vec<RoundSnapshot>,
    #[serde(default)]
    pub manager_decisions: Vec<ManagerDecision>,
    #[serde(default)]
    pub active_refinement_cycles: HashMap<String, RefinementCycle>,
    pub status: DiscussionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// `(agent_id, round)` pairs for which checklist creation has already
    /// been attempted this discussion, successful or not — guards against an
    /// agent re-proposing into the same round after a rejection (spec §4.9
    /// "at most one checklist attempt per agent per round").
    #[serde(default)]
    attempted_checklist_rounds: HashSet<(String, u32)>,
}

impl Discussion {
    pub fn new(
        sector_id: impl Into<String>,
        title: impl Into<String>,
        participant_ids: Vec<String>,
        rounds: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sector_id: sector_id.into(),
            title: title.into(),
            participant_ids,
            messages: Vec::new(),
            checklist: Vec::new(),
            round: rounds,
            current_round: 0,
            round_history: Vec::new(),
            manager_decisions: Vec::new(),
            active_refinement_cycles: HashMap::new(),
            status: DiscussionStatus::Created,
            created_at: now,
            updated_at: now,
            attempted_checklist_rounds: HashSet::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn has_checklist_item_for_round(&self, agent_id: &str, round: u32) -> bool {
        self.checklist
            .iter()
            .any(|item| item.source_agent_id == agent_id && item.round == Some(round))
    }

    pub fn has_attempted_checklist_creation(&self, agent_id: &str, round: u32) -> bool {
        self.attempted_checklist_rounds
            .contains(&(agent_id.to_string(), round))
    }

    pub fn mark_checklist_attempted(&mut self, agent_id: impl Into<String>, round: u32) {
        self.attempted_checklist_rounds.insert((agent_id.into(), round));
    }

    pub fn record_message(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    pub fn snapshot_round(&mut self, round: u32) {
        self.round_history.push(RoundSnapshot {
            round,
            checklist: self.checklist.clone(),
            captured_at: Utc::now(),
        });
    }

    pub fn pending_items(&self) -> impl Iterator<Item = &ChecklistItem> {
        self.checklist
            .iter()
            .filter(|item| !item.status.is_terminal())
    }

    pub fn all_items_terminal(&self) -> bool {
        !self.checklist.is_empty() && self.pending_items().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_discussion_starts_created_with_no_attempts() {
        let d = Discussion::new("sector-1", "Q1 review", vec!["a1".into()], 2);
        assert_eq!(d.status, DiscussionStatus::Created);
        assert!(!d.has_attempted_checklist_creation("a1", 0));
    }

    #[test]
    fn attempted_checklist_rounds_are_tracked_per_agent_and_round() {
        let mut d = Discussion::new("sector-1", "Q1 review", vec!["a1".into()], 2);
        d.mark_checklist_attempted("a1", 0);
        assert!(d.has_attempted_checklist_creation("a1", 0));
        assert!(!d.has_attempted_checklist_creation("a1", 1));
        assert!(!d.has_attempted_checklist_creation("a2", 0));
    }

    #[test]
    fn all_items_terminal_is_false_when_empty() {
        let d = Discussion::new("sector-1", "Q1 review", vec!["a1".into()], 2);
        assert!(!d.all_items_terminal());
    }
}
