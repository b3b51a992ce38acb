// =============================================================================
// Manager Engine — spec §4.8
// =============================================================================
//
// Evaluates PENDING checklist items, drives the capped refinement cycle, and
// determines when a discussion is ready to close. The manager here is a
// deterministic rule evaluator rather than an LLM call — the spec leaves the
// manager's judgment unspecified beyond its *outcomes*, so this module
// implements the outcome contract (approve / reject / revise, capped at
// `MAX_REFINEMENT_ROUNDS`) with explicit, auditable rules instead of a
// second LLM round-trip.
// =============================================================================

use std::collections::HashSet;

use tracing::info;

use crate::config::{GATING_THRESHOLD, MAX_REFINEMENT_ROUNDS};
use crate::domain::{Agent, ChecklistItem, Discussion, ManagerDecision, Sector};
use crate::errors::{SimError, SimResult};
use crate::types::ChecklistStatus;

const HARD_CONSTRAINT_KEYWORDS: &[&str] = &[
    "forbidden",
    "not allowed",
    "rule violation",
    "policy violation",
    "prohibited",
];

const RISK_KEYWORDS: &[&str] = &["risk too high", "too risky", "excessive risk", "risky"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

/// The manager's verdict on a single pending item, before refinement-cycle
/// bookkeeping is applied.
#[derive(Debug, Clone)]
pub enum Verdict {
    Approve,
    Reject { reason: String },
    Revise { reason: String },
}

/// Eligibility check gating whether a new discussion may start at all
/// (spec §4.8: "no active discussion, balance > 0, every worker confidence
/// ≥ 65"). The "no active discussion" half of this check is the serial-lock
/// invariant, enforced by the discussion engine inside the same critical
/// section that persists the new discussion — this function checks the
/// remaining two conditions.
pub fn check_eligibility(sector: &Sector, workers: &[Agent]) -> SimResult<()> {
    if sector.balance <= 0.0 {
        return Err(SimError::validation("balance", "sector balance must be > 0"));
    }

    if let Some(worker) = workers.iter().find(|w| w.confidence < GATING_THRESHOLD) {
        return Err(SimError::validation(
            "confidence",
            format!(
                "agent {} has confidence {:.3} below {}",
                worker.id, worker.confidence, GATING_THRESHOLD
            ),
        ));
    }

    Ok(())
}

/// Deterministic evaluation rule for a single PENDING item. Hard-constraint
/// phrasing in the rationale rejects outright; high allocation or low
/// confidence asks for revision; anything else is approved.
fn evaluate_item(item: &ChecklistItem) -> Verdict {
    if contains_any(&item.rationale, HARD_CONSTRAINT_KEYWORDS) {
        return Verdict::Reject {
            reason: format!("forbidden: rationale violates policy ({})", item.rationale),
        };
    }

    if item.allocation_percent > 80.0 {
        return Verdict::Revise {
            reason: "risk too high: allocation exceeds safe bounds".to_string(),
        };
    }

    if item.confidence < 50.0 {
        return Verdict::Revise {
            reason: "confidence too low to approve without further justification".to_string(),
        };
    }

    Verdict::Approve
}

/// Apply `evaluate_item`'s verdict to `item` in place, managing the
/// refinement-cycle cap and producing the audit-trail `ManagerDecision`.
pub fn evaluate_and_apply(discussion: &mut Discussion, item_index: usize) -> Option<ManagerDecision> {
    let item_id = discussion.checklist.get(item_index)?.id.clone();
    let verdict = evaluate_item(discussion.checklist.get(item_index)?);

    let (decision_status, reason) = match verdict {
        Verdict::Approve => {
            discussion.checklist[item_index].status = ChecklistStatus::Approved;
            discussion.active_refinement_cycles.remove(&item_id);
            (ChecklistStatus::Approved, "approved".to_string())
        }
        Verdict::Reject { reason } => {
            let is_hard_constraint = contains_any(&reason, HARD_CONSTRAINT_KEYWORDS);
            let status = if is_hard_constraint {
                ChecklistStatus::AcceptRejection
            } else {
                ChecklistStatus::Rejected
            };
            discussion.checklist[item_index].status = status;
            discussion
                .checklist[item_index]
                .refinement_log
                .push(reason.clone());
            discussion.active_refinement_cycles.remove(&item_id);
            (status, reason)
        }
        Verdict::Revise { reason } => {
            let cycle = discussion
                .active_refinement_cycles
                .entry(item_id.clone())
                .or_insert_with(|| crate::domain::discussion::RefinementCycle::new(&item_id, &reason));
            cycle.record_round(reason.clone());

            if cycle.rounds >= MAX_REFINEMENT_ROUNDS {
                discussion.checklist[item_index].status = ChecklistStatus::AcceptRejection;
                discussion
                    .checklist[item_index]
                    .refinement_log
                    .push(format!("refinement cap reached ({MAX_REFINEMENT_ROUNDS} rounds): {reason}"));
                discussion.checklist[item_index].revision_count = MAX_REFINEMENT_ROUNDS;
                discussion.active_refinement_cycles.remove(&item_id);
                (ChecklistStatus::AcceptRejection, reason)
            } else {
                let item = &mut discussion.checklist[item_index];
                item.snapshot_before_revision();
                item.status = ChecklistStatus::ReviseRequired;
                item.revision_count += 1;
                item.refinement_log.push(reason.clone());

                if contains_any(&reason, RISK_KEYWORDS) {
                    item.allocation_percent *= 0.5;
                    item.amount = item.allocation_percent;
                    item.confidence = (item.confidence - 10.0).max(0.0);
                }

                (ChecklistStatus::ReviseRequired, reason)
            }
        }
    };

    let decision = ManagerDecision::new(item_id, decision_status, reason);
    discussion.manager_decisions.push(decision.clone());
    discussion.touch();

    info!(
        discussion_id = %discussion.id,
        item_id = %decision.checklist_item_id,
        status = %decision.decision,
        "manager decision recorded"
    );

    Some(decision)
}

/// Evaluate every PENDING item in the discussion, applying decisions in
/// place. Returns the number of items evaluated.
pub fn evaluate_pending_items(discussion: &mut Discussion) -> usize {
    let pending_indices: Vec<usize> = discussion
        .checklist
        .iter()
        .enumerate()
        .filter(|(_, item)| item.status == ChecklistStatus::Pending)
        .map(|(i, _)| i)
        .collect();

    for index in &pending_indices {
        evaluate_and_apply(discussion, *index);
    }

    pending_indices.len()
}

/// `true` iff every checklist item is terminal and every `APPROVED` item has
/// a corresponding trade in `executed_item_ids` (spec §4.8, §8 property 4).
pub fn can_discussion_close(discussion: &Discussion, executed_item_ids: &HashSet<String>) -> bool {
    if discussion.checklist.is_empty() {
        return false;
    }

    discussion.checklist.iter().all(|item| {
        item.status.is_terminal()
            && (item.status != ChecklistStatus::Approved || executed_item_ids.contains(&item.id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::discussion::RefinementCycle;

    fn pending_item(confidence: f64, allocation_percent: f64, rationale: &str) -> ChecklistItem {
        ChecklistItem {
            id: uuid::Uuid::new_v4().to_string(),
            source_agent_id: "agent-1".into(),
            action_type: crate::types::ActionType::Buy,
            symbol: "S1".into(),
            amount: 10.0,
            allocation_percent,
            confidence,
            rationale: rationale.to_string(),
            status: ChecklistStatus::Pending,
            signal_strength: confidence,
            round: Some(0),
            previous_versions: Vec::new(),
            revision_count: 0,
            refinement_log: Vec::new(),
        }
    }

    #[test]
    fn high_confidence_item_is_approved() {
        let mut d = Discussion::new("sector-1", "t", vec!["agent-1".into()], 2);
        d.checklist.push(pending_item(90.0, 10.0, "strong signal"));
        evaluate_and_apply(&mut d, 0);
        assert_eq!(d.checklist[0].status, ChecklistStatus::Approved);
    }

    #[test]
    fn hard_constraint_rationale_rejects_immediately() {
        let mut d = Discussion::new("sector-1", "t", vec!["agent-1".into()], 2);
        d.checklist.push(pending_item(90.0, 10.0, "this is forbidden by policy"));
        evaluate_and_apply(&mut d, 0);
        assert_eq!(d.checklist[0].status, ChecklistStatus::AcceptRejection);
    }

    #[test]
    fn low_confidence_requires_revision_then_caps_at_three_to_accept_rejection() {
        let mut d = Discussion::new("sector-1", "t", vec!["agent-1".into()], 2);
        d.checklist.push(pending_item(10.0, 10.0, "weak signal"));

        for round in 0..3 {
            d.checklist[0].status = ChecklistStatus::Pending;
            evaluate_and_apply(&mut d, 0);
            if round < 2 {
                assert_eq!(d.checklist[0].status, ChecklistStatus::ReviseRequired);
            }
        }

        assert_eq!(d.checklist[0].status, ChecklistStatus::AcceptRejection);
        assert_eq!(d.checklist[0].revision_count, MAX_REFINEMENT_ROUNDS);
    }

    #[test]
    fn risk_too_high_revision_halves_allocation_and_amount() {
        let mut d = Discussion::new("sector-1", "t", vec!["agent-1".into()], 2);
        d.checklist.push(pending_item(90.0, 95.0, "strong signal"));
        let allocation_before = d.checklist[0].allocation_percent;
        let confidence_before = d.checklist[0].confidence;
        evaluate_and_apply(&mut d, 0);
        assert_eq!(d.checklist[0].status, ChecklistStatus::ReviseRequired);
        assert_eq!(d.checklist[0].allocation_percent, allocation_before * 0.5);
        assert_eq!(d.checklist[0].amount, d.checklist[0].allocation_percent);
        assert_eq!(d.checklist[0].confidence, confidence_before - 10.0);
    }

    #[test]
    fn can_discussion_close_requires_executed_trades_for_approved_items() {
        let mut d = Discussion::new("sector-1", "t", vec!["agent-1".into()], 2);
        let mut item = pending_item(90.0, 10.0, "strong signal");
        item.status = ChecklistStatus::Approved;
        let item_id = item.id.clone();
        d.checklist.push(item);

        assert!(!can_discussion_close(&d, &HashSet::new()));

        let mut executed = HashSet::new();
        executed.insert(item_id);
        assert!(can_discussion_close(&d, &executed));
    }

    #[test]
    fn eligibility_rejects_low_confidence_worker() {
        let sector = Sector::new("Demo", "DEMO", vec!["S1".into()], 1000.0, 10.0);
        let low = Agent::new_worker(sector.id.clone(), "W1", "momentum", 0.5);
        let mut low = low;
        low.set_confidence(60.0);
        let result = check_eligibility(&sector, &[low]);
        assert!(result.is_err());
    }

    #[test]
    fn unused_refinement_cycle_constructor_is_exercised() {
        let cycle = RefinementCycle::new("item-1", "too risky");
        assert_eq!(cycle.rounds, 1);
    }
}
