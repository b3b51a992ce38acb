// =============================================================================
// Discussion Status Service — spec §4.7
// =============================================================================
//
// The only module permitted to mutate `Discussion::status`. Every other
// component calls through here so the state machine's invariants — a
// terminal discussion never holds a PENDING or REVISE_REQUIRED item, and a
// sector never has two non-terminal discussions — are enforced in one place.
// =============================================================================

use tracing::{info, warn};

use crate::domain::Discussion;
use crate::errors::{SimError, SimResult};
use crate::types::{ChecklistStatus, DiscussionStatus};

/// `true` iff `from -> to` is one of the state machine's permitted edges
/// (spec §4.7 diagram).
fn is_permitted_transition(from: DiscussionStatus, to: DiscussionStatus) -> bool {
    use DiscussionStatus::*;
    matches!(
        (from, to),
        (Created, InProgress)
            | (InProgress, AwaitingExecution)
            | (AwaitingExecution, Decided)
            | (Created, Closed)
            | (InProgress, Closed)
            | (AwaitingExecution, Closed)
    )
}

/// Transition `discussion.status` to `target`, enforcing the state machine
/// and the `DECIDED` invariant. Idempotent when `target` already equals the
/// current status and that status is terminal (spec §8 round-trip property).
pub fn transition_status(
    discussion: &mut Discussion,
    target: DiscussionStatus,
    reason: &str,
) -> SimResult<()> {
    if discussion.status == target && target.is_terminal() {
        return Ok(());
    }

    if !is_permitted_transition(discussion.status, target) {
        return Err(SimError::state(format!(
            "illegal transition {} -> {} ({reason})",
            discussion.status, target
        )));
    }

    if target == DiscussionStatus::Decided {
        let has_non_terminal = discussion
            .checklist
            .iter()
            .any(|item| matches!(item.status, ChecklistStatus::Pending | ChecklistStatus::ReviseRequired));
        if has_non_terminal {
            return Err(SimError::state(
                "cannot transition to DECIDED with PENDING or REVISE_REQUIRED items",
            ));
        }
    }

    info!(
        discussion_id = %discussion.id,
        from = %discussion.status,
        to = %target,
        reason,
        "discussion status transition"
    );

    discussion.status = target;
    discussion.touch();
    Ok(())
}

/// Move `IN_PROGRESS -> AWAITING_EXECUTION` once the round loop has finished
/// producing a checklist and finalization has run (spec §4.9 "after the last
/// round call FinalizeChecklist").
pub fn check_and_transition_to_awaiting_execution(discussion: &mut Discussion) -> SimResult<()> {
    if discussion.status != DiscussionStatus::InProgress {
        return Ok(());
    }
    if discussion.checklist.is_empty() {
        return Ok(());
    }
    transition_status(
        discussion,
        DiscussionStatus::AwaitingExecution,
        "checklist finalized",
    )
}

/// The only sanctioned repair path for a discussion that was somehow marked
/// `DECIDED` while still holding non-terminal items — collapses every such
/// item to `ACCEPT_REJECTION` and logs the repair (spec §4.7).
pub fn fix_inconsistent_decided_state(discussion: &mut Discussion) -> SimResult<()> {
    if discussion.status != DiscussionStatus::Decided {
        return Ok(());
    }

    let mut repaired = 0usize;
    for item in discussion.checklist.iter_mut() {
        if matches!(item.status, ChecklistStatus::Pending | ChecklistStatus::ReviseRequired) {
            item.status = ChecklistStatus::AcceptRejection;
            item.refinement_log.push("repaired: forced terminal on inconsistent DECIDED state".to_string());
            repaired += 1;
        }
    }

    if repaired > 0 {
        warn!(
            discussion_id = %discussion.id,
            repaired,
            "repaired inconsistent DECIDED discussion"
        );
        discussion.touch();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discussion() -> Discussion {
        Discussion::new("sector-1", "title", vec!["a1".into()], 2)
    }

    #[test]
    fn created_to_in_progress_is_permitted() {
        let mut d = discussion();
        transition_status(&mut d, DiscussionStatus::InProgress, "round start").unwrap();
        assert_eq!(d.status, DiscussionStatus::InProgress);
    }

    #[test]
    fn created_to_decided_is_rejected() {
        let mut d = discussion();
        let result = transition_status(&mut d, DiscussionStatus::Decided, "skip");
        assert!(result.is_err());
    }

    #[test]
    fn decided_refuses_pending_items() {
        use crate::domain::ChecklistItem;
        let mut d = discussion();
        d.status = DiscussionStatus::AwaitingExecution;
        d.checklist.push(ChecklistItem {
            id: "i1".into(),
            source_agent_id: "a1".into(),
            action_type: crate::types::ActionType::Buy,
            symbol: "S1".into(),
            amount: 1.0,
            allocation_percent: 10.0,
            confidence: 80.0,
            rationale: "r".into(),
            status: ChecklistStatus::Pending,
            signal_strength: 80.0,
            round: Some(0),
            previous_versions: Vec::new(),
            revision_count: 0,
            refinement_log: Vec::new(),
        });
        let result = transition_status(&mut d, DiscussionStatus::Decided, "close");
        assert!(result.is_err());
    }

    #[test]
    fn repair_collapses_pending_items_to_accept_rejection() {
        use crate::domain::ChecklistItem;
        let mut d = discussion();
        d.status = DiscussionStatus::Decided;
        d.checklist.push(ChecklistItem {
            id: "i1".into(),
            source_agent_id: "a1".into(),
            action_type: crate::types::ActionType::Buy,
            symbol: "S1".into(),
            amount: 1.0,
            allocation_percent: 10.0,
            confidence: 80.0,
            rationale: "r".into(),
            status: ChecklistStatus::Pending,
            signal_strength: 80.0,
            round: Some(0),
            previous_versions: Vec::new(),
            revision_count: 0,
            refinement_log: Vec::new(),
        });
        fix_inconsistent_decided_state(&mut d).unwrap();
        assert_eq!(d.checklist[0].status, ChecklistStatus::AcceptRejection);
    }

    #[test]
    fn transition_is_idempotent_on_terminal_status() {
        let mut d = discussion();
        d.status = DiscussionStatus::Closed;
        transition_status(&mut d, DiscussionStatus::Closed, "re-close").unwrap();
        assert_eq!(d.status, DiscussionStatus::Closed);
    }
}
