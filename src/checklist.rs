// =============================================================================
// Checklist Builder — spec §4.6
// =============================================================================
//
// `create_checklist_from_proposal` is the only constructor for a persisted
// `ChecklistItem`: a proposal that fails validation still produces a
// `REJECTED` item rather than being silently dropped, preserving provenance
// and exact per-round accounting (spec §4.6).
// =============================================================================

use crate::domain::{ChecklistItem, Proposal};
use crate::errors::SimError;
use crate::types::{ActionType, ChecklistStatus};

/// Validation context mirroring the source's
/// `{allowedSymbols, allowZeroAmount?, allowZeroAllocation?}` options object.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext<'a> {
    pub allowed_symbols: &'a [String],
    pub allow_zero_amount: bool,
    pub allow_zero_allocation: bool,
}

/// Raw, not-yet-validated fields a checklist item is built from.
pub struct RawChecklistItem {
    pub id: String,
    pub source_agent_id: String,
    pub action_type: ActionType,
    pub symbol: String,
    pub amount: f64,
    pub allocation_percent: f64,
    pub confidence: f64,
    pub rationale: String,
    pub status: Option<ChecklistStatus>,
    pub round: Option<u32>,
}

/// The eight ordered rules from spec §4.6, fail-fast with a descriptive
/// `ValidationError` naming the offending field.
pub fn validate_checklist_item(
    raw: &RawChecklistItem,
    ctx: &ValidationContext,
) -> Result<(), SimError> {
    if raw.id.trim().is_empty() {
        return Err(SimError::validation("id", "must be a non-empty string"));
    }
    if raw.source_agent_id.trim().is_empty() {
        return Err(SimError::validation(
            "sourceAgentId",
            "must be a non-empty string",
        ));
    }

    // rule 2 (actionType ∈ {BUY,SELL,HOLD}) is enforced by the type system —
    // `ActionType` has no fourth variant.

    let symbol_upper = raw.symbol.to_uppercase();
    let allowed = ctx
        .allowed_symbols
        .iter()
        .any(|s| s.to_uppercase() == symbol_upper);
    if !allowed {
        return Err(SimError::validation(
            "symbol",
            format!("{} is not in the sector's allowed-symbol set", raw.symbol),
        ));
    }

    if !(0.0..=100.0).contains(&raw.allocation_percent) {
        return Err(SimError::validation(
            "allocationPercent",
            "must be within [0, 100]",
        ));
    }
    let allocation_must_be_positive =
        raw.action_type != ActionType::Hold && !ctx.allow_zero_allocation;
    if allocation_must_be_positive && raw.allocation_percent <= 0.0 {
        return Err(SimError::validation(
            "allocationPercent",
            "must be > 0 for BUY/SELL unless allowZeroAllocation",
        ));
    }

    if raw.amount < 0.0 {
        return Err(SimError::validation("amount", "must be >= 0"));
    }
    let amount_must_be_positive = raw.action_type != ActionType::Hold
        && raw.allocation_percent > 0.0
        && !ctx.allow_zero_amount;
    if amount_must_be_positive && raw.amount <= 0.0 {
        return Err(SimError::validation(
            "amount",
            "must be > 0 for non-HOLD when allocationPercent > 0",
        ));
    }

    if !(0.0..=100.0).contains(&raw.confidence) {
        return Err(SimError::validation("confidence", "must be within [0, 100]"));
    }

    if raw.rationale.trim().is_empty() {
        return Err(SimError::validation("rationale", "must be non-empty"));
    }

    Ok(())
}

/// The only path to a persisted `ChecklistItem`. Validation failure never
/// drops the proposal: it returns a terminal `REJECTED` item carrying the
/// validation reason in `rationale` instead.
pub fn create_checklist_from_proposal(
    source_agent_id: impl Into<String>,
    round: u32,
    proposal: &Proposal,
    ctx: &ValidationContext,
) -> ChecklistItem {
    let source_agent_id = source_agent_id.into();
    let fields = proposal.fields();
    let action_type = proposal.action();
    let signal_strength = proposal.signal_strength_or_confidence();

    let raw = RawChecklistItem {
        id: uuid::Uuid::new_v4().to_string(),
        source_agent_id: source_agent_id.clone(),
        action_type,
        symbol: fields.symbol.clone(),
        // `amount` is derivable from `allocationPercent` (spec §3); execution
        // derives the real notional from `allocationPercent` against the
        // sector's balance at execute time, so this stays a direct copy
        // rather than a guessed-at notional with no price/balance context.
        amount: fields.allocation_percent,
        allocation_percent: fields.allocation_percent,
        confidence: fields.confidence,
        rationale: fields.reasoning.clone(),
        status: Some(ChecklistStatus::Pending),
        round: Some(round),
    };

    match validate_checklist_item(&raw, ctx) {
        Ok(()) => ChecklistItem {
            id: raw.id,
            source_agent_id,
            action_type,
            symbol: raw.symbol.to_uppercase(),
            amount: raw.amount,
            allocation_percent: raw.allocation_percent,
            confidence: raw.confidence,
            rationale: raw.rationale,
            status: ChecklistStatus::Pending,
            signal_strength,
            round: Some(round),
            previous_versions: Vec::new(),
            revision_count: 0,
            refinement_log: Vec::new(),
        },
        Err(err) => ChecklistItem {
            id: raw.id,
            source_agent_id,
            action_type,
            symbol: raw.symbol.to_uppercase(),
            amount: 0.0,
            allocation_percent: 0.0,
            confidence: raw.confidence,
            rationale: format!("rejected at creation: {err}"),
            status: ChecklistStatus::Rejected,
            signal_strength,
            round: Some(round),
            previous_versions: Vec::new(),
            revision_count: 0,
            refinement_log: vec![err.to_string()],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProposalFields;

    fn ctx<'a>(allowed: &'a [String]) -> ValidationContext<'a> {
        ValidationContext {
            allowed_symbols: allowed,
            allow_zero_amount: false,
            allow_zero_allocation: false,
        }
    }

    fn buy(symbol: &str, allocation_percent: f64, confidence: f64) -> Proposal {
        Proposal::Buy(ProposalFields {
            symbol: symbol.to_string(),
            allocation_percent,
            confidence,
            reasoning: "because".to_string(),
            risk_notes: None,
            signal_strength: None,
            volatility: None,
        })
    }

    #[test]
    fn valid_buy_produces_pending_item() {
        let allowed = vec!["S1".to_string()];
        let proposal = buy("S1", 10.0, 80.0);
        let item = create_checklist_from_proposal("agent-1", 0, &proposal, &ctx(&allowed));
        assert_eq!(item.status, ChecklistStatus::Pending);
        assert_eq!(item.symbol, "S1");
    }

    #[test]
    fn symbol_outside_allowed_set_becomes_rejected_fallback() {
        let allowed = vec!["S1".to_string()];
        let proposal = buy("S2", 10.0, 80.0);
        let item = create_checklist_from_proposal("agent-1", 0, &proposal, &ctx(&allowed));
        assert_eq!(item.status, ChecklistStatus::Rejected);
        assert!(!item.refinement_log.is_empty());
    }

    #[test]
    fn hold_allows_zero_allocation_and_amount() {
        let allowed = vec!["S1".to_string()];
        let proposal = Proposal::Hold(crate::domain::ProposalFields {
            symbol: "S1".to_string(),
            allocation_percent: 0.0,
            confidence: 50.0,
            reasoning: "nothing to do".to_string(),
            risk_notes: None,
            signal_strength: None,
            volatility: None,
        });
        let item = create_checklist_from_proposal("agent-1", 0, &proposal, &ctx(&allowed));
        assert_eq!(item.status, ChecklistStatus::Pending);
        assert_eq!(item.allocation_percent, 0.0);
        assert_eq!(item.amount, 0.0);
    }

    #[test]
    fn boundary_confidence_64_999_still_validates_item_shape() {
        // Gating on confidence happens one layer up (discussion engine); the
        // checklist builder itself only range-checks confidence.
        let allowed = vec!["S1".to_string()];
        let proposal = buy("S1", 10.0, 64.999);
        let item = create_checklist_from_proposal("agent-1", 0, &proposal, &ctx(&allowed));
        assert_eq!(item.status, ChecklistStatus::Pending);
    }
}
