// =============================================================================
// Order book / execution log — spec §4.7 EXECUTION
// =============================================================================
//
// There is no exchange here, so execution is always local simulation: an
// `APPROVED` checklist item becomes a `Trade` against the sector's current
// price and balance, recorded append-only in the sector's execution log.
// Adapted from the teacher's `ExecutionEngine`/`ExecutionResult` pairing —
// `ExecutionResult` here drops the `Placed`/live variant since there is no
// exchange, and replaces `Simulated` with the concrete `Trade` it produced.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::ChecklistItem;
use crate::types::ActionType;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: String,
    pub checklist_item_id: String,
    pub sector_id: String,
    pub symbol: String,
    pub action: ActionType,
    pub quantity: f64,
    pub price: f64,
    pub notional: f64,
    pub balance_after: f64,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionResult {
    Executed(Trade),
    Rejected(ExecutionReject),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReject {
    pub checklist_item_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum ExecutionLogEntry {
    Executed(Trade),
    Rejected(ExecutionReject),
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Executed(trade) => write!(f, "Executed({})", trade.id),
            Self::Rejected(reject) => write!(f, "Rejected({})", reject.reason),
        }
    }
}

/// Execute one `APPROVED` checklist item against the sector's current price
/// and balance. HOLD items are never passed here — the discussion engine
/// filters to BUY/SELL before calling execute (spec §4.7 rule 1).
///
/// Returns a rejection (never panics) if `item.symbol` fell out of the
/// sector's allowed-symbol set since the item was created, if the resulting
/// quantity is zero or negative, if the notional exceeds the sector's
/// remaining balance on a BUY, or if `quantity` cannot be computed for a
/// zero price.
pub fn execute_decision(
    item: &ChecklistItem,
    current_price: f64,
    balance: f64,
    allowed_symbols: &[String],
) -> ExecutionResult {
    if item.action_type == ActionType::Hold {
        warn!(item_id = %item.id, "execute_decision called on a HOLD item");
        return ExecutionResult::Rejected(ExecutionReject {
            checklist_item_id: item.id.clone(),
            reason: "HOLD items are never executed".to_string(),
        });
    }

    let symbol_allowed = allowed_symbols
        .iter()
        .any(|s| s.to_uppercase() == item.symbol.to_uppercase());
    if !symbol_allowed {
        return ExecutionResult::Rejected(ExecutionReject {
            checklist_item_id: item.id.clone(),
            reason: format!("{} is not in the sector's allowed-symbol set", item.symbol),
        });
    }

    if current_price <= 0.0 {
        return ExecutionResult::Rejected(ExecutionReject {
            checklist_item_id: item.id.clone(),
            reason: "non-positive sector price".to_string(),
        });
    }

    let notional = balance * (item.allocation_percent / 100.0);
    let quantity = notional / current_price;

    if quantity <= 0.0 {
        return ExecutionResult::Rejected(ExecutionReject {
            checklist_item_id: item.id.clone(),
            reason: "computed quantity is zero for a non-HOLD action".to_string(),
        });
    }

    let balance_after = match item.action_type {
        ActionType::Buy => {
            if notional > balance {
                return ExecutionResult::Rejected(ExecutionReject {
                    checklist_item_id: item.id.clone(),
                    reason: format!(
                        "insufficient balance: requested {notional:.2}, available {balance:.2}"
                    ),
                });
            }
            balance - notional
        }
        ActionType::Sell => balance + notional,
        ActionType::Hold => unreachable!("filtered above"),
    };

    let trade = Trade {
        id: uuid::Uuid::new_v4().to_string(),
        checklist_item_id: item.id.clone(),
        sector_id: String::new(),
        symbol: item.symbol.clone(),
        action: item.action_type,
        quantity,
        price: current_price,
        notional,
        balance_after,
        executed_at: Utc::now(),
    };

    info!(
        trade_id = %trade.id,
        action = %trade.action,
        notional,
        "trade executed"
    );

    ExecutionResult::Executed(trade)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChecklistStatus;

    fn sample_item(action: ActionType, allocation_percent: f64) -> ChecklistItem {
        ChecklistItem {
            id: "item-1".into(),
            source_agent_id: "agent-1".into(),
            action_type: action,
            symbol: "S1".into(),
            amount: 0.0,
            allocation_percent,
            confidence: 80.0,
            rationale: "test".into(),
            status: ChecklistStatus::Approved,
            signal_strength: 80.0,
            round: Some(0),
            previous_versions: Vec::new(),
            revision_count: 0,
            refinement_log: Vec::new(),
        }
    }

    fn allowed() -> Vec<String> {
        vec!["S1".to_string()]
    }

    #[test]
    fn buy_reduces_balance_by_notional() {
        let item = sample_item(ActionType::Buy, 10.0);
        let result = execute_decision(&item, 100.0, 1000.0, &allowed());
        match result {
            ExecutionResult::Executed(trade) => {
                assert_eq!(trade.notional, 100.0);
                assert_eq!(trade.balance_after, 900.0);
            }
            ExecutionResult::Rejected(r) => panic!("unexpected reject: {}", r.reason),
        }
    }

    #[test]
    fn buy_exceeding_balance_is_rejected() {
        let item = sample_item(ActionType::Buy, 200.0);
        let result = execute_decision(&item, 100.0, 1000.0, &allowed());
        assert!(matches!(result, ExecutionResult::Rejected(_)));
    }

    #[test]
    fn hold_items_are_never_executed() {
        let item = sample_item(ActionType::Hold, 10.0);
        let result = execute_decision(&item, 100.0, 1000.0, &allowed());
        assert!(matches!(result, ExecutionResult::Rejected(_)));
    }

    #[test]
    fn sell_increases_balance() {
        let item = sample_item(ActionType::Sell, 10.0);
        let result = execute_decision(&item, 100.0, 1000.0, &allowed());
        match result {
            ExecutionResult::Executed(trade) => assert_eq!(trade.balance_after, 1100.0),
            ExecutionResult::Rejected(r) => panic!("unexpected reject: {}", r.reason),
        }
    }

    #[test]
    fn symbol_outside_allowed_set_is_rejected() {
        let item = sample_item(ActionType::Buy, 10.0);
        let result = execute_decision(&item, 100.0, 1000.0, &["S2".to_string()]);
        assert!(matches!(result, ExecutionResult::Rejected(_)));
    }

    #[test]
    fn zero_balance_yields_zero_quantity_and_is_rejected() {
        let item = sample_item(ActionType::Buy, 10.0);
        let result = execute_decision(&item, 100.0, 0.0, &allowed());
        assert!(matches!(result, ExecutionResult::Rejected(_)));
    }

    #[test]
    fn zero_allocation_yields_zero_quantity_and_is_rejected() {
        let item = sample_item(ActionType::Sell, 0.0);
        let result = execute_decision(&item, 100.0, 1000.0, &allowed());
        assert!(matches!(result, ExecutionResult::Rejected(_)));
    }
}
