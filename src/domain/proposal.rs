// =============================================================================
// Proposal — the LLM-facing tagged union (spec §3, §9 REDESIGN FLAGS)
// =============================================================================
//
// The source system parsed freeform action strings opportunistically at
// every call site. Here a `Proposal` is validated exactly once, at the
// adapter boundary (`llm_adapter::normalize_decision`), into one of three
// variants; nothing downstream inspects a raw string to decide what kind of
// proposal it is holding.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::ActionType;

/// Fields common to all three proposal kinds (spec §3: all required fields
/// are shared; only the validation rules in §4.6 differ by action).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalFields {
    pub symbol: String,
    pub allocation_percent: f64,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub risk_notes: Option<String>,
    #[serde(default)]
    pub signal_strength: Option<f64>,
    #[serde(default)]
    pub volatility: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "UPPERCASE")]
pub enum Proposal {
    Buy(ProposalFields),
    Sell(ProposalFields),
    Hold(ProposalFields),
}

impl Proposal {
    pub fn action(&self) -> ActionType {
        match self {
            Self::Buy(_) => ActionType::Buy,
            Self::Sell(_) => ActionType::Sell,
            Self::Hold(_) => ActionType::Hold,
        }
    }

    pub fn fields(&self) -> &ProposalFields {
        match self {
            Self::Buy(f) | Self::Sell(f) | Self::Hold(f) => f,
        }
    }

    /// `signal_strength`, defaulting to `confidence` when absent, per spec
    /// §4.2.
    pub fn signal_strength_or_confidence(&self) -> f64 {
        let f = self.fields();
        f.signal_strength.unwrap_or(f.confidence)
    }

    pub fn neutral_hold(reasoning: impl Into<String>) -> Self {
        Self::Hold(ProposalFields {
            symbol: String::new(),
            allocation_percent: 0.0,
            confidence: 1.0,
            reasoning: reasoning.into(),
            risk_notes: None,
            signal_strength: None,
            volatility: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_uppercase_action_tag() {
        let p = Proposal::Buy(ProposalFields {
            symbol: "S1".into(),
            allocation_percent: 10.0,
            confidence: 50.0,
            reasoning: "trend up".into(),
            risk_notes: None,
            signal_strength: None,
            volatility: None,
        });
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["action"], "BUY");
        assert_eq!(json["allocationPercent"], 10.0);
    }

    #[test]
    fn neutral_hold_has_confidence_one() {
        let p = Proposal::neutral_hold("adapter failure");
        assert_eq!(p.action(), ActionType::Hold);
        assert_eq!(p.fields().confidence, 1.0);
    }
}
