// =============================================================================
// Confidence engine — Phase-4 monotone update rule (spec §4.2)
// =============================================================================
//
// Confidence only ever grows. There is no Phase-5 decay term in this engine —
// see DESIGN.md, an Open Question resolved in favor of the spec-literal
// Phase-4 behavior: the rule depends only on `prior` and the proposal's
// signal strength, not on the checklist item's eventual status.
// =============================================================================

use crate::config::CONFIDENCE_GROWTH_ASSIST;

/// `updateConfidence(prior, signalStrength) -> next` (spec §4.2, rule steps
/// 1-4). `signalStrength` is the proposal's `signalStrength`, already
/// defaulted to `confidence` by the caller when absent
/// (`Proposal::signal_strength_or_confidence`).
///
/// 1. Clamp the incoming signal to `[1, 100]`.
/// 2. If it does not exceed `prior`, grant the flat growth assist.
/// 3. Otherwise jump straight to the (clamped) incoming signal.
///
/// `next >= prior` always; `next <= 100` always.
pub fn update_confidence(prior: f64, signal_strength: f64) -> f64 {
    let llm_confidence = signal_strength.clamp(1.0, 100.0);
    if llm_confidence <= prior {
        (prior + CONFIDENCE_GROWTH_ASSIST).min(100.0)
    } else {
        llm_confidence.min(100.0)
    }
}

/// How closely a proposal's direction matches the sector's current price
/// trend, in `[0, 1]` — used to weight manager evaluation and as an input to
/// `signal_strength` when an LLM response omits it (spec §4.2, §4.5).
pub fn sector_alignment(action: crate::types::ActionType, change_percent: f64) -> f64 {
    use crate::types::ActionType;
    match action {
        ActionType::Buy if change_percent > 0.0 => 1.0,
        ActionType::Sell if change_percent < 0.0 => 1.0,
        ActionType::Hold => 0.5,
        _ => 0.2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_never_decreases_when_signal_is_below_prior() {
        let after = update_confidence(70.0, 40.0);
        assert_eq!(after, 72.0);
    }

    #[test]
    fn confidence_jumps_to_signal_when_signal_exceeds_prior() {
        let after = update_confidence(50.0, 90.0);
        assert_eq!(after, 90.0);
    }

    #[test]
    fn confidence_is_clamped_to_one_hundred() {
        let after = update_confidence(99.0, 150.0);
        assert_eq!(after, 100.0);
    }

    #[test]
    fn signal_strength_is_clamped_to_at_least_one() {
        let after = update_confidence(0.0, -5.0);
        assert_eq!(after, 2.0);
    }

    #[test]
    fn equal_signal_and_prior_still_grants_the_flat_assist() {
        let after = update_confidence(65.0, 65.0);
        assert_eq!(after, 67.0);
    }

    #[test]
    fn sector_alignment_rewards_matching_direction() {
        assert_eq!(sector_alignment(crate::types::ActionType::Buy, 1.0), 1.0);
        assert_eq!(sector_alignment(crate::types::ActionType::Sell, 1.0), 0.2);
    }
}
