// =============================================================================
// Price Simulator — bounded random-walk tick (spec §4.4)
// =============================================================================
//
// Adapted from the risk engine's `Inner` behind `parking_lot::RwLock` idiom:
// mutable state lives in a private `Inner`, and the public surface is a
// snapshot struct cheap enough to clone into an API response every tick.
// =============================================================================

use chrono::Utc;
use parking_lot::RwLock;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::Candle;

/// Snapshot of a sector's simulated price state, cheap to clone for API
/// responses and persistence writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    pub price: f64,
    pub change_abs: f64,
    pub change_percent: f64,
    pub volatility: f64,
    pub risk_score: f64,
}

struct Inner {
    baseline_price: f64,
    current_price: f64,
    volatility: f64,
    current_open: f64,
    current_high: f64,
    current_low: f64,
    current_volume: f64,
}

/// Drives one sector's price random walk. Not `Clone` — held behind an
/// `Arc` in the sector's scheduler task the same way the teacher holds one
/// `RiskEngine` per account.
pub struct PriceSimulator {
    inner: RwLock<Inner>,
}

impl PriceSimulator {
    pub fn new(baseline_price: f64, volatility: f64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                baseline_price,
                current_price: baseline_price,
                volatility,
                current_open: baseline_price,
                current_high: baseline_price,
                current_low: baseline_price,
                current_volume: 0.0,
            }),
        }
    }

    /// Advance the random walk by one tick. `rng` is taken as a parameter so
    /// callers (and tests) can supply a seeded generator.
    pub fn tick(&self, rng: &mut impl Rng) -> PriceTick {
        let mut inner = self.inner.write();

        let normal = Normal::new(0.0, inner.volatility).unwrap_or_else(|_| {
            Normal::new(0.0, 0.01).expect("fallback normal distribution is always valid")
        });
        let drift = normal.sample(rng);

        let previous = inner.current_price;
        let next = (previous * (1.0 + drift)).max(0.01);

        inner.current_price = next;
        inner.current_high = inner.current_high.max(next);
        inner.current_low = inner.current_low.min(next);
        inner.current_volume += rng.gen_range(0.0..1000.0);

        // Volatility itself drifts slowly, bounded to a sane range so a run
        // of large moves doesn't spiral into runaway variance.
        let vol_shift = rng.gen_range(-0.002..0.002);
        inner.volatility = (inner.volatility + vol_shift).clamp(0.005, 0.25);

        let change_abs = next - inner.baseline_price;
        let change_percent = if inner.baseline_price.abs() > f64::EPSILON {
            (change_abs / inner.baseline_price) * 100.0
        } else {
            0.0
        };

        let risk_score = risk_score_from_volatility(inner.volatility);

        debug!(price = next, change_percent, risk_score, "price tick");

        PriceTick {
            price: next,
            change_abs,
            change_percent,
            volatility: inner.volatility,
            risk_score,
        }
    }

    /// Close the in-progress candle and open a fresh one at the current
    /// price (spec §4.4: "one candle per scheduler tick window").
    pub fn close_candle(&self) -> Candle {
        let mut inner = self.inner.write();
        let candle = Candle {
            open: inner.current_open,
            high: inner.current_high,
            low: inner.current_low,
            close: inner.current_price,
            volume: inner.current_volume,
            at: Utc::now(),
        };

        inner.current_open = inner.current_price;
        inner.current_high = inner.current_price;
        inner.current_low = inner.current_price;
        inner.current_volume = 0.0;

        candle
    }

    pub fn current_price(&self) -> f64 {
        self.inner.read().current_price
    }
}

/// Maps volatility (a fraction, typically `0.005..0.25`) onto a `0..100`
/// risk score for display (spec §4.4 "risk score derived from volatility").
pub fn risk_score_from_volatility(volatility: f64) -> f64 {
    ((volatility / 0.25) * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn price_never_goes_non_positive() {
        let sim = PriceSimulator::new(100.0, 0.2);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..1000 {
            let tick = sim.tick(&mut rng);
            assert!(tick.price > 0.0);
        }
    }

    #[test]
    fn volatility_stays_within_bounds() {
        let sim = PriceSimulator::new(100.0, 0.2);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let tick = sim.tick(&mut rng);
            assert!(tick.volatility >= 0.005 && tick.volatility <= 0.25);
        }
    }

    #[test]
    fn close_candle_resets_high_low_to_current_price() {
        let sim = PriceSimulator::new(50.0, 0.1);
        let mut rng = StdRng::seed_from_u64(1);
        sim.tick(&mut rng);
        let candle = sim.close_candle();
        assert_eq!(candle.close, sim.current_price());
    }

    #[test]
    fn risk_score_scales_with_volatility() {
        assert!(risk_score_from_volatility(0.0) < risk_score_from_volatility(0.1));
        assert_eq!(risk_score_from_volatility(0.25), 100.0);
    }
}
