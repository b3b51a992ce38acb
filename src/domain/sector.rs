// =============================================================================
// Sector — spec §3 DATA MODEL
// =============================================================================
//
// A sector owns its agents and discussions exclusively (by id reference, not
// by embedding — see spec §3 "Ownership"). Candle history is a bounded ring
// the way the teacher's `CandleBuffer` bounds kline history, capped here at
// 100 entries per spec §4.4.
// =============================================================================

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum candles retained per sector (spec §4.4: "bounded to last 100").
pub const CANDLE_CAP: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sector {
    pub id: String,
    pub name: String,
    pub ticker: String,
    pub allowed_symbols: Vec<String>,
    pub current_price: f64,
    pub baseline_price: f64,
    pub change_abs: f64,
    pub change_percent: f64,
    pub volatility: f64,
    pub risk_score: f64,
    pub balance: f64,
    #[serde(default)]
    pub volume: f64,
    pub agent_ids: Vec<String>,
    #[serde(default)]
    pub discussion_ids: Vec<String>,
    #[serde(default)]
    pub candles: VecDeque<Candle>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub schema_version: Option<u32>,
}

impl Sector {
    pub fn new(
        name: impl Into<String>,
        ticker: impl Into<String>,
        allowed_symbols: Vec<String>,
        initial_balance: f64,
        initial_price: f64,
    ) -> Self {
        let allowed_symbols: Vec<String> = allowed_symbols
            .into_iter()
            .map(|s| s.to_uppercase())
            .collect();

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            ticker: ticker.into(),
            allowed_symbols,
            current_price: initial_price,
            baseline_price: initial_price,
            change_abs: 0.0,
            change_percent: 0.0,
            volatility: 0.05,
            risk_score: 0.0,
            balance: initial_balance,
            volume: 0.0,
            agent_ids: Vec::new(),
            discussion_ids: Vec::new(),
            candles: VecDeque::new(),
            created_at: Utc::now(),
            schema_version: Some(1),
        }
    }

    /// `true` iff `symbol` (case-insensitively) is one of this sector's
    /// allowed symbols (spec §4.6 rule 3).
    pub fn allows_symbol(&self, symbol: &str) -> bool {
        let upper = symbol.to_uppercase();
        self.allowed_symbols.iter().any(|s| s == &upper)
    }

    pub fn push_candle(&mut self, candle: Candle) {
        self.candles.push_back(candle);
        while self.candles.len() > CANDLE_CAP {
            self.candles.pop_front();
        }
    }

    pub fn worker_ids<'a>(&'a self, manager_id: &'a str) -> impl Iterator<Item = &'a String> {
        self.agent_ids.iter().filter(move |id| id.as_str() != manager_id)
    }
}

/// Append-only record in the global price history file (spec §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceHistoryEntry {
    pub id: String,
    pub sector_id: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

impl PriceHistoryEntry {
    pub fn new(sector_id: impl Into<String>, price: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sector_id: sector_id.into(),
            price,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_symbols_are_uppercased_on_construction() {
        let s = Sector::new("Demo", "DEMO", vec!["s1".to_string()], 1000.0, 10.0);
        assert_eq!(s.allowed_symbols, vec!["S1".to_string()]);
        assert!(s.allows_symbol("s1"));
        assert!(s.allows_symbol("S1"));
        assert!(!s.allows_symbol("s2"));
    }

    #[test]
    fn candle_history_is_capped() {
        let mut s = Sector::new("Demo", "DEMO", vec!["S1".to_string()], 1000.0, 10.0);
        for i in 0..150 {
            s.push_candle(Candle {
                open: i as f64,
                high: i as f64,
                low: i as f64,
                close: i as f64,
                volume: 1.0,
                at: Utc::now(),
            });
        }
        assert_eq!(s.candles.len(), CANDLE_CAP);
        assert_eq!(s.candles.front().unwrap().open, 50.0);
    }
}
