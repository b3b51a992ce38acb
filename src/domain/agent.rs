// =============================================================================
// Agent — spec §3 DATA MODEL
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::AgentRole;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub display_name: String,
    pub role: AgentRole,
    pub sector_id: String,
    pub confidence: f64,
    pub risk_tolerance: f64,
    pub decision_style: String,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub performance: f64,
    #[serde(default)]
    pub trade_count: u64,
    #[serde(default)]
    pub schema_version: Option<u32>,
}

impl Agent {
    pub fn new_worker(
        sector_id: impl Into<String>,
        display_name: impl Into<String>,
        decision_style: impl Into<String>,
        risk_tolerance: f64,
    ) -> Self {
        let decision_style = decision_style.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            display_name: display_name.into(),
            role: AgentRole::Worker(decision_style.clone()),
            sector_id: sector_id.into(),
            confidence: 50.0,
            risk_tolerance,
            decision_style,
            last_activity: Utc::now(),
            performance: 0.0,
            trade_count: 0,
            schema_version: Some(1),
        }
    }

    pub fn new_manager(sector_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            display_name: display_name.into(),
            role: AgentRole::Manager,
            sector_id: sector_id.into(),
            confidence: 100.0,
            risk_tolerance: 0.5,
            decision_style: "evaluator".to_string(),
            last_activity: Utc::now(),
            performance: 0.0,
            trade_count: 0,
            schema_version: Some(1),
        }
    }

    pub fn is_eligible(&self, gating_threshold: f64) -> bool {
        self.confidence >= gating_threshold
    }

    /// Clamp confidence into `[0, 100]` — an invariant enforced on every
    /// write path, never assumed of callers.
    pub fn set_confidence(&mut self, value: f64) {
        self.confidence = value.clamp(0.0, 100.0);
        self.last_activity = Utc::now();
    }
}
