// =============================================================================
// Runtime configuration — environment-sourced engine settings
// =============================================================================
//
// There is no GUI settings panel in this system (unlike the dashboard this
// module's teacher once fed), so configuration is env-sourced rather than
// file-hot-reloaded. Every field carries a sensible default so a bare
// `RuntimeConfig::from_env()` is enough to boot the engine for local
// development.
// =============================================================================

use std::time::Duration;

/// Confidence below which a worker may not participate in a new round, and
/// below which a new discussion cannot be started (spec §4.8, §4.9).
pub const GATING_THRESHOLD: f64 = 65.0;

/// Cap on refinement rounds per checklist item before it collapses to
/// `ACCEPT_REJECTION` (spec §4.8).
pub const MAX_REFINEMENT_ROUNDS: u32 = 3;

/// The Phase-4 "growth assist" constant — numeric folklore carried forward
/// verbatim from the specification (spec §4.2, §9 Open Questions).
pub const CONFIDENCE_GROWTH_ASSIST: f64 = 2.0;

/// Maximum number of sector agents, manager included (spec §3).
pub const MAX_WORKERS_PER_SECTOR: usize = 5;

/// Global cap on retained `PriceHistory` entries (spec §3, §6).
pub const PRICE_HISTORY_CAP: usize = 100_000;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// HTTP listener port. Env: `PORT`.
    pub port: u16,

    /// Selects the live HTTP LLM client vs. the deterministic fallback
    /// client. Env: `LLM_ENABLED`.
    pub llm_enabled: bool,

    /// Base URL for the live LLM client, consumed only by `HttpLlmClient`.
    /// Env: `SECTOR_SIM_LLM_URL`.
    pub llm_url: Option<String>,

    /// Directory holding the persisted JSON collections. Env:
    /// `SECTOR_SIM_DATA_DIR`.
    pub data_dir: std::path::PathBuf,

    /// Per-sector scheduler tick interval. Env: `SECTOR_SIM_TICK_MS`.
    pub tick_interval: Duration,

    /// Number of rounds a discussion runs before finalization. Env:
    /// `SECTOR_SIM_ROUNDS`.
    pub rounds_per_discussion: u32,

    /// Delay between rounds, normally ~200ms per spec §4.9. Tests override
    /// this to zero so scenario suites don't pay wall-clock cost.
    pub round_delay: Duration,

    /// Bounded deadline for each LLM call (spec §5 "Timeouts").
    pub llm_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            llm_enabled: false,
            llm_url: None,
            data_dir: std::path::PathBuf::from("./data"),
            tick_interval: Duration::from_secs(1),
            rounds_per_discussion: 2,
            round_delay: Duration::from_millis(200),
            llm_timeout: Duration::from_secs(20),
        }
    }
}

impl RuntimeConfig {
    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);

        let llm_enabled = std::env::var("LLM_ENABLED")
            .ok()
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.llm_enabled);

        let llm_url = std::env::var("SECTOR_SIM_LLM_URL").ok();

        let data_dir = std::env::var("SECTOR_SIM_DATA_DIR")
            .map(std::path::PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let tick_interval = std::env::var("SECTOR_SIM_TICK_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.tick_interval);

        let rounds_per_discussion = std::env::var("SECTOR_SIM_ROUNDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.rounds_per_discussion);

        Self {
            port,
            llm_enabled,
            llm_url,
            data_dir,
            tick_interval,
            rounds_per_discussion,
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_safe_for_local_dev() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.port, 8080);
        assert!(!cfg.llm_enabled);
        assert_eq!(cfg.rounds_per_discussion, 2);
    }

    #[test]
    fn constants_match_spec_values() {
        assert_eq!(GATING_THRESHOLD, 65.0);
        assert_eq!(MAX_REFINEMENT_ROUNDS, 3);
        assert_eq!(CONFIDENCE_GROWTH_ASSIST, 2.0);
    }
}
