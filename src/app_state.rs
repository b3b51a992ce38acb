// =============================================================================
// Central Application State — sector simulation engine
// =============================================================================
//
// The single source of truth shared across the HTTP layer and every spawned
// scheduler/discussion task. Subsystems that own their own interior
// mutability (the persistence store, the discussion engine, the scheduler)
// are held as `Arc`s; `AppState` itself adds only a version counter, the
// same lock-free change-detection idiom the teacher used for its dashboard
// feed.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::config::RuntimeConfig;
use crate::discussion_engine::DiscussionEngine;
use crate::domain::{Agent, Discussion, Sector};
use crate::errors::SimResult;
use crate::llm_adapter::{HoldFallbackClient, HttpLlmClient, LlmClient};
use crate::persistence::Store;
use crate::scheduler::Scheduler;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing version counter, bumped on every mutation
    /// that should invalidate a client's cached view.
    pub state_version: AtomicU64,

    pub config: RuntimeConfig,
    pub store: Arc<Store>,
    pub discussion_engine: Arc<DiscussionEngine>,
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    pub fn new(config: RuntimeConfig) -> SimResult<Arc<Self>> {
        let store = Arc::new(Store::open(&config.data_dir)?);

        let llm: Arc<dyn LlmClient> = if config.llm_enabled {
            let url = config
                .llm_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434/generate".to_string());
            Arc::new(HttpLlmClient::new(url, config.llm_timeout))
        } else {
            Arc::new(HoldFallbackClient)
        };

        let discussion_engine = Arc::new(DiscussionEngine::new(
            Arc::clone(&store),
            llm,
            config.clone(),
        ));

        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&discussion_engine),
            config.clone(),
        ));

        Ok(Arc::new(Self {
            state_version: AtomicU64::new(1),
            config,
            store,
            discussion_engine,
            scheduler,
        }))
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    /// Spawn scheduler tasks for every sector already in the store — called
    /// once at boot to resume ticking after a restart.
    pub async fn resume_all_sectors(&self) -> SimResult<()> {
        let sectors = self.store.sectors.all().await;
        for sector in sectors {
            self.scheduler
                .spawn_sector(sector.id.clone(), sector.baseline_price, sector.volatility)
                .await;
        }
        Ok(())
    }

    /// Build a read-only join of a sector with its agents — the explicit
    /// view construction the design notes call for in place of the source's
    /// copy-then-edit enrichment pattern (spec §9).
    pub async fn sector_view(&self, sector_id: &str) -> Option<SectorView> {
        let sector = self.store.sectors.find(|s| s.id == sector_id).await?;
        let agents = self
            .store
            .agents
            .all()
            .await
            .into_iter()
            .filter(|a| a.sector_id == sector_id)
            .collect();
        Some(SectorView { sector, agents })
    }

    /// Build a read-only join of a discussion with its participant agents.
    pub async fn discussion_view(&self, discussion_id: &str) -> Option<DiscussionView> {
        let discussion = self
            .store
            .discussions
            .find(|d| d.id == discussion_id)
            .await?;
        let agents = self
            .store
            .agents
            .all()
            .await
            .into_iter()
            .filter(|a| discussion.participant_ids.contains(&a.id))
            .collect();
        Some(DiscussionView { discussion, agents })
    }
}

/// A sector joined with its agent roster — read-only, constructed fresh on
/// every request rather than mutated in place.
#[derive(Debug, Clone, Serialize)]
pub struct SectorView {
    #[serde(flatten)]
    pub sector: Sector,
    pub agents: Vec<Agent>,
}

/// A discussion joined with its participant agents.
#[derive(Debug, Clone, Serialize)]
pub struct DiscussionView {
    #[serde(flatten)]
    pub discussion: Discussion,
    pub agents: Vec<Agent>,
}
