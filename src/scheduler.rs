// =============================================================================
// Simulation Scheduler — spec §4.10
// =============================================================================
//
// One cooperative tokio task per sector, spawned and cancelled the way the
// teacher's `main.rs` spawns one reconnect-loop task per traded symbol.
// Honors a global pause flag (spec §4.10 "skipped while the hosting process
// is hidden") and isolates failures per sector: an error in one sector's
// tick is logged and the loop continues rather than taking down the process
// (spec §7 "the scheduler marks that sector's loop as failed and continues
// others").
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::RuntimeConfig;
use crate::confidence::update_confidence;
use crate::discussion_engine::DiscussionEngine;
use crate::discussion_status::transition_status;
use crate::domain::PriceHistoryEntry;
use crate::errors::SimResult;
use crate::order_book::{execute_decision, ExecutionLogEntry, ExecutionResult};
use crate::persistence::Store;
use crate::price_sim::PriceSimulator;
use crate::types::{ChecklistStatus, DiscussionStatus};

pub struct Scheduler {
    store: Arc<Store>,
    discussion_engine: Arc<DiscussionEngine>,
    config: RuntimeConfig,
    paused: Arc<AtomicBool>,
    simulators: Mutex<HashMap<String, Arc<PriceSimulator>>>,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
    failed_sectors: Mutex<HashSet<String>>,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, discussion_engine: Arc<DiscussionEngine>, config: RuntimeConfig) -> Self {
        Self {
            store,
            discussion_engine,
            config,
            paused: Arc::new(AtomicBool::new(false)),
            simulators: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            failed_sectors: Mutex::new(HashSet::new()),
        }
    }

    /// `true` once `sector_id`'s loop has stopped after a persistent
    /// `StorageError` (spec §7 "the scheduler marks that sector's loop as
    /// failed and continues others").
    pub async fn is_sector_failed(&self, sector_id: &str) -> bool {
        self.failed_sectors.lock().await.contains(sector_id)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Spawn a tick loop for `sector_id` if one is not already running.
    pub async fn spawn_sector(self: &Arc<Self>, sector_id: String, baseline_price: f64, volatility: f64) {
        let mut simulators = self.simulators.lock().await;
        simulators
            .entry(sector_id.clone())
            .or_insert_with(|| Arc::new(PriceSimulator::new(baseline_price, volatility)));
        drop(simulators);

        let mut handles = self.handles.lock().await;
        if handles.contains_key(&sector_id) {
            return;
        }

        let scheduler = Arc::clone(self);
        let sid = sector_id.clone();
        let handle = tokio::spawn(async move { scheduler.run_sector_loop(sid).await });
        handles.insert(sector_id, handle);
    }

    /// Cancel the task bound to `sector_id` (spec §5 "sector deletion
    /// cancels all tasks bound to that sector").
    pub async fn cancel_sector(&self, sector_id: &str) {
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.remove(sector_id) {
            handle.abort();
        }
        self.simulators.lock().await.remove(sector_id);
        self.failed_sectors.lock().await.remove(sector_id);
    }

    /// Storage failures are retried once at the call site; a second failure
    /// in the same tick marks the sector failed and stops its loop, leaving
    /// sibling sector loops untouched (spec §7).
    async fn run_sector_loop(self: Arc<Self>, sector_id: String) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        let mut rng = StdRng::from_entropy();

        loop {
            interval.tick().await;

            if self.paused.load(Ordering::SeqCst) {
                continue;
            }

            let mut result = self.run_tick(&sector_id, &mut rng).await;
            if let Err(err) = &result {
                if matches!(err, crate::errors::SimError::Storage(_)) {
                    warn!(sector_id = %sector_id, %err, "sector tick storage failure, retrying once");
                    result = self.run_tick(&sector_id, &mut rng).await;
                }
            }

            if let Err(err) = result {
                if matches!(err, crate::errors::SimError::Storage(_)) {
                    error!(sector_id = %sector_id, %err, "sector tick storage failure persisted after retry, marking sector failed");
                    self.failed_sectors.lock().await.insert(sector_id.clone());
                    return;
                }
                error!(sector_id = %sector_id, %err, "sector tick failed, continuing");
            }
        }
    }

    async fn run_tick(&self, sector_id: &str, rng: &mut StdRng) -> SimResult<()> {
        self.advance_price(sector_id, rng).await?;
        self.drive_discussion(sector_id).await?;
        self.settle_awaiting_execution(sector_id).await?;
        Ok(())
    }

    async fn advance_price(&self, sector_id: &str, rng: &mut StdRng) -> SimResult<()> {
        let simulators = self.simulators.lock().await;
        let Some(simulator) = simulators.get(sector_id).cloned() else {
            return Ok(());
        };
        drop(simulators);

        let tick = simulator.tick(rng);
        let candle = simulator.close_candle();

        let sid = sector_id.to_string();
        self.store
            .sectors
            .update(
                move |s| s.id == sid,
                move |s| {
                    s.current_price = tick.price;
                    s.change_abs = tick.change_abs;
                    s.change_percent = tick.change_percent;
                    s.volatility = tick.volatility;
                    s.risk_score = tick.risk_score;
                    s.push_candle(candle.clone());
                },
            )
            .await?;

        self.store
            .record_price(PriceHistoryEntry::new(sector_id, tick.price))
            .await?;

        Ok(())
    }

    /// "Run a manager tick (may yield a decision)": if the sector has no
    /// active discussion, attempt to start one. Eligibility or contention
    /// failures are expected steady-state outcomes, not errors.
    async fn drive_discussion(&self, sector_id: &str) -> SimResult<()> {
        let discussions = self.store.discussions.all().await;
        let has_active = discussions
            .iter()
            .any(|d| d.sector_id == sector_id && d.status.is_active());

        if has_active {
            return Ok(());
        }

        match self.discussion_engine.start_discussion(sector_id).await {
            Ok(discussion) => {
                info!(sector_id, discussion_id = %discussion.id, "scheduler started discussion");
            }
            Err(err) => {
                warn!(sector_id, %err, "scheduler skipped starting discussion");
            }
        }

        Ok(())
    }

    /// Execute approved items for any discussion in this sector that has
    /// finished its round loop, then propagate confidence and close the
    /// discussion once every item is terminal with a matching trade
    /// (spec §4.8 "CanDiscussionClose").
    async fn settle_awaiting_execution(&self, sector_id: &str) -> SimResult<()> {
        let discussions = self.store.discussions.all().await;
        let awaiting: Vec<_> = discussions
            .into_iter()
            .filter(|d| d.sector_id == sector_id && d.status == DiscussionStatus::AwaitingExecution)
            .collect();

        for mut discussion in awaiting {
            let sector = match self.store.sectors.find(|s| s.id == sector_id).await {
                Some(s) => s,
                None => continue,
            };

            let mut balance = sector.balance;
            let mut executed_ids = HashSet::new();
            let existing_log = self.store.execution_log(sector_id).await?;
            for entry in &existing_log {
                if let ExecutionLogEntry::Executed(trade) = entry {
                    executed_ids.insert(trade.checklist_item_id.clone());
                }
            }

            for item in discussion.checklist.clone() {
                if item.status != ChecklistStatus::Approved || executed_ids.contains(&item.id) {
                    continue;
                }

                let result = execute_decision(&item, sector.current_price, balance, &sector.allowed_symbols);
                match &result {
                    ExecutionResult::Executed(trade) => {
                        balance = trade.balance_after;
                        executed_ids.insert(item.id.clone());
                        self.store
                            .append_execution_log(sector_id, ExecutionLogEntry::Executed(trade.clone()))
                            .await?;
                    }
                    ExecutionResult::Rejected(reject) => {
                        warn!(sector_id, item_id = %item.id, reason = %reject.reason, "execution rejected");
                        self.store
                            .append_execution_log(
                                sector_id,
                                ExecutionLogEntry::Rejected(reject.clone()),
                            )
                            .await?;
                    }
                }
            }

            let sid = sector_id.to_string();
            self.store
                .sectors
                .update(move |s| s.id == sid, move |s| s.balance = balance)
                .await?;

            if crate::manager_engine::can_discussion_close(&discussion, &executed_ids) {
                discussion.snapshot_round(discussion.current_round);
                transition_status(&mut discussion, DiscussionStatus::Decided, "all items terminal")?;
                self.propagate_confidence(&mut discussion, &sector).await?;

                let did = discussion.id.clone();
                let updated = discussion.clone();
                self.store
                    .discussions
                    .update(move |d| d.id == did, move |d| *d = updated.clone())
                    .await?;
            }
        }

        Ok(())
    }

    async fn propagate_confidence(
        &self,
        discussion: &mut crate::domain::Discussion,
        _sector: &crate::domain::Sector,
    ) -> SimResult<()> {
        for item in &discussion.checklist {
            let agent_id = item.source_agent_id.clone();
            let signal_strength = item.signal_strength;
            let status = item.status;

            self.store
                .agents
                .update(
                    move |a| a.id == agent_id,
                    move |a| {
                        a.set_confidence(update_confidence(a.confidence, signal_strength));
                        if status == ChecklistStatus::Approved {
                            a.trade_count += 1;
                        }
                    },
                )
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Agent, Sector};
    use crate::llm_adapter::HoldFallbackClient;

    async fn test_store() -> Arc<Store> {
        let dir = std::env::temp_dir().join(format!("sector-sim-scheduler-test-{}", uuid::Uuid::new_v4()));
        Arc::new(Store::open(dir).unwrap())
    }

    #[tokio::test]
    async fn pause_stops_ticks_from_advancing_price() {
        let store = test_store().await;
        let engine = Arc::new(DiscussionEngine::new(
            Arc::clone(&store),
            Arc::new(HoldFallbackClient),
            RuntimeConfig::default(),
        ));
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&store), engine, RuntimeConfig::default()));
        scheduler.pause();
        assert!(scheduler.paused.load(Ordering::SeqCst));
        scheduler.resume();
        assert!(!scheduler.paused.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn run_tick_advances_price_for_known_sector() {
        let store = test_store().await;
        let sector = Sector::new("Demo", "DEMO", vec!["S1".into()], 1000.0, 10.0);
        let sector_id = sector.id.clone();
        let manager = Agent::new_manager(sector_id.clone(), "Manager");
        store.sectors.push(sector).await.unwrap();
        store.agents.push(manager).await.unwrap();

        let engine = Arc::new(DiscussionEngine::new(
            Arc::clone(&store),
            Arc::new(HoldFallbackClient),
            RuntimeConfig {
                round_delay: std::time::Duration::from_millis(0),
                ..RuntimeConfig::default()
            },
        ));
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&store), engine, RuntimeConfig::default()));
        scheduler.spawn_sector(sector_id.clone(), 10.0, 0.05).await;

        let mut rng = StdRng::seed_from_u64(1);
        scheduler.run_tick(&sector_id, &mut rng).await.unwrap();

        let updated = store.sectors.find(|s| s.id == sector_id).await.unwrap();
        assert_ne!(updated.current_price, 10.0);
    }
}
