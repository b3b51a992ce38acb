// =============================================================================
// Persistence — JSON-file collections, one per record type
// =============================================================================
//
// Generalizes the teacher's `RuntimeConfig::save`/`load` atomic tmp+rename
// pattern from a single settings file to N independently-locked collections
// (sectors, agents, discussions, price history, and a per-sector execution
// log directory). Every write is `serde_json::to_string_pretty` to a `.tmp`
// sibling followed by `std::fs::rename`, so a crash mid-write never leaves a
// collection file corrupted.
//
// Each collection is guarded by its own `tokio::sync::Mutex` rather than one
// lock over the whole store, so a write to `discussions.json` never blocks a
// read of `sectors.json`.
// =============================================================================

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::PRICE_HISTORY_CAP;
use crate::domain::{Agent, Discussion, PriceHistoryEntry, Sector};
use crate::errors::SimResult;
use crate::order_book::ExecutionLogEntry;

/// A single named JSON-backed collection of `T`, held in memory and flushed
/// to disk on every mutation.
pub struct Collection<T> {
    path: PathBuf,
    items: Mutex<Vec<T>>,
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    fn load_or_empty(path: PathBuf) -> Self {
        let items = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|err| {
                warn!(path = %path.display(), %err, "failed to parse collection, starting empty");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        Self {
            path,
            items: Mutex::new(items),
        }
    }

    pub async fn all(&self) -> Vec<T> {
        self.items.lock().await.clone()
    }

    pub async fn find<F>(&self, mut predicate: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        self.items.lock().await.iter().find(|t| predicate(t)).cloned()
    }

    pub async fn push(&self, item: T) -> SimResult<()> {
        let mut guard = self.items.lock().await;
        guard.push(item);
        Self::flush(&self.path, &guard)
    }

    /// Atomically check a guard predicate against the whole collection and,
    /// if it passes, push `item` — all under a single lock acquisition. Used
    /// to enforce invariants like "at most one active discussion per sector"
    /// without a check-then-act race between callers (spec §5 serial lock).
    pub async fn check_and_push<G>(&self, guard_ok: G, item: T) -> SimResult<bool>
    where
        G: FnOnce(&[T]) -> bool,
    {
        let mut items = self.items.lock().await;
        if !guard_ok(&items) {
            return Ok(false);
        }
        items.push(item);
        Self::flush(&self.path, &items)?;
        Ok(true)
    }

    /// Replace the item matching `predicate` in place, persist, and return
    /// whether a match was found.
    pub async fn update<F, U>(&self, mut predicate: F, mutate: U) -> SimResult<bool>
    where
        F: FnMut(&T) -> bool,
        U: FnOnce(&mut T),
    {
        let mut guard = self.items.lock().await;
        match guard.iter_mut().find(|t| predicate(t)) {
            Some(item) => {
                mutate(item);
                Self::flush(&self.path, &guard)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn remove<F>(&self, mut predicate: F) -> SimResult<bool>
    where
        F: FnMut(&T) -> bool,
    {
        let mut guard = self.items.lock().await;
        let before = guard.len();
        guard.retain(|t| !predicate(t));
        let removed = guard.len() != before;
        if removed {
            Self::flush(&self.path, &guard)?;
        }
        Ok(removed)
    }

    /// Push an item, then trim the front of the collection down to `cap` —
    /// used only by the price-history collection (spec §3, §6: capped at
    /// `PRICE_HISTORY_CAP`).
    pub async fn push_capped(&self, item: T, cap: usize) -> SimResult<()> {
        let mut guard = self.items.lock().await;
        guard.push(item);
        if guard.len() > cap {
            let excess = guard.len() - cap;
            guard.drain(0..excess);
        }
        Self::flush(&self.path, &guard)
    }

    fn flush(path: &Path, items: &[T]) -> SimResult<()> {
        let content = serde_json::to_string_pretty(items)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

/// Holds every persisted collection, rooted at `RuntimeConfig::data_dir`.
pub struct Store {
    pub sectors: Collection<Sector>,
    pub agents: Collection<Agent>,
    pub discussions: Collection<Discussion>,
    pub price_history: Collection<PriceHistoryEntry>,
    execution_log_dir: PathBuf,
    execution_logs: Mutex<std::collections::HashMap<String, Collection<ExecutionLogEntry>>>,
}

impl Store {
    /// Open (or create) the on-disk collections rooted at `data_dir`.
    pub fn open(data_dir: impl AsRef<Path>) -> SimResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let execution_log_dir = data_dir.join("executionLogs");
        std::fs::create_dir_all(&execution_log_dir)?;

        info!(path = %data_dir.display(), "opened persistence store");

        Ok(Self {
            sectors: Collection::load_or_empty(data_dir.join("sectors.json")),
            agents: Collection::load_or_empty(data_dir.join("agents.json")),
            discussions: Collection::load_or_empty(data_dir.join("discussions.json")),
            price_history: Collection::load_or_empty(data_dir.join("priceHistory.json")),
            execution_log_dir,
            execution_logs: Mutex::new(std::collections::HashMap::new()),
        })
    }

    pub async fn record_price(&self, entry: PriceHistoryEntry) -> SimResult<()> {
        self.price_history.push_capped(entry, PRICE_HISTORY_CAP).await
    }

    /// Append to the per-sector execution log, lazily opening the
    /// collection for `sector_id` the first time it is touched.
    pub async fn append_execution_log(
        &self,
        sector_id: &str,
        entry: ExecutionLogEntry,
    ) -> SimResult<()> {
        let mut logs = self.execution_logs.lock().await;
        let collection = logs.entry(sector_id.to_string()).or_insert_with(|| {
            Collection::load_or_empty(self.execution_log_dir.join(format!("{sector_id}.json")))
        });
        collection.push(entry).await
    }

    pub async fn execution_log(&self, sector_id: &str) -> SimResult<Vec<ExecutionLogEntry>> {
        let mut logs = self.execution_logs.lock().await;
        let collection = logs.entry(sector_id.to_string()).or_insert_with(|| {
            Collection::load_or_empty(self.execution_log_dir.join(format!("{sector_id}.json")))
        });
        Ok(collection.all().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_and_flush_roundtrips_through_disk() {
        let dir = std::env::temp_dir().join(format!("sector-sim-test-{}", uuid::Uuid::new_v4()));
        let store = Store::open(&dir).unwrap();

        let sector = Sector::new("Demo", "DEMO", vec!["S1".into()], 1000.0, 10.0);
        let sector_id = sector.id.clone();
        store.sectors.push(sector).await.unwrap();

        let reopened = Store::open(&dir).unwrap();
        let found = reopened.sectors.find(|s| s.id == sector_id).await;
        assert!(found.is_some());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn price_history_push_capped_trims_oldest() {
        let dir = std::env::temp_dir().join(format!("sector-sim-test-{}", uuid::Uuid::new_v4()));
        let store = Store::open(&dir).unwrap();

        for i in 0..5 {
            store
                .price_history
                .push_capped(PriceHistoryEntry::new("sector-1", i as f64), 3)
                .await
                .unwrap();
        }

        let all = store.price_history.all().await;
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].price, 2.0);

        std::fs::remove_dir_all(&dir).ok();
    }
}
