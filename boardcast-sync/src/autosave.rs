//! Periodic history capture.
//!
//! Every tick records each tab's current content as a history entry and then
//! prunes each tab back to the retention cap. The tab map is cloned under the
//! shared read lock and the store work runs on the blocking pool, so the hub
//! loop is never blocked by store I/O here.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::SyncConfig;
use crate::hub::{HubHandle, SharedTabs};
use crate::storage::TabStore;
use crate::tabs::Tab;

/// Outcome of one autosave tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tabs: usize,
    pub appended: usize,
    pub pruned: u64,
    pub append_failures: usize,
    pub prune_failures: usize,
}

pub struct Autosave {
    tabs: SharedTabs,
    store: Arc<dyn TabStore>,
    retention: usize,
    interval: Duration,
}

impl Autosave {
    pub fn new(hub: &HubHandle, store: Arc<dyn TabStore>, config: &SyncConfig) -> Self {
        Self {
            tabs: hub.shared_tabs(),
            store,
            retention: config.history_retention,
            interval: config.autosave_interval(),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Tick forever. The first tick happens one interval after start.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = self.tick().await;
            log::info!(
                "Autosave: {} tabs, {} saved, {} pruned, {} failures",
                report.tabs,
                report.appended,
                report.pruned,
                report.append_failures + report.prune_failures
            );
        }
    }

    /// Run one save-and-prune pass. Per-tab failures are logged and skipped.
    pub async fn tick(&self) -> TickReport {
        let tabs = self.tabs.read().await.to_vec();
        let count = tabs.len();
        let store = Arc::clone(&self.store);
        let retention = self.retention;

        let pass = tokio::task::spawn_blocking(move || save_and_prune(store.as_ref(), &tabs, retention));
        match pass.await {
            Ok(report) => report,
            Err(e) => {
                log::error!("Autosave task failed to join: {e}");
                TickReport {
                    tabs: count,
                    append_failures: count,
                    ..TickReport::default()
                }
            }
        }
    }
}

fn save_and_prune(store: &dyn TabStore, tabs: &[Tab], retention: usize) -> TickReport {
    let mut report = TickReport {
        tabs: tabs.len(),
        ..TickReport::default()
    };

    for tab in tabs {
        match store.append_history(&tab.id, &tab.content) {
            Ok(_) => report.appended += 1,
            Err(e) => {
                log::error!("Autosave of tab '{}' failed: {e}", tab.id);
                report.append_failures += 1;
            }
        }
    }

    for tab in tabs {
        match store.prune_history(&tab.id, retention) {
            Ok(removed) => report.pruned += removed,
            Err(e) => {
                log::error!("History prune of tab '{}' failed: {e}", tab.id);
                report.prune_failures += 1;
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Hub;
    use crate::storage::{HistoryRecord, MemoryStore, StoreError};
    use crate::tabs::Tab;
    use std::sync::Mutex;

    fn setup(store: Arc<dyn TabStore>, retention: usize) -> (HubHandle, Autosave) {
        let config = SyncConfig {
            history_retention: retention,
            ..SyncConfig::for_testing()
        };
        let (hub, handle) = Hub::new(store.clone(), &config).unwrap();
        hub.spawn();
        let autosave = Autosave::new(&handle, store, &config);
        (handle, autosave)
    }

    #[tokio::test]
    async fn test_tick_appends_every_tab() {
        let store = Arc::new(MemoryStore::with_tabs([Tab::new("a", "A"), Tab::new("b", "B")]));
        let (_hub, autosave) = setup(store.clone(), 50);

        let report = autosave.tick().await;
        assert_eq!(report.tabs, 2);
        assert_eq!(report.appended, 2);
        assert_eq!(store.history("a").len(), 1);
        assert_eq!(store.history("b").len(), 1);
    }

    #[tokio::test]
    async fn test_retention_cap_holds_across_ticks() {
        let store = Arc::new(MemoryStore::new());
        let (_hub, autosave) = setup(store.clone(), 5);

        for _ in 0..12 {
            autosave.tick().await;
            assert!(store.history("default").len() <= 5);
        }
        assert_eq!(store.history("default").len(), 5);
    }

    #[tokio::test]
    async fn test_tick_sees_live_content() {
        let store = Arc::new(MemoryStore::new());
        let (hub, autosave) = setup(store.clone(), 50);

        hub.submit(r#"{"type":"update","tabId":"default","content":"draft"}"#)
            .await
            .unwrap();
        // Wait for the hub to apply the update
        while hub.tabs().await[0].content != "draft" {
            tokio::task::yield_now().await;
        }

        autosave.tick().await;
        assert_eq!(store.history("default")[0].content, "draft");
    }

    /// Fails history appends for one tab id only.
    struct FlakyStore {
        inner: MemoryStore,
        bad_tab: &'static str,
        prunes: Mutex<Vec<String>>,
    }

    impl TabStore for FlakyStore {
        fn upsert_tab(&self, tab: &Tab) -> Result<(), StoreError> {
            self.inner.upsert_tab(tab)
        }

        fn load_all_tabs(&self) -> Result<Vec<Tab>, StoreError> {
            self.inner.load_all_tabs()
        }

        fn delete_tab(&self, tab_id: &str) -> Result<(), StoreError> {
            self.inner.delete_tab(tab_id)
        }

        fn append_history(&self, tab_id: &str, content: &str) -> Result<HistoryRecord, StoreError> {
            if tab_id == self.bad_tab {
                return Err(StoreError::DatabaseError("disk full".into()));
            }
            self.inner.append_history(tab_id, content)
        }

        fn prune_history(&self, tab_id: &str, keep: usize) -> Result<u64, StoreError> {
            self.prunes.lock().unwrap().push(tab_id.to_string());
            self.inner.prune_history(tab_id, keep)
        }
    }

    #[tokio::test]
    async fn test_one_failing_tab_does_not_abort_tick() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::with_tabs([Tab::new("a", "A"), Tab::new("b", "B"), Tab::new("c", "C")]),
            bad_tab: "b",
            prunes: Mutex::new(Vec::new()),
        });
        let (_hub, autosave) = setup(store.clone(), 50);

        let report = autosave.tick().await;
        assert_eq!(report.appended, 2);
        assert_eq!(report.append_failures, 1);
        assert_eq!(store.inner.history("a").len(), 1);
        assert_eq!(store.inner.history("c").len(), 1);
        assert_eq!(store.prunes.lock().unwrap().len(), 3);
    }

    /// Holds every history append until the test releases it.
    struct GatedStore {
        inner: MemoryStore,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl TabStore for GatedStore {
        fn upsert_tab(&self, tab: &Tab) -> Result<(), StoreError> {
            self.inner.upsert_tab(tab)
        }

        fn load_all_tabs(&self) -> Result<Vec<Tab>, StoreError> {
            self.inner.load_all_tabs()
        }

        fn delete_tab(&self, tab_id: &str) -> Result<(), StoreError> {
            self.inner.delete_tab(tab_id)
        }

        fn append_history(&self, tab_id: &str, content: &str) -> Result<HistoryRecord, StoreError> {
            self.release
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5))
                .map_err(|_| StoreError::DatabaseError("never released".into()))?;
            self.inner.append_history(tab_id, content)
        }

        fn prune_history(&self, tab_id: &str, keep: usize) -> Result<u64, StoreError> {
            self.inner.prune_history(tab_id, keep)
        }
    }

    #[tokio::test]
    async fn test_blocked_store_leaves_runtime_free() {
        let (release, gate) = std::sync::mpsc::channel();
        let store = Arc::new(GatedStore {
            inner: MemoryStore::new(),
            release: Mutex::new(gate),
        });
        let (hub, autosave) = setup(store.clone(), 50);

        let tick = tokio::spawn(async move { autosave.tick().await });
        tokio::task::yield_now().await;

        // The hub shares this single-threaded runtime with the stalled tick
        hub.submit(r#"{"type":"update","tabId":"default","content":"edited"}"#)
            .await
            .unwrap();
        while hub.tabs().await[0].content != "edited" {
            tokio::task::yield_now().await;
        }

        release.send(()).unwrap();
        let report = tick.await.unwrap();
        assert_eq!(report.appended, 1);
        assert_eq!(report.append_failures, 0);
        assert_eq!(store.inner.history("default").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_interval() {
        let store = Arc::new(MemoryStore::new());
        let (_hub, autosave) = setup(store.clone(), 50);
        let interval = autosave.interval;
        autosave.spawn();

        tokio::time::sleep(interval / 2).await;
        assert!(store.history("default").is_empty());

        tokio::time::sleep(interval).await;
        assert_eq!(store.history("default").len(), 1);
    }
}
