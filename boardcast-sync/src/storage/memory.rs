//! In-process [`TabStore`] for tests and benchmarks.
//!
//! The server always runs on [`WorkspaceStore`](super::WorkspaceStore); this
//! double keeps hub and autosave tests free of a data directory. Writes can
//! be made to fail on demand so callers can exercise their error paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::Utc;

use super::{HistoryRecord, StoreError, TabRecord, TabStore};
use crate::tabs::Tab;

#[derive(Default)]
pub struct MemoryStore {
    tabs: Mutex<HashMap<String, TabRecord>>,
    history: Mutex<Vec<HistoryRecord>>,
    next_history_id: AtomicU64,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with tabs, as if they had been persisted earlier.
    pub fn with_tabs(tabs: impl IntoIterator<Item = Tab>) -> Self {
        let store = Self::new();
        {
            let mut rows = lock(&store.tabs);
            for tab in tabs {
                rows.insert(tab.id.clone(), TabRecord::from_tab(&tab));
            }
        }
        store
    }

    /// Make every write fail with a database error until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn tab(&self, id: &str) -> Option<Tab> {
        lock(&self.tabs).get(id).cloned().map(TabRecord::into_tab)
    }

    pub fn tab_count(&self) -> usize {
        lock(&self.tabs).len()
    }

    /// History of one tab, newest first.
    pub fn history(&self, tab_id: &str) -> Vec<HistoryRecord> {
        let mut records: Vec<HistoryRecord> = lock(&self.history)
            .iter()
            .filter(|h| h.tab_id == tab_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.id.cmp(&a.id));
        records
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::DatabaseError("store is failing writes".into()));
        }
        Ok(())
    }
}

impl TabStore for MemoryStore {
    fn upsert_tab(&self, tab: &Tab) -> Result<(), StoreError> {
        self.check_writable()?;
        lock(&self.tabs).insert(tab.id.clone(), TabRecord::from_tab(tab));
        Ok(())
    }

    fn load_all_tabs(&self) -> Result<Vec<Tab>, StoreError> {
        let mut rows: Vec<TabRecord> = lock(&self.tabs).values().cloned().collect();
        rows.sort_by(|a, b| b.updated.cmp(&a.updated));
        Ok(rows.into_iter().map(TabRecord::into_tab).collect())
    }

    fn delete_tab(&self, tab_id: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        lock(&self.tabs).remove(tab_id);
        Ok(())
    }

    fn append_history(&self, tab_id: &str, content: &str) -> Result<HistoryRecord, StoreError> {
        self.check_writable()?;
        let record = HistoryRecord {
            id: self.next_history_id.fetch_add(1, Ordering::SeqCst) + 1,
            tab_id: tab_id.to_string(),
            content: content.to_string(),
            created: Utc::now(),
        };
        lock(&self.history).push(record.clone());
        Ok(record)
    }

    fn prune_history(&self, tab_id: &str, keep: usize) -> Result<u64, StoreError> {
        self.check_writable()?;
        let keep_ids: Vec<u64> = self.history(tab_id).iter().take(keep).map(|h| h.id).collect();
        let mut history = lock(&self.history);
        let before = history.len();
        history.retain(|h| h.tab_id != tab_id || keep_ids.contains(&h.id));
        Ok((before - history.len()) as u64)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
