//! Persistent storage for tabs, history, snapshots and images.
//!
//! Architecture:
//! ```text
//! ┌─────────────┐   upsert/delete    ┌────────────────┐
//! │ Hub loop    │ ─────────────────► │ WorkspaceStore │
//! └─────────────┘                    │ (RocksDB)      │
//! ┌─────────────┐   append/prune     │                │
//! │ Autosave    │ ─────────────────► │                │
//! └─────────────┘                    └───────┬────────┘
//! ┌─────────────┐   list/create/get          │ column families
//! │ HTTP surface│ ─────────────────►         ▼
//! └─────────────┘        ┌────────────────────────────────────────┐
//!                        │ CF "tabs"     : id → TabRecord         │
//!                        │ CF "history"  : tab:id → LZ4 record    │
//!                        │ CF "snapshots": id → LZ4 record        │
//!                        │ CF "images"   : id → ImageRecord       │
//!                        │ CF "meta"     : id sequences           │
//!                        └────────────────────────────────────────┘
//! ```

pub mod memory;
pub mod records;
pub mod rocks;

pub use memory::MemoryStore;
pub use records::{HistoryRecord, ImageRecord, SnapshotRecord, TabRecord};
pub use rocks::{StoreConfig, WorkspaceStore};

use crate::tabs::Tab;

/// The persistence operations the hub and the autosave scheduler rely on.
///
/// Implementations must tolerate concurrent calls from both.
pub trait TabStore: Send + Sync {
    /// Insert or replace by id, refreshing the `updated` timestamp.
    fn upsert_tab(&self, tab: &Tab) -> Result<(), StoreError>;

    /// Every durable tab, most recently updated first.
    fn load_all_tabs(&self) -> Result<Vec<Tab>, StoreError>;

    /// Hard delete. History rows for the tab are retained.
    fn delete_tab(&self, tab_id: &str) -> Result<(), StoreError>;

    fn append_history(&self, tab_id: &str, content: &str) -> Result<HistoryRecord, StoreError>;

    /// Delete all but the `keep` most recent history records of a tab.
    /// Returns how many records were removed.
    fn prune_history(&self, tab_id: &str, keep: usize) -> Result<u64, StoreError>;
}

/// Storage errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Compression error: {0}")]
    CompressionError(String),
    #[error("Image of {size} bytes exceeds the {limit} byte cap")]
    ImageTooLarge { size: u64, limit: u64 },
}

impl StoreError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}
