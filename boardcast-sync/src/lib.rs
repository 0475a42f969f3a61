//! # boardcast-sync: Real-time sync core for a multi-tab text workspace
//!
//! Every connected session sees the same set of named text tabs. Edits are
//! sent as JSON operations over a WebSocket, applied by a single-writer hub
//! and fanned out to every session.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌──────────────┐
//! │ SyncClient  │ ◄────────────────► │ connection   │  read/write pumps,
//! │ (per user)  │   JSON, \n-joined  │ (per socket) │  keepalive, liveness
//! └─────────────┘                    └──────┬───────┘
//!                                           │ mpsc
//!                                           ▼
//!                                    ┌──────────────┐      ┌──────────────┐
//!                                    │ Hub          │ ───► │ TabStore     │
//!                                    │ (one writer) │      │ (RocksDB)    │
//!                                    └──────┬───────┘      └──────▲───────┘
//!                                           │ read lock           │
//!                                    ┌──────┴───────┐             │
//!                                    │ Autosave     │ ────────────┘
//!                                    │ (history)    │
//!                                    └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire messages and validated operations
//! - [`tabs`]: Tab values and the ordered tab map
//! - [`hub`]: Serialized control loop with fan-out
//! - [`connection`]: WebSocket adapter with coalesced writes
//! - [`storage`]: Durable tabs, history, snapshots and images
//! - [`autosave`]: Periodic history capture and pruning
//! - [`admission`]: Session token verification
//! - [`api`]: axum routes for live sync, history, snapshots and images
//! - [`client`]: WebSocket sync client

pub mod admission;
pub mod api;
pub mod autosave;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod storage;
pub mod tabs;

// Re-exports for convenience
pub use admission::{admit, AdmissionError, Admitted, SessionTokens, TokenVerifier, Verification};
pub use api::{router, ApiState, UploadResponse};
pub use autosave::{Autosave, TickReport};
pub use client::{ConnectionState, SyncClient, SyncEvent};
pub use config::SyncConfig;
pub use connection::CloseReason;
pub use error::{Result, SyncError, ValidationError};
pub use hub::{ConnectionId, Frame, Hub, HubHandle, HubStats, HubStopped, SharedTabs};
pub use protocol::{MessageType, Operation, ProtocolError, WireMessage};
pub use storage::{
    HistoryRecord, ImageRecord, MemoryStore, SnapshotRecord, StoreConfig, StoreError, TabRecord,
    TabStore, WorkspaceStore,
};
pub use tabs::{Ignored, Outcome, Tab, TabMap};
