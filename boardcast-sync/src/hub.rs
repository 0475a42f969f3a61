//! The hub: single writer of the tab map and owner of the live connection set.
//!
//! ```text
//!  Connection ──submit──┐
//!  Connection ──submit──┼──► mpsc ──► Hub::run ──► TabMap (write lock)
//!  Connection ─register─┘               │     └──► TabStore (sync call)
//!                                       ▼
//!                        try_send to every outbound queue
//! ```
//!
//! Events are processed one at a time to completion. Readers (autosave,
//! snapshot capture) take the shared read lock on the tab map between
//! events and never hold it across I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::protocol::{Operation, WireMessage};
use crate::storage::{StoreError, TabStore};
use crate::tabs::{Outcome, Tab, TabMap};

/// Identifies one registered connection.
pub type ConnectionId = Uuid;

/// One outbound JSON message, shared between every queue it is fanned out to.
pub type Frame = Arc<str>;

/// The live tab map, written only by the hub loop.
pub type SharedTabs = Arc<RwLock<TabMap>>;

enum HubEvent {
    Register {
        id: ConnectionId,
        outbound: mpsc::Sender<Frame>,
    },
    Unregister(ConnectionId),
    Submit(Frame),
}

/// Returned when the hub loop is no longer accepting events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Hub is not running")]
pub struct HubStopped;

/// Hub counters, read without touching the control loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub active_connections: usize,
    pub messages_accepted: u64,
    pub messages_dropped: u64,
    pub slow_consumers_dropped: u64,
    pub store_failures: u64,
}

#[derive(Default)]
struct AtomicHubStats {
    active_connections: AtomicUsize,
    messages_accepted: AtomicU64,
    messages_dropped: AtomicU64,
    slow_consumers_dropped: AtomicU64,
    store_failures: AtomicU64,
}

/// Cloneable entry point to a running hub.
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
    tabs: SharedTabs,
    stats: Arc<AtomicHubStats>,
}

impl HubHandle {
    /// Join the live set. The hub answers with an `init` frame on `outbound`.
    pub async fn register(
        &self,
        id: ConnectionId,
        outbound: mpsc::Sender<Frame>,
    ) -> Result<(), HubStopped> {
        self.send(HubEvent::Register { id, outbound }).await
    }

    /// Leave the live set. Unknown ids are ignored.
    pub async fn unregister(&self, id: ConnectionId) -> Result<(), HubStopped> {
        self.send(HubEvent::Unregister(id)).await
    }

    /// Queue one inbound JSON message for processing.
    pub async fn submit(&self, message: impl Into<Frame>) -> Result<(), HubStopped> {
        self.send(HubEvent::Submit(message.into())).await
    }

    /// Cloned tab list in map order.
    pub async fn tabs(&self) -> Vec<Tab> {
        self.tabs.read().await.to_vec()
    }

    pub fn shared_tabs(&self) -> SharedTabs {
        Arc::clone(&self.tabs)
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            active_connections: self.stats.active_connections.load(Ordering::Relaxed),
            messages_accepted: self.stats.messages_accepted.load(Ordering::Relaxed),
            messages_dropped: self.stats.messages_dropped.load(Ordering::Relaxed),
            slow_consumers_dropped: self.stats.slow_consumers_dropped.load(Ordering::Relaxed),
            store_failures: self.stats.store_failures.load(Ordering::Relaxed),
        }
    }

    async fn send(&self, event: HubEvent) -> Result<(), HubStopped> {
        self.events.send(event).await.map_err(|_| HubStopped)
    }
}

/// The control loop. Create with [`Hub::new`], then [`Hub::run`] or [`Hub::spawn`].
pub struct Hub {
    events: mpsc::Receiver<HubEvent>,
    tabs: SharedTabs,
    connections: HashMap<ConnectionId, mpsc::Sender<Frame>>,
    store: Arc<dyn TabStore>,
    stats: Arc<AtomicHubStats>,
}

impl Hub {
    /// Load the durable tab set and build the hub.
    ///
    /// An empty store gets exactly one default tab, persisted before the
    /// hub starts.
    pub fn new(
        store: Arc<dyn TabStore>,
        config: &SyncConfig,
    ) -> Result<(Hub, HubHandle), StoreError> {
        let mut tabs = store.load_all_tabs()?;
        if tabs.is_empty() {
            let tab = Tab::default_tab();
            store.upsert_tab(&tab)?;
            log::info!("Store empty, created default tab '{}'", tab.id);
            tabs.push(tab);
        } else {
            log::info!("Loaded {} tabs from store", tabs.len());
        }

        let (tx, rx) = mpsc::channel(config.event_queue_capacity.max(1));
        let tabs = Arc::new(RwLock::new(TabMap::from_tabs(tabs)));
        let stats = Arc::new(AtomicHubStats::default());

        let handle = HubHandle {
            events: tx,
            tabs: Arc::clone(&tabs),
            stats: Arc::clone(&stats),
        };
        let hub = Hub {
            events: rx,
            tabs,
            connections: HashMap::new(),
            store,
            stats,
        };
        Ok((hub, handle))
    }

    /// Run on a new task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process events until every [`HubHandle`] is dropped.
    pub async fn run(mut self) {
        log::debug!("Hub running");
        while let Some(event) = self.events.recv().await {
            match event {
                HubEvent::Register { id, outbound } => self.register(id, outbound).await,
                HubEvent::Unregister(id) => self.unregister(id),
                HubEvent::Submit(frame) => self.submit(frame).await,
            }
        }
        // Dropping the senders closes every outbound queue.
        self.connections.clear();
        self.stats.active_connections.store(0, Ordering::Relaxed);
        log::info!("Hub stopped");
    }

    async fn register(&mut self, id: ConnectionId, outbound: mpsc::Sender<Frame>) {
        let init = WireMessage::init(self.tabs.read().await.to_vec());
        let frame: Frame = match init.encode() {
            Ok(text) => text.into(),
            Err(e) => {
                log::error!("Failed to encode init for {id}: {e}");
                return;
            }
        };
        self.connections.insert(id, outbound.clone());
        self.update_connection_count();
        if outbound.try_send(frame).is_err() {
            log::warn!("Connection {id} could not take init, not registering");
            self.unregister(id);
            return;
        }
        log::info!(
            "Connection {id} registered ({} live)",
            self.connections.len()
        );
    }

    fn unregister(&mut self, id: ConnectionId) {
        let Some(outbound) = self.connections.remove(&id) else {
            return;
        };
        self.update_connection_count();
        log::info!(
            "Connection {id} unregistered ({} live)",
            self.connections.len()
        );
        // The queue closes once the last sender is gone.
        drop(outbound);
    }

    async fn submit(&mut self, frame: Frame) {
        let op = match Operation::decode(&frame) {
            Ok(op) => op,
            Err(e) => {
                log::debug!("Dropping message: {e}");
                self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let outcome = self.tabs.write().await.apply(&op);

        let persisted = match &outcome {
            Outcome::Upserted(tab) => self.store.upsert_tab(tab),
            Outcome::Removed(id) => self.store.delete_tab(id),
            Outcome::Ignored(reason) => {
                log::debug!("Ignoring {} for tab '{}': {reason:?}", op.kind(), op.tab_id());
                self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        if let Err(e) = persisted {
            log::error!("Failed to persist {} for tab '{}': {e}", op.kind(), op.tab_id());
            self.stats.store_failures.fetch_add(1, Ordering::Relaxed);
        }

        self.stats.messages_accepted.fetch_add(1, Ordering::Relaxed);
        self.broadcast(frame);
    }

    /// Forward a frame to every queue; full or closed queues lose their connection.
    fn broadcast(&mut self, frame: Frame) {
        let mut dropped = Vec::new();
        for (id, outbound) in &self.connections {
            match outbound.try_send(Arc::clone(&frame)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    log::warn!("Connection {id} is not keeping up, dropping it");
                    self.stats
                        .slow_consumers_dropped
                        .fetch_add(1, Ordering::Relaxed);
                    dropped.push(*id);
                }
                Err(TrySendError::Closed(_)) => dropped.push(*id),
            }
        }
        for id in dropped {
            self.unregister(id);
        }
    }

    fn update_connection_count(&self) {
        self.stats
            .active_connections
            .store(self.connections.len(), Ordering::Relaxed);
    }
}
