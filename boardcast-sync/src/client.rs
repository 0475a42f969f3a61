//! WebSocket sync client.
//!
//! Keeps a local mirror of the tab map: materialised from the server's
//! `init` message, then kept current by applying every operation the server
//! fans out (the client's own operations included, since the server echoes
//! them back).

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::admission::AdmissionError;
use crate::error::SyncError;
use crate::protocol::{split_frame, MessageType, Operation, WireMessage};
use crate::tabs::{Tab, TabMap};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connection established
    Connected,
    /// Full tab list received from the server
    Initialized(Vec<Tab>),
    /// An operation fanned out by the server was applied locally
    Applied(Operation),
    /// Connection lost
    Disconnected,
}

/// The sync client.
pub struct SyncClient {
    server_url: String,
    token: String,
    state: Arc<RwLock<ConnectionState>>,
    tabs: Arc<RwLock<TabMap>>,
    outgoing_tx: Option<mpsc::Sender<String>>,
    event_tx: mpsc::Sender<SyncEvent>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
}

impl SyncClient {
    /// `server_url` is the `ws://host:port` base; the token is the session
    /// token presented on connect.
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            token: token.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            tabs: Arc::new(RwLock::new(TabMap::new())),
            outgoing_tx: None,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect and spawn the reader and writer tasks.
    ///
    /// A rejected token surfaces as [`SyncError::Admission`].
    pub async fn connect(&mut self) -> Result<(), SyncError> {
        *self.state.write().await = ConnectionState::Connecting;

        let url = format!("{}/api/ws?token={}", self.server_url, self.token);
        let ws_stream = match tokio_tungstenite::connect_async(&url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(connect_error(e));
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(SyncEvent::Connected).await;

        // Reader task: apply everything the server sends to the local mirror
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let tabs = self.tabs.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                let frame = match msg {
                    Ok(Message::Text(text)) => text.as_str().to_string(),
                    Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                for line in split_frame(&frame) {
                    if let Some(event) = apply_line(&tabs, line).await {
                        let _ = event_tx.send(event).await;
                    }
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(SyncEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Send an operation to the server.
    pub async fn send(&self, op: &Operation) -> Result<(), SyncError> {
        self.send_raw(op.encode()?).await
    }

    /// Send a text frame as-is.
    pub async fn send_raw(&self, text: impl Into<String>) -> Result<(), SyncError> {
        let tx = self
            .outgoing_tx
            .as_ref()
            .ok_or_else(|| SyncError::Transport("not connected".into()))?;
        tx.send(text.into())
            .await
            .map_err(|_| SyncError::Transport("connection closed".into()))
    }

    /// Close the connection. The reader reports [`SyncEvent::Disconnected`].
    pub fn disconnect(&mut self) {
        self.outgoing_tx = None;
    }

    /// Local mirror of the tab list.
    pub async fn tabs(&self) -> Vec<Tab> {
        self.tabs.read().await.to_vec()
    }

    pub async fn tab(&self, id: &str) -> Option<Tab> {
        self.tabs.read().await.get(id).cloned()
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }
}

async fn apply_line(tabs: &RwLock<TabMap>, line: &str) -> Option<SyncEvent> {
    let msg = match WireMessage::decode(line) {
        Ok(msg) => msg,
        Err(e) => {
            log::debug!("Ignoring server message: {e}");
            return None;
        }
    };

    if msg.message_type() == Some(MessageType::Init) {
        let list = msg.tabs.unwrap_or_default();
        *tabs.write().await = TabMap::from_tabs(list.clone());
        return Some(SyncEvent::Initialized(list));
    }

    match Operation::try_from(msg) {
        Ok(op) => {
            tabs.write().await.apply(&op);
            Some(SyncEvent::Applied(op))
        }
        Err(e) => {
            log::debug!("Ignoring server message: {e}");
            None
        }
    }
}

fn connect_error(e: tungstenite::Error) -> SyncError {
    match e {
        tungstenite::Error::Http(response) if response.status().as_u16() == 401 => {
            SyncError::Admission(AdmissionError::Invalid)
        }
        other => SyncError::Transport(other.to_string()),
    }
}
