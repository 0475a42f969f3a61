//! Bridges one WebSocket to the hub.
//!
//! Each connection runs a read pump and a write pump side by side; the first
//! one to finish decides the [`CloseReason`] and the connection is
//! unregistered.
//!
//! - Read pump: one transport frame at a time, each newline-separated JSON
//!   message submitted to the hub individually. Every received frame
//!   (keepalive responses included) resets the liveness deadline.
//! - Write pump: drains the outbound queue, coalescing whatever is already
//!   queued into a single newline-joined text frame, and pings on a fixed
//!   interval. Every write is bounded by the write timeout.

use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use uuid::Uuid;

use crate::admission::Admitted;
use crate::config::SyncConfig;
use crate::hub::{Frame, HubHandle};
use crate::protocol::split_frame;

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CloseReason {
    #[error("closed by peer")]
    ClosedByPeer,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("no traffic within the liveness deadline")]
    LivenessTimeout,
    #[error("write deadline exceeded")]
    WriteTimeout,
    #[error("outbound queue closed by hub")]
    QueueClosed,
    #[error("hub stopped")]
    HubStopped,
}

/// Run one admitted connection until it closes.
pub async fn serve<S, E>(socket: S, hub: HubHandle, config: &SyncConfig, _admitted: Admitted) -> CloseReason
where
    S: Stream<Item = Result<Message, E>> + Sink<Message, Error = E>,
    E: std::fmt::Display,
{
    let id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(config.outbound_queue_capacity.max(1));
    if hub.register(id, tx).await.is_err() {
        return CloseReason::HubStopped;
    }

    let (sink, stream) = socket.split();
    let reason = tokio::select! {
        reason = read_pump(stream, &hub, config.liveness_timeout()) => reason,
        reason = write_pump(sink, rx, config.keepalive_interval(), config.write_timeout()) => reason,
    };

    // Failure here means the hub is gone, and with it the registration.
    let _ = hub.unregister(id).await;
    log::info!("Connection {id} closed: {reason}");
    reason
}

async fn read_pump<R, E>(mut stream: R, hub: &HubHandle, liveness: Duration) -> CloseReason
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    loop {
        let message = match timeout(liveness, stream.next()).await {
            Err(_) => return CloseReason::LivenessTimeout,
            Ok(None) => return CloseReason::ClosedByPeer,
            Ok(Some(Err(e))) => return CloseReason::Transport(e.to_string()),
            Ok(Some(Ok(message))) => message,
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    log::debug!("Dropping non-UTF-8 binary frame");
                    continue;
                }
            },
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => return CloseReason::ClosedByPeer,
        };

        for line in split_frame(&text) {
            if hub.submit(line).await.is_err() {
                return CloseReason::HubStopped;
            }
        }
    }
}

async fn write_pump<W, E>(
    mut sink: W,
    mut rx: mpsc::Receiver<Frame>,
    keepalive: Duration,
    write_timeout: Duration,
) -> CloseReason
where
    W: Sink<Message, Error = E> + Unpin,
    E: std::fmt::Display,
{
    let mut ping = tokio::time::interval_at(Instant::now() + keepalive, keepalive);
    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(first) = frame else {
                    // Best effort; the connection is going away either way.
                    let _ = send(&mut sink, Message::Close(None), write_timeout).await;
                    return CloseReason::QueueClosed;
                };
                let text = coalesce(first, &mut rx);
                if let Err(reason) = send(&mut sink, Message::Text(text), write_timeout).await {
                    return reason;
                }
            }
            _ = ping.tick() => {
                if let Err(reason) = send(&mut sink, Message::Ping(Vec::new()), write_timeout).await {
                    return reason;
                }
            }
        }
    }
}

/// Join `first` with every frame already waiting in the queue.
fn coalesce(first: Frame, rx: &mut mpsc::Receiver<Frame>) -> String {
    let pending = rx.len();
    if pending == 0 {
        return first.to_string();
    }
    let mut text = String::with_capacity(first.len() * (pending + 1));
    text.push_str(&first);
    for _ in 0..pending {
        match rx.try_recv() {
            Ok(frame) => {
                text.push('\n');
                text.push_str(&frame);
            }
            Err(_) => break,
        }
    }
    text
}

async fn send<W, E>(sink: &mut W, message: Message, deadline: Duration) -> Result<(), CloseReason>
where
    W: Sink<Message, Error = E> + Unpin,
    E: std::fmt::Display,
{
    match timeout(deadline, sink.send(message)).await {
        Err(_) => Err(CloseReason::WriteTimeout),
        Ok(Err(e)) => Err(CloseReason::Transport(e.to_string())),
        Ok(Ok(())) => Ok(()),
    }
}
