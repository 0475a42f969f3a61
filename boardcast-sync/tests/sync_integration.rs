//! Integration tests for end-to-end live sync.
//!
//! These tests start a real server and connect real clients,
//! verifying the full pipeline from socket to hub to store and back.

use std::sync::Arc;

use boardcast_sync::{
    router, ApiState, Hub, HubHandle, Operation, SessionTokens, SyncClient, SyncConfig, SyncError,
    SyncEvent, Tab, TabStore, StoreConfig, WorkspaceStore,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;

struct TestServer {
    url: String,
    token: String,
    hub: HubHandle,
    store: Arc<WorkspaceStore>,
    _dir: tempfile::TempDir,
}

/// Start a server on a free port backed by a fresh store.
async fn start_test_server() -> TestServer {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(WorkspaceStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap());
    let config = Arc::new(SyncConfig::default());

    let (hub, handle) = Hub::new(store.clone(), &config).unwrap();
    hub.spawn();

    let tokens = Arc::new(SessionTokens::new(config.token_ttl()));
    let token = tokens.issue();

    let app = router(ApiState {
        hub: handle.clone(),
        store: store.clone(),
        verifier: tokens,
        config,
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        url: format!("ws://127.0.0.1:{port}"),
        token,
        hub: handle,
        store,
        _dir: dir,
    }
}

async fn next_event(events: &mut mpsc::Receiver<SyncEvent>) -> SyncEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Connect a client and consume its `Connected` and `Initialized` events.
async fn join(server: &TestServer) -> (SyncClient, mpsc::Receiver<SyncEvent>, Vec<Tab>) {
    let mut client = SyncClient::new(&server.url, &server.token);
    let mut events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();

    assert_eq!(next_event(&mut events).await, SyncEvent::Connected);
    let tabs = match next_event(&mut events).await {
        SyncEvent::Initialized(tabs) => tabs,
        other => panic!("Expected Initialized, got {other:?}"),
    };
    (client, events, tabs)
}

fn create(id: &str, name: &str) -> Operation {
    Operation::Create {
        tab_id: id.into(),
        name: name.into(),
    }
}

fn update(id: &str, content: &str) -> Operation {
    Operation::Update {
        tab_id: id.into(),
        content: content.into(),
    }
}

#[tokio::test]
async fn test_two_clients_converge() {
    let server = start_test_server().await;

    let (client_a, mut events_a, init_a) = join(&server).await;
    assert_eq!(init_a, vec![Tab::default_tab()]);
    let (client_b, mut events_b, _) = join(&server).await;

    client_a.send(&create("t2", "Notes")).await.unwrap();
    assert_eq!(next_event(&mut events_b).await, SyncEvent::Applied(create("t2", "Notes")));
    assert_eq!(client_b.tab("t2").await, Some(Tab::new("t2", "Notes")));
    // The origin receives its own echo too
    assert_eq!(next_event(&mut events_a).await, SyncEvent::Applied(create("t2", "Notes")));

    client_a.send(&update("t2", "# Hi")).await.unwrap();
    next_event(&mut events_a).await;
    next_event(&mut events_b).await;

    assert_eq!(client_a.tab("t2").await.unwrap().content, "# Hi");
    assert_eq!(client_b.tab("t2").await.unwrap().content, "# Hi");
    assert_eq!(client_a.tabs().await, client_b.tabs().await);
    assert_eq!(server.store.load_all_tabs().unwrap().len(), 2);
}

#[tokio::test]
async fn test_late_joiner_gets_full_state() {
    let server = start_test_server().await;
    let (client_a, mut events_a, _) = join(&server).await;

    client_a.send(&create("t2", "Notes")).await.unwrap();
    client_a.send(&update("t2", "body")).await.unwrap();
    next_event(&mut events_a).await;
    next_event(&mut events_a).await;

    let (_client_b, _events_b, init_b) = join(&server).await;
    assert_eq!(init_b.len(), 2);
    let t2 = init_b.iter().find(|t| t.id == "t2").unwrap();
    assert_eq!(t2.content, "body");
}

#[tokio::test]
async fn test_fan_out_order_per_connection() {
    let server = start_test_server().await;
    let (client_a, _events_a, _) = join(&server).await;
    let (_client_b, mut events_b, _) = join(&server).await;

    for i in 0..20 {
        client_a.send(&update("default", &i.to_string())).await.unwrap();
    }
    for i in 0..20 {
        assert_eq!(
            next_event(&mut events_b).await,
            SyncEvent::Applied(update("default", &i.to_string()))
        );
    }
}

#[tokio::test]
async fn test_invalid_token_rejected() {
    let server = start_test_server().await;

    let mut client = SyncClient::new(&server.url, "not-a-token");
    assert!(matches!(client.connect().await, Err(SyncError::Admission(_))));

    let mut client = SyncClient::new(&server.url, "");
    assert!(matches!(client.connect().await, Err(SyncError::Admission(_))));

    assert_eq!(server.hub.stats().active_connections, 0);
}

#[tokio::test]
async fn test_malformed_message_keeps_connection_open() {
    let server = start_test_server().await;
    let (client, mut events, _) = join(&server).await;

    client.send_raw("{definitely not json").await.unwrap();
    client.send_raw(r#"{"type":"teleport","tabId":"default"}"#).await.unwrap();
    client.send(&update("default", "still here")).await.unwrap();

    assert_eq!(
        next_event(&mut events).await,
        SyncEvent::Applied(update("default", "still here"))
    );
}

#[tokio::test]
async fn test_last_tab_cannot_be_deleted() {
    let server = start_test_server().await;
    let (client, mut events, _) = join(&server).await;

    client
        .send(&Operation::Delete {
            tab_id: "default".into(),
        })
        .await
        .unwrap();
    client.send(&update("default", "survived")).await.unwrap();

    // The refused delete is never echoed; the update that follows is
    assert_eq!(
        next_event(&mut events).await,
        SyncEvent::Applied(update("default", "survived"))
    );
    assert_eq!(server.store.load_all_tabs().unwrap().len(), 1);
}

#[tokio::test]
async fn test_raw_socket_multi_message_frame() {
    let server = start_test_server().await;
    let url = format!("{}/api/ws?token={}", server.url, server.token);
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    // First frame is init
    let first = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
    assert!(first.to_text().unwrap().contains(r#""type":"init""#));

    let frame = [
        r#"{"type":"create","tabId":"a","name":"A"}"#,
        r#"{"type":"create","tabId":"b","name":"B"}"#,
    ]
    .join("\n");
    ws.send(Message::Text(frame.into())).await.unwrap();

    let mut received = Vec::new();
    while received.len() < 2 {
        let msg = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = msg {
            received.extend(text.as_str().split('\n').map(str::to_string));
        }
    }
    assert!(received[0].contains(r#""tabId":"a""#));
    assert!(received[1].contains(r#""tabId":"b""#));
    assert_eq!(server.hub.tabs().await.len(), 3);
}

#[tokio::test]
async fn test_disconnect_unregisters() {
    let server = start_test_server().await;
    let (mut client, mut events, _) = join(&server).await;
    let (_other, _other_events, _) = join(&server).await;
    assert_eq!(server.hub.stats().active_connections, 2);

    client.disconnect();
    assert_eq!(next_event(&mut events).await, SyncEvent::Disconnected);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while server.hub.stats().active_connections != 1 {
        assert!(tokio::time::Instant::now() < deadline, "connection never unregistered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
