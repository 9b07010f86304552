//! WebSocket endpoint tests against a real listener.
//!
//! Tests the following:
//! - Hello greeting, status replies and invalid text
//! - Pong frames from the client refreshing liveness
//! - Binary frames rejected before the socket closes
//! - Silent clients dropped by the heartbeat sweep
//! - Connection cap and origin policy at upgrade time

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{future::join_all, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};

use tether_gateway::{
    build_router, security::FixedWindowRateLimiter, spawn_sweeper, ws, ws::ServerMessage,
    AppState, GatewayConfig, LivenessTracker, MemorySessionStore,
};
use tether_vault::{KeySource, Vault, VaultKey};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct LiveGateway {
    addr: SocketAddr,
    tracker: Arc<LivenessTracker>,
    server: JoinHandle<()>,
}

impl LiveGateway {
    fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

impl Drop for LiveGateway {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn start(config: GatewayConfig) -> LiveGateway {
    let tracker = Arc::new(LivenessTracker::new());
    let state = AppState {
        rate_limiter: Arc::new(FixedWindowRateLimiter::from_config(&config)),
        ws_slots: ws::connection_slots(config.ws_max_connections),
        config: Arc::new(config),
        vault: Arc::new(Vault::new(VaultKey::from_bytes([0x11; 32]))),
        key_source: KeySource::Configured,
        active_sessions: MemorySessionStore::shared(16),
        permanent_sessions: MemorySessionStore::shared(16),
        tracker: tracker.clone(),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(state);
    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    LiveGateway {
        addr,
        tracker,
        server,
    }
}

async fn connect(gw: &LiveGateway) -> Client {
    let (client, _) = connect_async(gw.url()).await.unwrap();
    client
}

/// Next JSON message from the gateway, skipping control frames.
async fn next_server_message(client: &mut Client) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(WAIT, client.next())
            .await
            .expect("timed out waiting for a message")
            .expect("socket closed")
            .unwrap();
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

/// Read until the connection ends and report whether a close frame was seen.
async fn read_until_closed(client: &mut Client) -> bool {
    loop {
        let frame = tokio::time::timeout(WAIT, client.next())
            .await
            .expect("socket stayed open");
        match frame {
            Some(Ok(Message::Close(_))) => return true,
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return false,
        }
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn http_status(err: WsError) -> u16 {
    match err {
        WsError::Http(response) => response.status().as_u16(),
        other => panic!("expected an HTTP rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_hello_and_status() {
    let gw = start(GatewayConfig::default()).await;
    let mut client = connect(&gw).await;

    assert_eq!(
        next_server_message(&mut client).await,
        ServerMessage::Hello { connection_id: 1 }
    );

    client
        .send(Message::Text(r#"{"type":"status"}"#.to_string()))
        .await
        .unwrap();
    assert_eq!(
        next_server_message(&mut client).await,
        ServerMessage::Status {
            active_ws_connections: 1,
            active_sessions: 0,
            permanent_sessions: 0,
        }
    );

    client
        .send(Message::Text("not json".to_string()))
        .await
        .unwrap();
    assert_eq!(
        next_server_message(&mut client).await,
        ServerMessage::Error {
            message: "Invalid message".to_string()
        }
    );
    assert_eq!(gw.tracker.len(), 1);
}

#[tokio::test]
async fn test_client_pong_refreshes_liveness() {
    let gw = start(GatewayConfig::default()).await;
    let mut client = connect(&gw).await;
    next_server_message(&mut client).await;

    let first = gw.tracker.sweep();
    assert_eq!(first.pinged, 1);
    let ping = tokio::time::timeout(WAIT, client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(ping, Message::Ping(_)));

    client.send(Message::Pong(Vec::new())).await.unwrap();
    // Frames are handled in order, so the status reply means the pong landed.
    client
        .send(Message::Text(r#"{"type":"status"}"#.to_string()))
        .await
        .unwrap();
    next_server_message(&mut client).await;

    let second = gw.tracker.sweep();
    assert_eq!(second.terminated, 0);
    assert_eq!(second.pinged, 1);

    // No pong for the second ping.
    let third = gw.tracker.sweep();
    assert_eq!(third.terminated, 1);
    assert!(gw.tracker.is_empty());
    assert!(!read_until_closed(&mut client).await);
}

#[tokio::test]
async fn test_binary_frame_rejected_then_closed() {
    let gw = start(GatewayConfig::default()).await;
    let mut client = connect(&gw).await;
    next_server_message(&mut client).await;

    client.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    assert_eq!(
        next_server_message(&mut client).await,
        ServerMessage::Error {
            message: "Binary messages are not supported".to_string()
        }
    );
    read_until_closed(&mut client).await;

    let tracker = gw.tracker.clone();
    wait_until(|| tracker.is_empty()).await;
}

#[tokio::test]
async fn test_silent_client_dropped_by_sweep() {
    let config = GatewayConfig {
        ws_max_connections: 1,
        ..GatewayConfig::default()
    };
    let gw = start(config).await;
    let sweeper = spawn_sweeper(gw.tracker.clone(), Duration::from_millis(300));

    let mut client = connect(&gw).await;
    next_server_message(&mut client).await;
    assert_eq!(gw.tracker.len(), 1);

    // Stop reading: pings queue up unanswered.
    let tracker = gw.tracker.clone();
    wait_until(|| tracker.is_empty()).await;

    // Dropped without a close handshake.
    assert!(!read_until_closed(&mut client).await);

    // The slot is free again.
    let mut next = connect(&gw).await;
    assert_eq!(
        next_server_message(&mut next).await,
        ServerMessage::Hello { connection_id: 2 }
    );

    sweeper.abort();
}

#[tokio::test]
async fn test_connection_cap_returns_503() {
    let config = GatewayConfig {
        ws_max_connections: 1,
        ..GatewayConfig::default()
    };
    let gw = start(config).await;

    let mut first = connect(&gw).await;
    next_server_message(&mut first).await;

    let err = connect_async(gw.url()).await.unwrap_err();
    assert_eq!(http_status(err), 503);

    first.close(None).await.unwrap();
    let tracker = gw.tracker.clone();
    wait_until(|| tracker.is_empty()).await;

    // The permit is released right after the tracker entry.
    let reconnected = tokio::time::timeout(WAIT, async {
        loop {
            if let Ok((client, _)) = connect_async(gw.url()).await {
                return client;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(reconnected.is_ok());
}

#[tokio::test]
async fn test_simultaneous_upgrades_respect_cap() {
    let config = GatewayConfig {
        ws_max_connections: 2,
        ..GatewayConfig::default()
    };
    let gw = start(config).await;

    let attempts = join_all((0..8).map(|_| connect_async(gw.url()))).await;
    let mut accepted = Vec::new();
    let mut rejected = 0;
    for attempt in attempts {
        match attempt {
            Ok((client, _)) => accepted.push(client),
            Err(err) => {
                assert_eq!(http_status(err), 503);
                rejected += 1;
            }
        }
    }

    assert_eq!(accepted.len(), 2);
    assert_eq!(rejected, 6);
    for client in accepted.iter_mut() {
        next_server_message(client).await;
    }
    assert_eq!(gw.tracker.len(), 2);
}

#[tokio::test]
async fn test_origin_policy() {
    let gw = start(GatewayConfig::default()).await;

    let mut request = gw.url().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static("https://evil.example"));
    let err = connect_async(request).await.unwrap_err();
    assert_eq!(http_status(err), 403);
    assert!(gw.tracker.is_empty());

    let mut request = gw.url().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static("http://localhost:3000"));
    let (mut client, _) = connect_async(request).await.unwrap();
    assert!(matches!(
        next_server_message(&mut client).await,
        ServerMessage::Hello { .. }
    ));
}
