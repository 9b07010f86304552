use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
};
use futures::{stream::StreamExt, Sink, SinkExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::liveness::{ConnectionId, Peer};
use crate::security;

const WS_OUTBOX_CAPACITY: usize = 128;
const WS_MAX_MESSAGES_PER_MINUTE: u32 = 600;
const WS_WRITER_DRAIN: Duration = Duration::from_secs(1);

/// One permit per open socket, taken before the upgrade is accepted.
pub fn connection_slots(max_connections: usize) -> Arc<Semaphore> {
    Arc::new(Semaphore::new(max_connections.min(Semaphore::MAX_PERMITS)))
}

/// Messages a client may send.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Status,
}

/// Messages the gateway sends.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Hello {
        connection_id: ConnectionId,
    },
    Status {
        active_ws_connections: usize,
        active_sessions: usize,
        permanent_sessions: usize,
    },
    Error {
        message: String,
    },
}

fn to_ws_message(msg: &ServerMessage) -> Option<Message> {
    serde_json::to_string(msg).ok().map(Message::Text)
}

async fn send_server_message(tx: &mpsc::Sender<Message>, msg: &ServerMessage) -> bool {
    let Some(message) = to_ws_message(msg) else {
        return false;
    };
    tx.send(message).await.is_ok()
}

async fn send_error(tx: &mpsc::Sender<Message>, message: &str) {
    let _ = send_server_message(
        tx,
        &ServerMessage::Error {
            message: message.to_string(),
        },
    )
    .await;
}

/// The sweep's handle on one socket task.
struct WsPeer {
    outbox: mpsc::Sender<Message>,
    shutdown: mpsc::Sender<()>,
}

impl Peer for WsPeer {
    fn ping(&self) -> bool {
        match self.outbox.try_send(Message::Ping(Vec::new())) {
            Ok(()) => true,
            // A backed-up outbox still counts as connected; the next sweep decides.
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn terminate(&self) {
        let _ = self.shutdown.try_send(());
    }
}

/// Forward the outbox to the socket until either side closes.
///
/// The caller owns the handle and aborts it on terminate, so a write stuck on
/// an unresponsive peer cannot keep the socket open.
fn spawn_writer<S>(
    mut sink: S,
    mut outbox: mpsc::Receiver<Message>,
    shutdown: mpsc::Sender<()>,
) -> JoinHandle<()>
where
    S: Sink<Message> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(msg) = outbox.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = shutdown.try_send(());
    })
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !security::ws_origin_allowed(&state.config, origin) {
        return StatusCode::FORBIDDEN.into_response();
    }

    let Ok(slot) = state.ws_slots.clone().try_acquire_owned() else {
        warn!("rejecting websocket: connection limit reached");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let addr = connect_info.map(|ConnectInfo(addr)| addr);
    let max_bytes = state.config.ws_max_message_bytes;
    ws.max_message_size(max_bytes)
        .max_frame_size(max_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state, addr, slot))
        .into_response()
}

async fn handle_socket(
    stream: WebSocket,
    state: AppState,
    addr: Option<SocketAddr>,
    slot: OwnedSemaphorePermit,
) {
    let peer_label = addr
        .map(|a| a.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let (sender, mut receiver) = stream.split();
    let (tx, rx) = mpsc::channel::<Message>(WS_OUTBOX_CAPACITY);
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let mut writer = spawn_writer(sender, rx, shutdown_tx.clone());

    let handle = state.tracker.attach(Arc::new(WsPeer {
        outbox: tx.clone(),
        shutdown: shutdown_tx,
    }));
    info!("websocket {} connected from {}", handle.id(), peer_label);

    let _ = send_server_message(
        &tx,
        &ServerMessage::Hello {
            connection_id: handle.id(),
        },
    )
    .await;

    let mut message_window_start = Instant::now();
    let mut message_count: u32 = 0;
    let mut terminated = false;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("websocket {} terminated", handle.id());
                terminated = true;
                break;
            }
            msg = receiver.next() => {
                let Some(msg) = msg else { break; };
                let Ok(msg) = msg else { break; };

                let text = match msg {
                    Message::Pong(_) => {
                        handle.on_pong();
                        continue;
                    }
                    // Answered by the transport.
                    Message::Ping(_) => continue,
                    Message::Close(_) => break,
                    Message::Binary(_) => {
                        send_error(&tx, "Binary messages are not supported").await;
                        break;
                    }
                    Message::Text(text) => text,
                };

                let now = Instant::now();
                if now.duration_since(message_window_start) >= Duration::from_secs(60) {
                    message_window_start = now;
                    message_count = 0;
                }
                message_count = message_count.saturating_add(1);
                if message_count > WS_MAX_MESSAGES_PER_MINUTE {
                    send_error(&tx, "Rate limit exceeded").await;
                    break;
                }

                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Status) => {
                        let status = ServerMessage::Status {
                            active_ws_connections: state.tracker.len(),
                            active_sessions: state.active_sessions.len(),
                            permanent_sessions: state.permanent_sessions.len(),
                        };
                        if !send_server_message(&tx, &status).await {
                            break;
                        }
                    }
                    Err(err) => {
                        debug!("invalid message on websocket {}: {}", handle.id(), err);
                        send_error(&tx, "Invalid message").await;
                    }
                }
            }
        }
    }

    state.tracker.detach(handle.id());
    drop(tx);
    if !terminated {
        // Flush what is already queued, such as a final error.
        let _ = tokio::time::timeout(WS_WRITER_DRAIN, &mut writer).await;
    }
    writer.abort();
    drop(slot);
    info!("websocket {} disconnected ({})", handle.id(), peer_label);
}
