// Match server: HTTP/WebSocket front end for the session registry
// One task per control-plane connection; the registry is the only shared state

use crate::protocol::{ClientFrame, ErrorReason, ServerFrame};
use crate::relay::registry::{PeerHandle, SessionRegistry};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Shared server state handed to every connection task.
#[derive(Clone)]
pub struct RelayState {
    registry: Arc<Mutex<SessionRegistry>>,
    heartbeat: Duration,
    next_conn: Arc<AtomicU64>,
}

impl RelayState {
    pub fn new(heartbeat: Duration) -> Self {
        Self {
            registry: Arc::new(Mutex::new(SessionRegistry::new())),
            heartbeat,
            next_conn: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Number of live sessions, for diagnostics.
    pub async fn session_count(&self) -> usize {
        self.registry.lock().await.len()
    }
}

/// Build the router: one route answering a plain health probe, or upgrading
/// to the signaling WebSocket.
pub fn router(state: RelayState) -> Router {
    Router::new().route("/", get(root)).with_state(state)
}

async fn root(upgrade: Option<WebSocketUpgrade>, State(state): State<RelayState>) -> Response {
    match upgrade {
        Some(ws) => ws.on_upgrade(move |socket| handle_connection(socket, state)),
        None => "✅ Match server is running".into_response(),
    }
}

async fn handle_connection(mut socket: WebSocket, state: RelayState) {
    let conn = state.next_conn.fetch_add(1, Ordering::Relaxed);
    info!("📥 Connection {} opened", conn);

    let (tx, mut outbox_rx) = mpsc::unbounded_channel::<Message>();
    let handle = PeerHandle { conn, outbox: tx };

    let mut probe = tokio::time::interval(state.heartbeat);
    // A probe with no traffic since the previous one means the connection is
    // half-open; treat it as closed
    let mut last_probe: Option<Instant> = None;
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        handle_frame(&state, &handle, &text).await;
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Ping(_))) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(Message::Binary(_))) => {
                        last_seen = Instant::now();
                        warn!("Connection {} sent a binary frame", conn);
                        handle.send(&ServerFrame::Error {
                            message: ErrorReason::MalformedRequest,
                        });
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("Connection {} receive error: {}", conn, e);
                        break;
                    }
                }
            }
            Some(out) = outbox_rx.recv() => {
                if socket.send(out).await.is_err() {
                    break;
                }
            }
            _ = probe.tick() => {
                if let Some(probed_at) = last_probe {
                    if last_seen < probed_at {
                        warn!("💔 Connection {} missed heartbeat, closing", conn);
                        break;
                    }
                }
                last_probe = Some(Instant::now());
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    // Sole teardown point: explicit close, receive error and heartbeat
    // expiry all land here
    let removed = state.registry.lock().await.disconnect(conn);
    info!(
        "📤 Connection {} closed ({} session{} torn down)",
        conn,
        removed,
        if removed == 1 { "" } else { "s" }
    );
}

async fn handle_frame(state: &RelayState, handle: &PeerHandle, text: &str) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Connection {} sent unparseable frame: {}", handle.conn, e);
            handle.send(&ServerFrame::Error {
                message: ErrorReason::MalformedRequest,
            });
            return;
        }
    };

    let mut registry = state.registry.lock().await;
    let result = match frame {
        ClientFrame::Create => registry.create(handle.clone()).map(|_| ()),
        ClientFrame::Join { code } => registry.join(&code, handle.clone()),
        ClientFrame::Signal {
            code,
            from,
            to,
            signal,
        } => {
            debug!("📨 Relaying signal in {}: {} → {}", code, from, to);
            registry.relay(&code, from, to, signal)
        }
    };

    // Errors go to the requesting connection only, never broadcast
    if let Err(reason) = result {
        debug!("Connection {} request failed: {}", handle.conn, reason);
        handle.send(&ServerFrame::Error { message: reason });
    }
}
