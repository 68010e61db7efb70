//! Axum-based `FrameTransport` adapter: upgrades an HTTP connection to a
//! WebSocket and bridges it to the `ConnectionManager`/`MessageRouter` pair.
//!
//! Grounded on `api/mod.rs`'s use of `axum::serve` over a bound
//! `TcpListener` for the server-binding shape, reworked around a
//! `ws_handler` upgrade instead of REST routes.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::FrameTransport;
use crate::connection_manager::{Admission, CloseCode, ConnectionManager};
use crate::domain::connection::ConnectionId;
use crate::messages::MessageRouter;

/// Shared state handed to the Axum router.
#[derive(Clone)]
pub struct WsState {
    pub manager: Arc<ConnectionManager>,
    pub router: Arc<MessageRouter>,
}

/// Wraps one Axum WebSocket's write half behind the `FrameTransport`
/// contract so the writer task's send/close/ping calls go through the same
/// seam a non-Axum transport would.
pub struct AxumFrameTransport {
    conn_id: ConnectionId,
    closed: AtomicBool,
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl AxumFrameTransport {
    fn new(conn_id: ConnectionId, sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            conn_id,
            closed: AtomicBool::new(false),
            sink: Mutex::new(sink),
        }
    }
}

#[async_trait]
impl FrameTransport for AxumFrameTransport {
    async fn send(&self, frame: Value) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame.to_string())).await.is_ok()
    }

    async fn close(&self, code: CloseCode, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut sink = self.sink.lock().await;
        let frame = CloseFrame {
            code: 1000,
            reason: format!("{}: {}", code.as_str(), reason).into(),
        };
        let _ = sink.send(Message::Close(Some(frame))).await;
        debug!(conn_id = %self.conn_id, code = code.as_str(), "transport closed");
    }

    async fn ping(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Ping(Vec::new())).await;
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Upgrade handler mounted at the configured path.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<WsState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: WsState) {
    let (conn_id, mut outbound_rx) = match state.manager.accept(addr.to_string(), None) {
        Admission::Admitted(conn_id, rx) => (conn_id, rx),
        Admission::RateLimited => {
            let (mut sink, _stream) = socket.split();
            let frame = CloseFrame {
                code: 1000,
                reason: format!("{}: connection rate limit exceeded", CloseCode::RateLimit.as_str()).into(),
            };
            let _ = sink.send(Message::Close(Some(frame))).await;
            warn!(%addr, "connection rejected by rate limiter before welcome frame");
            return;
        }
    };
    let (sink, mut stream) = socket.split();
    let transport = Arc::new(AxumFrameTransport::new(conn_id, sink));

    let writer_transport = transport.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if !writer_transport.send(frame).await {
                break;
            }
        }
    });

    while let Some(next) = stream.next().await {
        let message = match next {
            Ok(message) => message,
            Err(err) => {
                warn!(%conn_id, %err, "transport read error");
                break;
            }
        };

        match message {
            Message::Text(text) => match serde_json::from_str::<Value>(&text) {
                Ok(raw) => {
                    let reply = state.router.dispatch(conn_id, &raw, state.manager.as_ref()).await;
                    state.manager.send_reply(conn_id, reply);
                }
                Err(_) => {
                    transport.close(CloseCode::ProtocolError, "frame was not valid JSON").await;
                    break;
                }
            },
            Message::Binary(_) => {
                transport.close(CloseCode::ProtocolError, "binary frames are not supported").await;
                break;
            }
            Message::Close(_) => {
                debug!(%conn_id, "peer initiated close");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    state.manager.close(conn_id, CloseCode::Normal, "connection closed");
    transport.close(CloseCode::Normal, "connection closed").await;
    writer.abort();
}
