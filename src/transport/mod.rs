//! FrameTransport: the WebSocket upgrade and frame codec boundary. Treated
//! as an external collaborator — this module defines the trait the rest
//! of the crate depends on plus one concrete Axum-based adapter, grounded
//! on `api/mod.rs`'s `ApiServerBuilder` (`axum::serve` over a bound
//! `TcpListener`).

pub mod axum_ws;

use async_trait::async_trait;
use serde_json::Value;

use crate::connection_manager::CloseCode;

/// A single upgraded, frame-oriented connection. Implementations own the
/// underlying socket; `send`/`close`/`ping` never block on network I/O —
/// outbound sends hand frames to a bounded channel rather than writing
/// the socket inline, so a slow peer can't stall the caller.
#[async_trait]
pub trait FrameTransport: Send + Sync {
    /// Send one JSON frame. Returns `false` if the transport's outbound
    /// side is saturated (backpressure) or already closed.
    async fn send(&self, frame: Value) -> bool;

    /// Close the underlying socket with a code and human-readable reason.
    async fn close(&self, code: CloseCode, reason: &str);

    /// Send a transport-level ping.
    async fn ping(&self);

    /// Whether the peer has signaled closed (read side exhausted).
    fn is_closed(&self) -> bool;
}
