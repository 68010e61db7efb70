//! ConnectionManager: the per-connection state machine, heartbeat loop, and
//! backpressure-bounded outbound queue.
//!
//! Grounded on `enterprise/collaboration/transport.rs`'s heartbeat-interval
//! task (`tokio::time::interval` + state check inside a spawned loop) and
//! `other_examples/221f80c6_..._ws-conn-manager-src-lib.rs.rs`'s bounded
//! per-connection channel idiom, reworked around the Kanban state machine
//! (`NEW -> OPEN_UNAUTH -> OPEN_AUTH -> CLOSED`) instead of a client-side
//! reconnect loop.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::connection::{Connection, ConnectionId, ConnectionState};
use crate::domain::event::PublishedEvent;
use crate::messages::OutboundReply;
use crate::ratelimit::RateLimiter;
use crate::registry::ConnectionRegistry;
use crate::router::{EventSink, SubscriptionRouter};

/// Why a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    ServerShutdown,
    RateLimit,
    AuthTimeout,
    AuthFailed,
    HeartbeatTimeout,
    ProtocolError,
    InternalError,
    SlowConsumer,
}

impl CloseCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseCode::Normal => "NORMAL",
            CloseCode::ServerShutdown => "SERVER_SHUTDOWN",
            CloseCode::RateLimit => "RATE_LIMIT",
            CloseCode::AuthTimeout => "AUTH_TIMEOUT",
            CloseCode::AuthFailed => "AUTH_FAILED",
            CloseCode::HeartbeatTimeout => "HEARTBEAT_TIMEOUT",
            CloseCode::ProtocolError => "PROTOCOL_ERROR",
            CloseCode::InternalError => "INTERNAL_ERROR",
            CloseCode::SlowConsumer => "SLOW_CONSUMER",
        }
    }
}

/// Settings the manager needs from `Config`, kept narrow so
/// tests can construct one without the whole config tree.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionManagerSettings {
    pub heartbeat_interval_ms: u64,
    pub auth_timeout_ms: u64,
    pub outbound_queue_max: usize,
    pub auth_required: bool,
}

/// Outcome of `ConnectionManager::accept`: connection admission is checked
/// before a connection ever reaches `OPEN_UNAUTH`.
pub enum Admission {
    /// Admitted: the welcome frame was sent and heartbeat/auth-timeout tasks
    /// are armed. The receiver is the transport's outbound queue.
    Admitted(ConnectionId, mpsc::Receiver<Value>),
    /// Rejected by the connection-admission rate limiter, before
    /// registration or the welcome frame.
    RateLimited,
}

/// Owns connection lifecycle, heartbeats, and outbound delivery.
///
/// Exclusively responsible for mutating `Connection.state`;
/// other components read it via `ConnectionRegistry::get`.
pub struct ConnectionManager {
    registry: Arc<ConnectionRegistry>,
    router: Arc<SubscriptionRouter>,
    rate_limiter: Arc<RateLimiter>,
    outboxes: DashMap<ConnectionId, mpsc::Sender<Value>>,
    settings: ConnectionManagerSettings,
}

impl ConnectionManager {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        router: Arc<SubscriptionRouter>,
        rate_limiter: Arc<RateLimiter>,
        settings: ConnectionManagerSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            router,
            rate_limiter,
            outboxes: DashMap::new(),
            settings,
        })
    }

    /// Accept a newly upgraded transport connection: check connection
    /// admission, register it, move it to `OPEN_UNAUTH`, send the welcome
    /// event, and arm the auth-timeout and heartbeat tasks. Returns the
    /// connection id and the receiving half of its outbound queue, which
    /// the transport's writer task drains, or `RateLimited` if the source
    /// has exceeded the connection-admission window — rejected before the
    /// welcome frame is ever sent.
    pub fn accept(self: &Arc<Self>, source_addr: impl Into<String>, user_agent: Option<String>) -> Admission {
        let source_addr = source_addr.into();
        if !self.rate_limiter.admit_connection(&source_addr) {
            warn!(%source_addr, "connection admission denied");
            return Admission::RateLimited;
        }

        let mut conn = Connection::new(source_addr, user_agent);
        conn.state = ConnectionState::OpenUnauth;
        let conn_id = conn.id;
        self.registry.add(conn);

        let (tx, rx) = mpsc::channel(self.settings.outbound_queue_max);
        self.outboxes.insert(conn_id, tx);

        self.send_frame(conn_id, welcome_frame(conn_id, self.settings.auth_required));

        if self.settings.auth_required {
            let manager = self.clone();
            let deadline = StdDuration::from_millis(self.settings.auth_timeout_ms);
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                let still_unauth = manager
                    .registry
                    .get(conn_id)
                    .map(|c| !c.is_authenticated())
                    .unwrap_or(false);
                if still_unauth {
                    manager.close(conn_id, CloseCode::AuthTimeout, "authentication not completed in time");
                }
            });
        }

        let manager = self.clone();
        tokio::spawn(async move {
            manager.heartbeat_loop(conn_id).await;
        });

        info!(%conn_id, "connection accepted");
        Admission::Admitted(conn_id, rx)
    }

    async fn heartbeat_loop(self: Arc<Self>, conn_id: ConnectionId) {
        let interval = StdDuration::from_millis(self.settings.heartbeat_interval_ms);
        let timeout = chrono::Duration::milliseconds(2 * self.settings.heartbeat_interval_ms as i64);
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; skip it

        loop {
            ticker.tick().await;
            let Some(conn) = self.registry.get(conn_id) else {
                return;
            };
            if !conn.is_open() {
                return;
            }
            if Utc::now() - conn.last_heartbeat > timeout {
                self.close(conn_id, CloseCode::HeartbeatTimeout, "no activity within heartbeat timeout");
                return;
            }
            self.send_frame(conn_id, json!({ "type": "heartbeat", "id": Uuid::new_v4().to_string(), "payload": {} }));
        }
    }

    /// Record a successful auth-message turnaround (the `auth` handler path
    /// moves the connection to `OPEN_AUTH` via `ConnectionRegistry::update`
    /// directly; this just lets callers who closed over a manager instance
    /// observe the transition for logging).
    pub fn record_authenticated(&self, conn_id: ConnectionId) {
        info!(%conn_id, "connection authenticated");
    }

    /// Deliver a reply frame for a dispatched message.
    pub fn send_reply(&self, conn_id: ConnectionId, reply: OutboundReply) -> bool {
        let payload = match reply.result {
            Ok(value) => value,
            Err(err) => json!({ "code": err.code(), "message": err.to_string() }),
        };
        self.send_frame(conn_id, json!({
            "type": "reply",
            "id": reply.id,
            "payload": payload,
            "timestamp": Utc::now().to_rfc3339(),
        }))
    }

    fn send_frame(&self, conn_id: ConnectionId, frame: Value) -> bool {
        let Some(tx) = self.outboxes.get(&conn_id).map(|e| e.clone()) else {
            return false;
        };
        match tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%conn_id, "outbound queue full, closing as slow consumer");
                let manager_registry = self.registry.clone();
                let manager_router = self.router.clone();
                let manager_rate_limiter = self.rate_limiter.clone();
                let outboxes_entry_removed = self.outboxes.remove(&conn_id).is_some();
                if outboxes_entry_removed {
                    close_sync(&manager_registry, &manager_router, &manager_rate_limiter, conn_id, CloseCode::SlowConsumer, "outbound queue full");
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Close `conn_id` with `code`, cleaning up router/rate-limit/registry
    /// state. Idempotent: a connection already removed from the registry is
 /// a no-op.
    pub fn close(&self, conn_id: ConnectionId, code: CloseCode, reason: &str) {
        self.outboxes.remove(&conn_id);
        close_sync(&self.registry, &self.router, &self.rate_limiter, conn_id, code, reason);
    }

 /// Close every live connection with `SERVER_SHUTDOWN`.
    pub fn close_all(&self, code: CloseCode, reason: &str) {
        for conn in self.registry.iter() {
            self.close(conn.id, code, reason);
        }
    }

    /// Number of connections with outbound queues still registered.
    pub fn open_count(&self) -> usize {
        self.outboxes.len()
    }
}

fn close_sync(
    registry: &ConnectionRegistry,
    router: &SubscriptionRouter,
    rate_limiter: &RateLimiter,
    conn_id: ConnectionId,
    code: CloseCode,
    reason: &str,
) {
    let Some(conn) = registry.remove(conn_id) else {
        return;
    };
    router.unsubscribe_all(conn_id);
    rate_limiter.release(&conn_id.to_string());
    let duration = Utc::now() - conn.connect_time;
    info!(%conn_id, code = code.as_str(), reason, duration_ms = duration.num_milliseconds(), "connection closed");
}

impl EventSink for ConnectionManager {
    fn enqueue(&self, conn_id: ConnectionId, event: &PublishedEvent) -> bool {
        let frame = json!({
            "type": event.event_type,
            "id": Uuid::new_v4().to_string(),
            "payload": event.payload,
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.send_frame(conn_id, frame)
    }
}

fn welcome_frame(conn_id: ConnectionId, auth_required: bool) -> Value {
    json!({
        "type": "welcome",
        "id": Uuid::new_v4().to_string(),
        "payload": {
            "connectionId": conn_id,
            "serverVersion": env!("CARGO_PKG_VERSION"),
            "protocolVersion": 1,
            "authRequired": auth_required,
        },
        "timestamp": Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::user::{Role, UserIdentity};
    use crate::ratelimit::WindowConfig;

    fn admit(manager: &Arc<ConnectionManager>, addr: &str) -> (ConnectionId, mpsc::Receiver<Value>) {
        match manager.accept(addr, None) {
            Admission::Admitted(conn_id, rx) => (conn_id, rx),
            Admission::RateLimited => panic!("expected admission"),
        }
    }

    fn manager() -> Arc<ConnectionManager> {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(SubscriptionRouter::new(registry.clone(), 50));
        let rate_limiter = Arc::new(RateLimiter::new(
            WindowConfig { window_ms: 60_000, limit: 100 },
            WindowConfig { window_ms: 60_000, limit: 100 },
        ));
        ConnectionManager::new(
            registry,
            router,
            rate_limiter,
            ConnectionManagerSettings {
                heartbeat_interval_ms: 50_000,
                auth_timeout_ms: 50_000,
                outbound_queue_max: 4,
                auth_required: true,
            },
        )
    }

    #[tokio::test]
    async fn accept_sends_welcome_and_opens_unauth() {
        let manager = manager();
        let (conn_id, mut rx) = admit(&manager, "127.0.0.1:1");

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame["type"], "welcome");

        let conn = manager.registry.get(conn_id).unwrap();
        assert_eq!(conn.state, ConnectionState::OpenUnauth);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_cleans_subscriptions() {
        let manager = manager();
        let (conn_id, _rx) = admit(&manager, "127.0.0.1:1");
        manager.registry.update(conn_id, |c| {
            c.authenticate(UserIdentity::new("u1", Role::Admin), crate::domain::permission::PermissionSet::from_iter(["subscribe:all"]));
        });
        manager
            .router
            .subscribe(conn_id, crate::domain::subscription::Channel::Board, crate::domain::subscription::Filter::empty(), &manager.registry.get(conn_id).unwrap().permissions)
            .unwrap();

        manager.close(conn_id, CloseCode::Normal, "test");
        assert!(manager.registry.get(conn_id).is_none());
        assert_eq!(manager.router.stats().total, 0);

        // second close is a no-op, not a panic
        manager.close(conn_id, CloseCode::Normal, "test again");
    }

    #[tokio::test]
    async fn enqueue_delivers_to_outbound_queue() {
        let manager = manager();
        let (conn_id, mut rx) = admit(&manager, "127.0.0.1:1");
        let _welcome = rx.recv().await.unwrap();

        let event = PublishedEvent::board_updated("B1", json!({}));
        assert!(manager.enqueue(conn_id, &event));

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame["type"], "board:updated");
    }

    #[tokio::test]
    async fn full_outbound_queue_closes_as_slow_consumer() {
        let manager = manager();
        let (conn_id, _rx) = admit(&manager, "127.0.0.1:1");
        // the welcome frame already occupies one of the 4 slots; fill the rest
        for _ in 0..4 {
            manager.send_frame(conn_id, json!({ "type": "noop", "id": "x", "payload": {} }));
        }
        assert!(manager.registry.get(conn_id).is_none());
    }

    #[tokio::test]
    async fn accept_denies_connections_over_the_source_window() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(SubscriptionRouter::new(registry.clone(), 50));
        let rate_limiter = Arc::new(RateLimiter::new(
            WindowConfig { window_ms: 60_000, limit: 2 },
            WindowConfig { window_ms: 60_000, limit: 100 },
        ));
        let manager = ConnectionManager::new(
            registry,
            router,
            rate_limiter,
            ConnectionManagerSettings {
                heartbeat_interval_ms: 50_000,
                auth_timeout_ms: 50_000,
                outbound_queue_max: 4,
                auth_required: true,
            },
        );

        assert!(matches!(manager.accept("10.0.0.1:1", None), Admission::Admitted(_, _)));
        assert!(matches!(manager.accept("10.0.0.1:1", None), Admission::Admitted(_, _)));
        assert!(matches!(manager.accept("10.0.0.1:1", None), Admission::RateLimited));
    }
}
