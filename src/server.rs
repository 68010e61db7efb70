//! Server: binds the transport, wires every component together, and owns
//! the accept loop's lifecycle.
//!
//! Grounded on `api/mod.rs`'s `ApiServerBuilder`: a builder that collects
//! the shared collaborators, then a `serve()` that binds a `TcpListener`
//! and hands the router to `axum::serve`. Reworked around one upgrade
//! route instead of a REST surface, plus a graceful drain its REST server
//! didn't need.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::Authenticator;
use crate::config::Config;
use crate::connection_manager::{CloseCode, ConnectionManager, ConnectionManagerSettings};
use crate::messages::repository::Repository;
use crate::messages::MessageRouter;
use crate::ratelimit::RateLimiter;
use crate::registry::ConnectionRegistry;
use crate::router::SubscriptionRouter;
use crate::transport::axum_ws::{ws_handler, WsState};

/// Collects the collaborators a running server needs and builds the bound
/// listener plus the wired-up Axum router: binds the transport, accepts
/// upgrades, and wires every other component together.
pub struct Server {
    config: Config,
    manager: Arc<ConnectionManager>,
    router: Arc<MessageRouter>,
    registry: Arc<ConnectionRegistry>,
}

impl Server {
    /// Wire every in-scope component from `config` plus the external
    /// `Repository` and `Authenticator` collaborators.
    pub fn new(config: Config, repository: Arc<dyn Repository>, authenticator: Arc<Authenticator>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let subscription_router = Arc::new(SubscriptionRouter::new(registry.clone(), config.max_subscriptions_per_connection));
        let rate_limiter = Arc::new(RateLimiter::from_settings(config.rate_limit));

        let manager = ConnectionManager::new(
            registry.clone(),
            subscription_router.clone(),
            rate_limiter.clone(),
            ConnectionManagerSettings {
                heartbeat_interval_ms: config.heartbeat_interval_ms,
                auth_timeout_ms: config.auth.auth_timeout_ms,
                outbound_queue_max: config.outbound_queue_max,
                auth_required: config.auth.auth_required,
            },
        );

        let message_router = Arc::new(MessageRouter::new(
            registry.clone(),
            subscription_router,
            rate_limiter,
            repository,
            authenticator,
            Duration::from_millis(config.repository_call_timeout_ms),
        ));

        Self { config, manager, router: message_router, registry }
    }

    fn build_router(&self) -> Router {
        let state = WsState { manager: self.manager.clone(), router: self.router.clone() };
        Router::new()
            .route(&self.config.transport.path, get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and serve until `shutdown` resolves, then drain in-flight
    /// connections: stop accepting new work, give queues up to a deadline
    /// to flush, then close the transport.
    pub async fn serve(self, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> std::io::Result<()> {
        let addr = format!("{}:{}", self.config.transport.bind_host, self.config.transport.bind_port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, path = %self.config.transport.path, "server listening");

        let router = self.build_router().into_make_service_with_connect_info::<SocketAddr>();
        let drain_deadline = Duration::from_millis(self.config.drain_deadline_ms);
        let manager = self.manager.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        drain(&manager, drain_deadline).await;
        Ok(())
    }

    /// Number of currently open connections, for health/readiness checks.
    pub fn open_count(&self) -> usize {
        self.manager.open_count()
    }

    /// The live connection registry, for health/readiness checks.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

/// Stop accepting new work and give existing sessions until `deadline` to
/// flush their outbound queues before force-closing everything with
/// `SERVER_SHUTDOWN`.
async fn drain(manager: &Arc<ConnectionManager>, deadline: Duration) {
    let poll_interval = Duration::from_millis(100);
    let mut waited = Duration::ZERO;
    while manager.open_count() > 0 && waited < deadline {
        tokio::time::sleep(poll_interval).await;
        waited += poll_interval;
    }
    manager.close_all(CloseCode::ServerShutdown, "server shutting down");
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::messages::repository::RepoError;

    struct StubRepository;

    #[async_trait]
    impl Repository for StubRepository {
        async fn get_task(&self, _task_id: &str) -> Result<Value, RepoError> {
            Ok(json!({}))
        }
        async fn update_task(&self, _task_id: &str, _updates: Value) -> Result<Value, RepoError> {
            Ok(json!({}))
        }
        async fn create_task(&self, _board_id: &str, _title: &str, _extra: Value) -> Result<Value, RepoError> {
            Ok(json!({}))
        }
        async fn delete_task(&self, _task_id: &str) -> Result<(), RepoError> {
            Ok(())
        }
        async fn get_board(&self, _board_id: &str) -> Result<Value, RepoError> {
            Ok(json!({}))
        }
        async fn update_board(&self, _board_id: &str, _updates: Value) -> Result<Value, RepoError> {
            Ok(json!({}))
        }
        async fn create_note(&self, _task_id: &str, _content: Value) -> Result<Value, RepoError> {
            Ok(json!({}))
        }
        async fn assign_tag(&self, _task_id: &str, _tag_id: &str) -> Result<(), RepoError> {
            Ok(())
        }
        async fn add_dependency(&self, _task_id: &str, _depends_on_task_id: &str) -> Result<(), RepoError> {
            Ok(())
        }
        async fn remove_dependency(&self, _task_id: &str, _depends_on_task_id: &str) -> Result<(), RepoError> {
            Ok(())
        }
        async fn get_subtasks(&self, _parent_task_id: &str) -> Result<Vec<crate::messages::repository::SubtaskSummary>, RepoError> {
            Ok(vec![])
        }
        async fn create_subtask(&self, _parent_task_id: &str, _title: &str, _extra: Value) -> Result<Value, RepoError> {
            Ok(json!({}))
        }
        async fn update_subtask(&self, _subtask_id: &str, _updates: Value) -> Result<Value, RepoError> {
            Ok(json!({}))
        }
        async fn delete_subtask(&self, _subtask_id: &str) -> Result<(), RepoError> {
            Ok(())
        }
    }

    #[test]
    fn new_wires_an_empty_registry() {
        let config = Config::default();
        let server = Server::new(config, Arc::new(StubRepository), Arc::new(Authenticator::new("secret")));
        assert_eq!(server.open_count(), 0);
        assert_eq!(server.registry().count(), 0);
    }
}
