//! Full-stack integration tests: wires `ConnectionManager` and
//! `MessageRouter` together over a fake `Repository`, the same shape
//! `Server::new` assembles, and drives them through the wire protocol.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kanban_realtime::auth::Authenticator;
use kanban_realtime::connection_manager::{Admission, ConnectionManager, ConnectionManagerSettings};
use kanban_realtime::domain::connection::ConnectionId;
use kanban_realtime::domain::permission::PermissionSet;
use kanban_realtime::domain::user::{Role, UserIdentity};
use kanban_realtime::messages::repository::{RepoError, Repository, SubtaskSummary};
use kanban_realtime::messages::MessageRouter;
use kanban_realtime::ratelimit::{RateLimiter, WindowConfig};
use kanban_realtime::registry::ConnectionRegistry;
use kanban_realtime::router::SubscriptionRouter;
use serde_json::{json, Value};
use tokio::sync::mpsc;

struct FakeRepository;

#[async_trait]
impl Repository for FakeRepository {
    async fn get_task(&self, task_id: &str) -> Result<Value, RepoError> {
        Ok(json!({ "id": task_id, "boardId": "B1" }))
    }
    async fn update_task(&self, task_id: &str, _updates: Value) -> Result<Value, RepoError> {
        Ok(json!({ "id": task_id, "boardId": "B1" }))
    }
    async fn create_task(&self, board_id: &str, title: &str, _extra: Value) -> Result<Value, RepoError> {
        Ok(json!({ "id": "T1", "title": title, "boardId": board_id }))
    }
    async fn delete_task(&self, _task_id: &str) -> Result<(), RepoError> {
        Ok(())
    }
    async fn get_board(&self, board_id: &str) -> Result<Value, RepoError> {
        Ok(json!({ "id": board_id }))
    }
    async fn update_board(&self, board_id: &str, _updates: Value) -> Result<Value, RepoError> {
        Ok(json!({ "id": board_id }))
    }
    async fn create_note(&self, task_id: &str, content: Value) -> Result<Value, RepoError> {
        Ok(json!({ "taskId": task_id, "content": content, "boardId": "B1" }))
    }
    async fn assign_tag(&self, _task_id: &str, _tag_id: &str) -> Result<(), RepoError> {
        Ok(())
    }
    async fn add_dependency(&self, task_id: &str, depends_on: &str) -> Result<(), RepoError> {
        if task_id == depends_on {
            return Err(RepoError::Cycle);
        }
        Ok(())
    }
    async fn remove_dependency(&self, _task_id: &str, _depends_on: &str) -> Result<(), RepoError> {
        Ok(())
    }
    async fn get_subtasks(&self, _parent_task_id: &str) -> Result<Vec<SubtaskSummary>, RepoError> {
        Ok(vec![
            SubtaskSummary { id: "1".into(), done: true },
            SubtaskSummary { id: "2".into(), done: false },
            SubtaskSummary { id: "3".into(), done: false },
            SubtaskSummary { id: "4".into(), done: false },
        ])
    }
    async fn create_subtask(&self, parent_task_id: &str, title: &str, _extra: Value) -> Result<Value, RepoError> {
        Ok(json!({ "id": "S1", "parentTaskId": parent_task_id, "title": title }))
    }
    async fn update_subtask(&self, subtask_id: &str, _updates: Value) -> Result<Value, RepoError> {
        Ok(json!({ "id": subtask_id }))
    }
    async fn delete_subtask(&self, _subtask_id: &str) -> Result<(), RepoError> {
        Ok(())
    }
}

struct CountingRepository {
    inner: FakeRepository,
    calls: std::sync::atomic::AtomicUsize,
}

impl CountingRepository {
    fn new() -> Self {
        Self { inner: FakeRepository, calls: std::sync::atomic::AtomicUsize::new(0) }
    }

    fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn bump(&self) {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl Repository for CountingRepository {
    async fn get_task(&self, task_id: &str) -> Result<Value, RepoError> {
        self.bump();
        self.inner.get_task(task_id).await
    }
    async fn update_task(&self, task_id: &str, updates: Value) -> Result<Value, RepoError> {
        self.bump();
        self.inner.update_task(task_id, updates).await
    }
    async fn create_task(&self, board_id: &str, title: &str, extra: Value) -> Result<Value, RepoError> {
        self.bump();
        self.inner.create_task(board_id, title, extra).await
    }
    async fn delete_task(&self, task_id: &str) -> Result<(), RepoError> {
        self.bump();
        self.inner.delete_task(task_id).await
    }
    async fn get_board(&self, board_id: &str) -> Result<Value, RepoError> {
        self.bump();
        self.inner.get_board(board_id).await
    }
    async fn update_board(&self, board_id: &str, updates: Value) -> Result<Value, RepoError> {
        self.bump();
        self.inner.update_board(board_id, updates).await
    }
    async fn create_note(&self, task_id: &str, content: Value) -> Result<Value, RepoError> {
        self.bump();
        self.inner.create_note(task_id, content).await
    }
    async fn assign_tag(&self, task_id: &str, tag_id: &str) -> Result<(), RepoError> {
        self.bump();
        self.inner.assign_tag(task_id, tag_id).await
    }
    async fn add_dependency(&self, task_id: &str, depends_on: &str) -> Result<(), RepoError> {
        self.bump();
        self.inner.add_dependency(task_id, depends_on).await
    }
    async fn remove_dependency(&self, task_id: &str, depends_on: &str) -> Result<(), RepoError> {
        self.bump();
        self.inner.remove_dependency(task_id, depends_on).await
    }
    async fn get_subtasks(&self, parent_task_id: &str) -> Result<Vec<SubtaskSummary>, RepoError> {
        self.bump();
        self.inner.get_subtasks(parent_task_id).await
    }
    async fn create_subtask(&self, parent_task_id: &str, title: &str, extra: Value) -> Result<Value, RepoError> {
        self.bump();
        self.inner.create_subtask(parent_task_id, title, extra).await
    }
    async fn update_subtask(&self, subtask_id: &str, updates: Value) -> Result<Value, RepoError> {
        self.bump();
        self.inner.update_subtask(subtask_id, updates).await
    }
    async fn delete_subtask(&self, subtask_id: &str) -> Result<(), RepoError> {
        self.bump();
        self.inner.delete_subtask(subtask_id).await
    }
}

struct Harness {
    registry: Arc<ConnectionRegistry>,
    router: Arc<SubscriptionRouter>,
    manager: Arc<ConnectionManager>,
    message_router: MessageRouter,
}

fn build_harness(
    repository: Arc<dyn Repository>,
    authenticator: Arc<Authenticator>,
    connection_manager_settings: ConnectionManagerSettings,
    connection_window: WindowConfig,
    message_window: WindowConfig,
) -> Harness {
    let registry = Arc::new(ConnectionRegistry::new());
    let subscription_router = Arc::new(SubscriptionRouter::new(registry.clone(), 50));
    let rate_limiter = Arc::new(RateLimiter::new(connection_window, message_window));

    let manager = ConnectionManager::new(
        registry.clone(),
        subscription_router.clone(),
        rate_limiter.clone(),
        connection_manager_settings,
    );

    let message_router = MessageRouter::new(
        registry.clone(),
        subscription_router.clone(),
        rate_limiter,
        repository,
        authenticator,
        Duration::from_secs(1),
    );

    Harness { registry, router: subscription_router, manager, message_router }
}

fn default_settings() -> ConnectionManagerSettings {
    ConnectionManagerSettings {
        heartbeat_interval_ms: 60_000,
        auth_timeout_ms: 60_000,
        outbound_queue_max: 16,
        auth_required: true,
    }
}

fn generous_windows() -> (WindowConfig, WindowConfig) {
    (WindowConfig { window_ms: 60_000, limit: 1000 }, WindowConfig { window_ms: 60_000, limit: 1000 })
}

async fn admit(manager: &Arc<ConnectionManager>, addr: &str) -> (ConnectionId, mpsc::Receiver<Value>) {
    match manager.accept(addr, None) {
        Admission::Admitted(conn_id, rx) => (conn_id, rx),
        Admission::RateLimited => panic!("expected admission"),
    }
}

fn bearer_auth_frame(token: &str, id: &str) -> Value {
    json!({ "type": "auth", "id": id, "payload": { "token": token } })
}

fn mint_token(secret: &str, user_id: &str, role: &str) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};
    let claims = json!({
        "userId": user_id,
        "role": role,
        "exp": (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as u64,
    });
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
}

// Scenario: auth_required connection that never authenticates is closed
// with AUTH_TIMEOUT once the deadline passes.
#[tokio::test]
async fn unauthenticated_connection_is_closed_after_auth_timeout() {
    let (connection_window, message_window) = generous_windows();
    let settings = ConnectionManagerSettings {
        heartbeat_interval_ms: 60_000,
        auth_timeout_ms: 80,
        outbound_queue_max: 16,
        auth_required: true,
    };
    let harness = build_harness(
        Arc::new(FakeRepository),
        Arc::new(Authenticator::new("secret")),
        settings,
        connection_window,
        message_window,
    );

    let (conn_id, mut rx) = admit(&harness.manager, "127.0.0.1:1").await;
    let welcome = rx.recv().await.unwrap();
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["payload"]["authRequired"], true);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!harness.registry.contains(conn_id));
}

// Scenario: two authenticated clients subscribe to the same channel with
// different filters; a publish matching only one filter reaches only that
// subscriber.
#[tokio::test]
async fn filters_isolate_published_events_between_subscribers() {
    let (connection_window, message_window) = generous_windows();
    let secret = "secret";
    let mut authenticator = Authenticator::new(secret);
    authenticator.register_api_key(
        "key-a",
        UserIdentity::new("alice", Role::Admin),
        PermissionSet::from_iter(["subscribe:all", "write:task"]),
    );
    authenticator.register_api_key(
        "key-b",
        UserIdentity::new("bob", Role::Admin),
        PermissionSet::from_iter(["subscribe:all", "write:task"]),
    );
    let harness = build_harness(
        Arc::new(FakeRepository),
        Arc::new(authenticator),
        default_settings(),
        connection_window,
        message_window,
    );

    let (conn_a, mut rx_a) = admit(&harness.manager, "10.0.0.1:1").await;
    let _welcome_a = rx_a.recv().await.unwrap();
    let (conn_b, mut rx_b) = admit(&harness.manager, "10.0.0.2:1").await;
    let _welcome_b = rx_b.recv().await.unwrap();

    let auth_a = json!({ "type": "auth", "id": "1", "payload": { "apiKey": "key-a" } });
    let reply = harness.message_router.dispatch(conn_a, &auth_a, harness.manager.as_ref()).await;
    assert!(reply.result.is_ok());
    let auth_b = json!({ "type": "auth", "id": "1", "payload": { "apiKey": "key-b" } });
    let reply = harness.message_router.dispatch(conn_b, &auth_b, harness.manager.as_ref()).await;
    assert!(reply.result.is_ok());

    let sub_a = json!({ "type": "subscribe", "id": "2", "payload": { "channel": "task", "filter": { "boardId": "B1" } } });
    let reply_a = harness.message_router.dispatch(conn_a, &sub_a, harness.manager.as_ref()).await;
    assert!(reply_a.result.is_ok());

    let sub_b = json!({ "type": "subscribe", "id": "2", "payload": { "channel": "task", "filter": { "boardId": "B2" } } });
    let reply_b = harness.message_router.dispatch(conn_b, &sub_b, harness.manager.as_ref()).await;
    assert!(reply_b.result.is_ok());

    let update = json!({ "type": "update_task", "id": "3", "payload": { "taskId": "T9", "updates": { "title": "new" } } });
    let reply = harness.message_router.dispatch(conn_a, &update, harness.manager.as_ref()).await;
    assert!(reply.result.is_ok());

    let delivered_to_a = tokio::time::timeout(Duration::from_millis(200), rx_a.recv()).await;
    assert!(delivered_to_a.is_ok(), "subscriber matching the filter should receive the publication");

    let delivered_to_b = tokio::time::timeout(Duration::from_millis(100), rx_b.recv()).await;
    assert!(delivered_to_b.is_err(), "subscriber on a different board should receive nothing");
}

// Scenario: a user-role identity without write:task permission is denied
// before the repository is ever consulted.
#[tokio::test]
async fn insufficient_permissions_short_circuits_before_repository_call() {
    let (connection_window, message_window) = generous_windows();
    let secret = "secret";
    let mut authenticator = Authenticator::new(secret);
    authenticator.register_api_key(
        "key-user",
        UserIdentity::new("carol", Role::User),
        PermissionSet::from_iter(["write:assigned"]),
    );
    let repository = Arc::new(CountingRepository::new());
    let harness = build_harness(
        repository.clone(),
        Arc::new(authenticator),
        default_settings(),
        connection_window,
        message_window,
    );

    let (conn_id, mut rx) = admit(&harness.manager, "10.0.0.3:1").await;
    let _welcome = rx.recv().await.unwrap();

    let auth = json!({ "type": "auth", "id": "1", "payload": { "apiKey": "key-user" } });
    let reply = harness.message_router.dispatch(conn_id, &auth, harness.manager.as_ref()).await;
    assert!(reply.result.is_ok());

    let update = json!({ "type": "update_task", "id": "2", "payload": { "taskId": "T9", "updates": { "title": "x" } } });
    let reply = harness.message_router.dispatch(conn_id, &update, harness.manager.as_ref()).await;
    assert_eq!(reply.result.err().map(|e| e.code().to_string()), Some("INSUFFICIENT_PERMISSIONS".to_string()));
    assert_eq!(repository.call_count(), 0);
}

// Scenario: a source opened beyond its connection-admission window is
// rejected before it ever gets registered or sent a welcome frame.
#[tokio::test]
async fn fourth_connection_from_same_source_is_rate_limited() {
    let registry = Arc::new(ConnectionRegistry::new());
    let subscription_router = Arc::new(SubscriptionRouter::new(registry.clone(), 50));
    let rate_limiter = Arc::new(RateLimiter::new(
        WindowConfig { window_ms: 60_000, limit: 3 },
        WindowConfig { window_ms: 60_000, limit: 1000 },
    ));
    let manager = ConnectionManager::new(registry, subscription_router, rate_limiter, default_settings());

    for _ in 0..3 {
        assert!(matches!(manager.accept("198.51.100.9:1", None), Admission::Admitted(_, _)));
    }
    assert!(matches!(manager.accept("198.51.100.9:1", None), Admission::RateLimited));
}

// Scenario: add_dependency that would create a cycle is rejected with
// DEPENDENCY_ADD_FAILED and nothing is published.
#[tokio::test]
async fn cyclic_dependency_is_rejected_without_publishing() {
    let (connection_window, message_window) = generous_windows();
    let secret = "secret";
    let mut authenticator = Authenticator::new(secret);
    authenticator.register_api_key(
        "key-a",
        UserIdentity::new("alice", Role::Admin),
        PermissionSet::from_iter(["write:task", "subscribe:all"]),
    );
    let harness = build_harness(
        Arc::new(FakeRepository),
        Arc::new(authenticator),
        default_settings(),
        connection_window,
        message_window,
    );

    let (conn_id, mut rx) = admit(&harness.manager, "10.0.0.4:1").await;
    let _welcome = rx.recv().await.unwrap();
    let auth = json!({ "type": "auth", "id": "1", "payload": { "apiKey": "key-a" } });
    harness.message_router.dispatch(conn_id, &auth, harness.manager.as_ref()).await;

    let sub = json!({ "type": "subscribe", "id": "2", "payload": { "channel": "dependencies" } });
    harness.message_router.dispatch(conn_id, &sub, harness.manager.as_ref()).await;

    let add_dep = json!({ "type": "add_dependency", "id": "3", "payload": { "taskId": "T1", "dependsOnTaskId": "T1" } });
    let reply = harness.message_router.dispatch(conn_id, &add_dep, harness.manager.as_ref()).await;
    assert_eq!(reply.result.err().map(|e| e.code().to_string()), Some("DEPENDENCY_ADD_FAILED".to_string()));

    let published = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(published.is_err(), "a rejected dependency must not publish an event");
}

// Boundary: a frame missing `type` or `id` is rejected as INVALID_MESSAGE
// without touching connection or dispatch state.
#[tokio::test]
async fn malformed_frame_is_rejected_as_invalid_message() {
    let (connection_window, message_window) = generous_windows();
    let harness = build_harness(
        Arc::new(FakeRepository),
        Arc::new(Authenticator::new("secret")),
        default_settings(),
        connection_window,
        message_window,
    );

    let (conn_id, mut rx) = admit(&harness.manager, "10.0.0.5:1").await;
    let _welcome = rx.recv().await.unwrap();

    let missing_type = json!({ "id": "1", "payload": {} });
    let reply = harness.message_router.dispatch(conn_id, &missing_type, harness.manager.as_ref()).await;
    assert_eq!(reply.result.err().map(|e| e.code().to_string()), Some("INVALID_MESSAGE".to_string()));

    let missing_id = json!({ "type": "ping", "payload": {} });
    let reply = harness.message_router.dispatch(conn_id, &missing_id, harness.manager.as_ref()).await;
    assert_eq!(reply.result.err().map(|e| e.code().to_string()), Some("INVALID_MESSAGE".to_string()));
}

// Round-trip: subscribing then unsubscribing restores the router's prior
// subscription counts.
#[tokio::test]
async fn subscribe_then_unsubscribe_restores_prior_stats() {
    let (connection_window, message_window) = generous_windows();
    let secret = "secret";
    let mut authenticator = Authenticator::new(secret);
    authenticator.register_api_key(
        "key-a",
        UserIdentity::new("alice", Role::Admin),
        PermissionSet::from_iter(["subscribe:all"]),
    );
    let harness = build_harness(
        Arc::new(FakeRepository),
        Arc::new(authenticator),
        default_settings(),
        connection_window,
        message_window,
    );

    let (conn_id, mut rx) = admit(&harness.manager, "10.0.0.6:1").await;
    let _welcome = rx.recv().await.unwrap();
    let auth = json!({ "type": "auth", "id": "1", "payload": { "apiKey": "key-a" } });
    harness.message_router.dispatch(conn_id, &auth, harness.manager.as_ref()).await;

    let before = harness.router.stats().total;

    let sub = json!({ "type": "subscribe", "id": "2", "payload": { "channel": "board" } });
    let reply = harness.message_router.dispatch(conn_id, &sub, harness.manager.as_ref()).await;
    let sub_id = reply.result.unwrap()["subscriptionId"].as_str().unwrap().to_string();
    assert_eq!(harness.router.stats().total, before + 1);

    let unsub = json!({ "type": "unsubscribe", "id": "3", "payload": { "subscriptionId": sub_id } });
    harness.message_router.dispatch(conn_id, &unsub, harness.manager.as_ref()).await;
    assert_eq!(harness.router.stats().total, before);
}

// Idempotence: authenticating twice with the same token does not duplicate
// permissions or otherwise change the outcome of the second call.
#[tokio::test]
async fn double_authenticate_is_idempotent() {
    let (connection_window, message_window) = generous_windows();
    let secret = "secret";
    let authenticator = Authenticator::new(secret);
    let token = mint_token(secret, "dave", "admin");
    let harness = build_harness(
        Arc::new(FakeRepository),
        Arc::new(authenticator),
        default_settings(),
        connection_window,
        message_window,
    );

    let (conn_id, mut rx) = admit(&harness.manager, "10.0.0.7:1").await;
    let _welcome = rx.recv().await.unwrap();

    let first = harness.message_router.dispatch(conn_id, &bearer_auth_frame(&token, "1"), harness.manager.as_ref()).await;
    assert!(first.result.is_ok());
    let second = harness.message_router.dispatch(conn_id, &bearer_auth_frame(&token, "2"), harness.manager.as_ref()).await;
    assert!(second.result.is_ok());
    assert_eq!(first.result.unwrap(), second.result.unwrap());
}
