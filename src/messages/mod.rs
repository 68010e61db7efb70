//! MessageRouter: parses inbound frames and dispatches to Command Handlers.
//!
//! Grounded on `enterprise/collaboration/protocol.rs`'s tagged-message
//! dispatch and `api/handlers.rs`'s validate→authorize→call→reply shape,
//! reworked to dispatch via a table rather than a switch scattered
//! through the codebase.

pub mod handlers;
pub mod repository;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::auth::{AuthError, Authenticator};
use crate::domain::connection::ConnectionId;
use crate::domain::permission::PermissionSet;
use crate::ratelimit::RateLimiter;
use crate::registry::ConnectionRegistry;
use crate::router::{EventSink, RouterError, SubscriptionRouter};
use repository::{RepoError, Repository};

/// Wire-level errors a dispatched message can produce.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("INVALID_MESSAGE")]
    InvalidMessage,
    #[error("RATE_LIMIT")]
    RateLimit,
    #[error("UNAUTHENTICATED")]
    Unauthenticated,
    #[error("INSUFFICIENT_PERMISSIONS")]
    InsufficientPermissions,
    #[error("INVALID_REQUEST")]
    InvalidRequest,
    #[error("SUBSCRIPTION_LIMIT")]
    SubscriptionLimit,
    #[error("UNKNOWN_MESSAGE_TYPE")]
    UnknownMessageType,
    #[error("TASK_NOT_FOUND")]
    TaskNotFound,
    #[error("BOARD_NOT_FOUND")]
    BoardNotFound,
    #[error("TASK_UPDATE_ERROR")]
    TaskUpdateError,
    #[error("DEPENDENCY_ADD_FAILED")]
    DependencyAddFailed,
    #[error("REPOSITORY_TIMEOUT")]
    RepositoryTimeout,
    #[error("INTERNAL_ERROR")]
    InternalError,
    #[error("{0}")]
    Auth(AuthError),
}

impl DispatchError {
    /// Wire error code sent back to the client.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::InvalidMessage => "INVALID_MESSAGE",
            DispatchError::RateLimit => "RATE_LIMIT",
            DispatchError::Unauthenticated => "UNAUTHENTICATED",
            DispatchError::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            DispatchError::InvalidRequest => "INVALID_REQUEST",
            DispatchError::SubscriptionLimit => "SUBSCRIPTION_LIMIT",
            DispatchError::UnknownMessageType => "UNKNOWN_MESSAGE_TYPE",
            DispatchError::TaskNotFound => "TASK_NOT_FOUND",
            DispatchError::BoardNotFound => "BOARD_NOT_FOUND",
            DispatchError::TaskUpdateError => "TASK_UPDATE_ERROR",
            DispatchError::DependencyAddFailed => "DEPENDENCY_ADD_FAILED",
            DispatchError::RepositoryTimeout => "REPOSITORY_TIMEOUT",
            DispatchError::InternalError => "INTERNAL_ERROR",
            DispatchError::Auth(err) => err.code(),
        }
    }
}

impl From<RepoError> for DispatchError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound(_) => DispatchError::TaskNotFound,
            RepoError::Cycle => DispatchError::DependencyAddFailed,
            RepoError::Failure(_) => DispatchError::TaskUpdateError,
        }
    }
}

impl From<RouterError> for DispatchError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::PermissionDenied => DispatchError::InsufficientPermissions,
            RouterError::ConnectionNotFound => DispatchError::InternalError,
            RouterError::SubscriptionLimitExceeded => DispatchError::SubscriptionLimit,
            RouterError::SubscriptionNotFound => DispatchError::InvalidRequest,
        }
    }
}

/// A parsed inbound frame.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub message_type: String,
    pub id: String,
    pub payload: Value,
}

impl InboundFrame {
    /// Parse a raw JSON frame. Missing `type` or `id` → `INVALID_MESSAGE`.
    pub fn parse(raw: &Value) -> Result<Self, DispatchError> {
        let message_type = raw
            .get("type")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(DispatchError::InvalidMessage)?
            .to_string();
        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(DispatchError::InvalidMessage)?
            .to_string();
        let payload = raw.get("payload").cloned().unwrap_or(Value::Object(Default::default()));
        Ok(Self { message_type, id, payload })
    }
}

/// A reply to a dispatched message, echoing the request id.
#[derive(Debug, Clone)]
pub struct OutboundReply {
    pub id: String,
    pub result: Result<Value, DispatchError>,
}

/// Parses inbound frames, enforces the pre-dispatch gates, and dispatches to
/// Command Handlers.
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    router: Arc<SubscriptionRouter>,
    rate_limiter: Arc<RateLimiter>,
    repository: Arc<dyn Repository>,
    authenticator: Arc<Authenticator>,
    repository_call_timeout: Duration,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        router: Arc<SubscriptionRouter>,
        rate_limiter: Arc<RateLimiter>,
        repository: Arc<dyn Repository>,
        authenticator: Arc<Authenticator>,
        repository_call_timeout: Duration,
    ) -> Self {
        Self { registry, router, rate_limiter, repository, authenticator, repository_call_timeout }
    }

    /// Handle one inbound frame for `conn_id`, returning the reply to send.
    /// `sink` is the destination for any events the handler publishes.
    pub async fn dispatch(&self, conn_id: ConnectionId, raw: &Value, sink: &dyn EventSink) -> OutboundReply {
        let frame = match InboundFrame::parse(raw) {
            Ok(frame) => frame,
            Err(err) => {
                return OutboundReply {
                    id: raw.get("id").and_then(Value::as_str).unwrap_or("").to_string(),
                    result: Err(err),
                }
            }
        };

        let result = self.dispatch_frame(conn_id, &frame, sink).await;
        if let Err(err) = &result {
            match err {
                DispatchError::InternalError => error!(%conn_id, code = err.code(), "handler failed"),
                DispatchError::Unauthenticated | DispatchError::RateLimit => {
                    warn!(%conn_id, code = err.code(), "pre-dispatch gate rejected frame")
                }
                _ => info!(%conn_id, code = err.code(), "request failed"),
            }
        }
        OutboundReply { id: frame.id, result }
    }

    async fn dispatch_frame(
        &self,
        conn_id: ConnectionId,
        frame: &InboundFrame,
        sink: &dyn EventSink,
    ) -> Result<Value, DispatchError> {
        if !self.rate_limiter.admit_message(&conn_id.to_string()) {
            return Err(DispatchError::RateLimit);
        }

        let Some(mut conn) = self.registry.get(conn_id) else {
            return Err(DispatchError::InternalError);
        };

        if frame.message_type != "auth" && !conn.is_authenticated() {
            return Err(DispatchError::Unauthenticated);
        }

        self.registry.update(conn_id, |c| c.touch_heartbeat());

        let ctx = handlers::HandlerContext {
            conn_id,
            user: conn.user.take(),
            permissions: conn.permissions.clone(),
            registry: &self.registry,
            router: &self.router,
            repository: self.repository.as_ref(),
            authenticator: &self.authenticator,
            call_timeout: self.repository_call_timeout,
            sink,
        };

        handlers::handle(&ctx, &frame.message_type, &frame.payload).await
    }
}

/// Require permission `perm` or return `INSUFFICIENT_PERMISSIONS`.
pub(crate) fn require_permission(permissions: &PermissionSet, perm: &str) -> Result<(), DispatchError> {
    if permissions.has(perm) {
        Ok(())
    } else {
        Err(DispatchError::InsufficientPermissions)
    }
}

/// Require a non-empty string field, or `INVALID_REQUEST`.
pub(crate) fn require_str<'a>(payload: &'a Value, field: &str) -> Result<&'a str, DispatchError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(DispatchError::InvalidRequest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_missing_type() {
        let raw = serde_json::json!({"id": "1", "payload": {}});
        assert_eq!(InboundFrame::parse(&raw).err(), Some(DispatchError::InvalidMessage));
    }

    #[test]
    fn parse_rejects_missing_id() {
        let raw = serde_json::json!({"type": "ping", "payload": {}});
        assert_eq!(InboundFrame::parse(&raw).err(), Some(DispatchError::InvalidMessage));
    }

    #[test]
    fn parse_defaults_missing_payload_to_empty_object() {
        let raw = serde_json::json!({"type": "ping", "id": "1"});
        let frame = InboundFrame::parse(&raw).unwrap();
        assert!(frame.payload.is_object());
    }
}
