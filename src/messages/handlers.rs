//! Command Handlers: thin adapters from validated inbound commands to the
//! Repository and to publications.
//!
//! Grounded on `api/handlers.rs`'s validate→authorize→call→reply→publish
//! shape, with the handler set replaced by the Kanban command dispatch
//! table instead of CAD document operations.

use std::time::Duration;

use serde_json::{json, Value};

use super::repository::{parent_progress, RepoError, Repository};
use super::{require_permission, require_str, DispatchError};
use crate::auth::{AuthPayload, Authenticator};
use crate::domain::connection::ConnectionId;
use crate::domain::event::PublishedEvent;
use crate::domain::permission::PermissionSet;
use crate::domain::subscription::{Channel, Filter};
use crate::domain::user::UserIdentity;
use crate::registry::ConnectionRegistry;
use crate::router::{EventSink, SubscriptionRouter};

/// Everything a handler needs, without exposing the whole server — only
/// the router interface a handler actually consumes.
pub struct HandlerContext<'a> {
    pub conn_id: ConnectionId,
    pub user: Option<UserIdentity>,
    pub permissions: PermissionSet,
    pub registry: &'a ConnectionRegistry,
    pub router: &'a SubscriptionRouter,
    pub repository: &'a dyn Repository,
    pub authenticator: &'a Authenticator,
    pub call_timeout: Duration,
    pub sink: &'a dyn EventSink,
}

impl<'a> HandlerContext<'a> {
    fn user_id(&self) -> Result<&str, DispatchError> {
        self.user.as_ref().map(|u| u.id.as_str()).ok_or(DispatchError::Unauthenticated)
    }

    async fn call<T>(&self, fut: impl std::future::Future<Output = Result<T, RepoError>>) -> Result<T, DispatchError> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(DispatchError::RepositoryTimeout),
        }
    }
}

/// Dispatch one parsed frame to its handler.
pub async fn handle(ctx: &HandlerContext<'_>, message_type: &str, payload: &Value) -> Result<Value, DispatchError> {
    match message_type {
        "auth" => auth(ctx, payload).await,
        "subscribe" => subscribe(ctx, payload),
        "unsubscribe" => unsubscribe(ctx, payload),
        "ping" => Ok(json!({ "pong": true })),
        "get_task" => get_task(ctx, payload).await,
        "update_task" => update_task(ctx, payload).await,
        "create_task" => create_task(ctx, payload).await,
        "delete_task" => delete_task(ctx, payload).await,
        "get_board" => get_board(ctx, payload).await,
        "update_board" => update_board(ctx, payload).await,
        "add_note" => add_note(ctx, payload).await,
        "assign_tag" => assign_tag(ctx, payload).await,
        "user_presence" => user_presence(ctx, payload),
        "typing_start" => typing(ctx, payload, "start"),
        "typing_stop" => typing(ctx, payload, "stop"),
        "add_dependency" => add_dependency(ctx, payload).await,
        "remove_dependency" => remove_dependency(ctx, payload).await,
        "create_subtask" => create_subtask(ctx, payload).await,
        "update_subtask" => update_subtask(ctx, payload).await,
        "delete_subtask" => delete_subtask(ctx, payload).await,
        "bulk_operation" => bulk_operation(ctx, payload).await,
        "filter_subscription" => filter_subscription(ctx, payload),
        _ => Err(DispatchError::UnknownMessageType),
    }
}

async fn auth(ctx: &HandlerContext<'_>, payload: &Value) -> Result<Value, DispatchError> {
    let auth_payload: AuthPayload = serde_json::from_value(payload.clone()).map_err(|_| DispatchError::InvalidRequest)?;
    let outcome = ctx
        .authenticator
        .authenticate(&auth_payload)
        .await
        .map_err(DispatchError::Auth)?;

    ctx.registry.update(ctx.conn_id, |conn| {
        conn.authenticate(outcome.user.clone(), outcome.permissions.clone());
    });

    Ok(json!({ "ok": true, "userId": outcome.user.id }))
}

fn subscribe(ctx: &HandlerContext<'_>, payload: &Value) -> Result<Value, DispatchError> {
    let channel_name = require_str(payload, "channel")?;
    let channel = Channel::parse(channel_name).ok_or(DispatchError::InvalidRequest)?;
    let filter = parse_filter(payload);

    let sub_id = ctx.router.subscribe(ctx.conn_id, channel, filter, &ctx.permissions)?;
    Ok(json!({ "subscriptionId": sub_id }))
}

fn unsubscribe(ctx: &HandlerContext<'_>, payload: &Value) -> Result<Value, DispatchError> {
    let sub_id_raw = require_str(payload, "subscriptionId").or_else(|_| require_str(payload, "channel"))?;
    let sub_id = uuid::Uuid::parse_str(sub_id_raw).map_err(|_| DispatchError::InvalidRequest)?;
    let removed = ctx.router.unsubscribe(sub_id);
    Ok(json!({ "removed": removed }))
}

fn filter_subscription(ctx: &HandlerContext<'_>, payload: &Value) -> Result<Value, DispatchError> {
    let channel_name = require_str(payload, "channel")?;
    let channel = Channel::parse(channel_name).ok_or(DispatchError::InvalidRequest)?;
    let filter = parse_filter(payload);
    ctx.router.set_client_filter(ctx.conn_id, channel, filter)?;
    Ok(json!({ "ok": true }))
}

fn parse_filter(payload: &Value) -> Filter {
    payload
        .get("filter")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_else(Filter::empty)
}

async fn get_task(ctx: &HandlerContext<'_>, payload: &Value) -> Result<Value, DispatchError> {
    require_permission(&ctx.permissions, "read:task")?;
    let task_id = require_str(payload, "taskId")?;
    ctx.call(ctx.repository.get_task(task_id)).await
}

async fn update_task(ctx: &HandlerContext<'_>, payload: &Value) -> Result<Value, DispatchError> {
    require_permission(&ctx.permissions, "write:task")?;
    let task_id = require_str(payload, "taskId")?;
    let updates = payload.get("updates").cloned().ok_or(DispatchError::InvalidRequest)?;
    let task = ctx.call(ctx.repository.update_task(task_id, updates.clone())).await?;

    let board_id = task.get("boardId").and_then(Value::as_str).unwrap_or_default();
    let event = PublishedEvent::task("updated", task_id, board_id, json!({ "updates": updates }));
    ctx.router.publish_task_update(task_id, board_id, &event, ctx.sink);
    Ok(task)
}

async fn create_task(ctx: &HandlerContext<'_>, payload: &Value) -> Result<Value, DispatchError> {
    require_permission(&ctx.permissions, "write:board")?;
    let title = require_str(payload, "title")?;
    let board_id = require_str(payload, "board_id").or_else(|_| require_str(payload, "boardId"))?;
    let extra = payload.clone();
    let task = ctx.call(ctx.repository.create_task(board_id, title, extra)).await?;

    let task_id = task.get("id").and_then(Value::as_str).unwrap_or_default();
    let event = PublishedEvent::task("created", task_id, board_id, json!({ "task": task }));
    ctx.router.publish_task_update(task_id, board_id, &event, ctx.sink);
    Ok(task)
}

async fn delete_task(ctx: &HandlerContext<'_>, payload: &Value) -> Result<Value, DispatchError> {
    require_permission(&ctx.permissions, "delete:task")?;
    let task_id = require_str(payload, "taskId")?;
    ctx.call(ctx.repository.delete_task(task_id)).await?;

    let event = PublishedEvent::task("deleted", task_id, "", json!({}));
    ctx.router.publish(Channel::Task, &event, ctx.sink);
    Ok(json!({ "ok": true }))
}

async fn get_board(ctx: &HandlerContext<'_>, payload: &Value) -> Result<Value, DispatchError> {
    require_permission(&ctx.permissions, "read:board")?;
    let board_id = require_str(payload, "boardId")?;
    ctx.call(ctx.repository.get_board(board_id)).await
}

async fn update_board(ctx: &HandlerContext<'_>, payload: &Value) -> Result<Value, DispatchError> {
    require_permission(&ctx.permissions, "write:board")?;
    let board_id = require_str(payload, "boardId")?;
    let updates = payload.get("updates").cloned().ok_or(DispatchError::InvalidRequest)?;
    let board = ctx.call(ctx.repository.update_board(board_id, updates.clone())).await?;

    let event = PublishedEvent::board_updated(board_id, updates);
    ctx.router.publish(Channel::Board, &event, ctx.sink);
    Ok(board)
}

async fn add_note(ctx: &HandlerContext<'_>, payload: &Value) -> Result<Value, DispatchError> {
    require_permission(&ctx.permissions, "write:task")?;
    let task_id = require_str(payload, "task_id").or_else(|_| require_str(payload, "taskId"))?;
    let content = payload.get("content").cloned().ok_or(DispatchError::InvalidRequest)?;
    let note = ctx.call(ctx.repository.create_note(task_id, content.clone())).await?;

    let board_id = note.get("boardId").and_then(Value::as_str).unwrap_or_default();
    let event = PublishedEvent::note("added", task_id, board_id, note.clone());
    ctx.router.publish_task_update(task_id, board_id, &event, ctx.sink);
    Ok(note)
}

async fn assign_tag(ctx: &HandlerContext<'_>, payload: &Value) -> Result<Value, DispatchError> {
    require_permission(&ctx.permissions, "write:task")?;
    let task_id = require_str(payload, "taskId")?;
    let tag_id = require_str(payload, "tagId")?;
    ctx.call(ctx.repository.assign_tag(task_id, tag_id)).await?;

    let board_id = payload.get("boardId").and_then(Value::as_str).unwrap_or_default();
    let event = PublishedEvent::tag_assigned(task_id, tag_id, board_id);
    ctx.router.publish_task_update(task_id, board_id, &event, ctx.sink);
    Ok(json!({ "ok": true }))
}

async fn bulk_operation(ctx: &HandlerContext<'_>, payload: &Value) -> Result<Value, DispatchError> {
    let operation = require_str(payload, "operation")?;
    let task_ids: Vec<String> = payload
        .get("taskIds")
        .and_then(Value::as_array)
        .ok_or(DispatchError::InvalidRequest)?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()
        .filter(|ids| !ids.is_empty())
        .ok_or(DispatchError::InvalidRequest)?;

    if !ctx.permissions.has("write:all") {
        for task_id in &task_ids {
            require_permission(&ctx.permissions, &format!("write:task:{task_id}"))?;
        }
    }

    let mut results = Vec::with_capacity(task_ids.len());
    for task_id in &task_ids {
        let result = match operation {
            "delete" => {
                ctx.call(ctx.repository.delete_task(task_id)).await?;
                json!({ "taskId": task_id, "deleted": true })
            }
            "update" => {
                let updates = payload.get("updates").cloned().ok_or(DispatchError::InvalidRequest)?;
                ctx.call(ctx.repository.update_task(task_id, updates)).await?
            }
            "assign_tag" => {
                let tag_id = require_str(payload, "tagId")?;
                ctx.call(ctx.repository.assign_tag(task_id, tag_id)).await?;
                json!({ "taskId": task_id, "tagId": tag_id })
            }
            _ => return Err(DispatchError::InvalidRequest),
        };
        results.push(result);
    }

    let event = PublishedEvent::new(
        "bulk:operation",
        json!({ "operation": operation, "taskIds": task_ids, "results": results }),
    );
    ctx.router.publish(Channel::Task, &event, ctx.sink);
    Ok(json!({ "operation": operation, "results": results }))
}

fn user_presence(ctx: &HandlerContext<'_>, payload: &Value) -> Result<Value, DispatchError> {
    let status = require_str(payload, "status")?;
    let user_id = ctx.user_id()?;
    let board_id = payload.get("boardId").and_then(Value::as_str);
    let task_id = payload.get("taskId").and_then(Value::as_str);

    let event = PublishedEvent::presence(user_id, status, board_id, task_id);
    ctx.router.publish(Channel::UserPresence, &event, ctx.sink);
    Ok(json!({ "ok": true }))
}

fn typing(ctx: &HandlerContext<'_>, payload: &Value, action: &str) -> Result<Value, DispatchError> {
    let user_id = ctx.user_id()?;
    let task_id = payload.get("taskId").and_then(Value::as_str);
    let board_id = payload.get("boardId").and_then(Value::as_str);
    if task_id.is_none() && board_id.is_none() {
        return Err(DispatchError::InvalidRequest);
    }

    let event = PublishedEvent::typing(action, user_id, task_id, board_id);
    ctx.router.publish(Channel::UserPresence, &event, ctx.sink);
    Ok(json!({ "ok": true }))
}

async fn add_dependency(ctx: &HandlerContext<'_>, payload: &Value) -> Result<Value, DispatchError> {
    require_permission(&ctx.permissions, "write:task")?;
    let task_id = require_str(payload, "taskId")?;
    let depends_on = require_str(payload, "dependsOnTaskId")?;
    if task_id == depends_on {
        return Err(DispatchError::DependencyAddFailed);
    }
    ctx.call(ctx.repository.add_dependency(task_id, depends_on)).await?;

    let board_id = payload.get("boardId").and_then(Value::as_str).unwrap_or_default();
    let event = PublishedEvent::dependency("added", task_id, depends_on, board_id);
    ctx.router.publish(Channel::Dependencies, &event, ctx.sink);
    Ok(json!({ "ok": true }))
}

async fn remove_dependency(ctx: &HandlerContext<'_>, payload: &Value) -> Result<Value, DispatchError> {
    require_permission(&ctx.permissions, "write:task")?;
    let task_id = require_str(payload, "taskId")?;
    let depends_on = require_str(payload, "dependsOnTaskId")?;
    ctx.call(ctx.repository.remove_dependency(task_id, depends_on)).await?;

    let board_id = payload.get("boardId").and_then(Value::as_str).unwrap_or_default();
    let event = PublishedEvent::dependency("removed", task_id, depends_on, board_id);
    ctx.router.publish(Channel::Dependencies, &event, ctx.sink);
    Ok(json!({ "ok": true }))
}

async fn publish_subtask_event(
    ctx: &HandlerContext<'_>,
    action: &str,
    parent_task_id: &str,
    board_id: &str,
    extra: Value,
) -> Result<u32, DispatchError> {
    let subtasks = ctx.call(ctx.repository.get_subtasks(parent_task_id)).await?;
    let progress = parent_progress(&subtasks);
    let event = PublishedEvent::subtask(action, parent_task_id, board_id, progress, extra);
    ctx.router.publish(Channel::Subtasks, &event, ctx.sink);
    Ok(progress)
}

async fn create_subtask(ctx: &HandlerContext<'_>, payload: &Value) -> Result<Value, DispatchError> {
    require_permission(&ctx.permissions, "write:task")?;
    let parent_task_id = require_str(payload, "parentTaskId")?;
    let title = require_str(payload, "title")?;
    let board_id = payload.get("boardId").and_then(Value::as_str).unwrap_or_default().to_string();
    let extra = payload.clone();
    let subtask = ctx.call(ctx.repository.create_subtask(parent_task_id, title, extra)).await?;

    let progress = publish_subtask_event(ctx, "created", parent_task_id, &board_id, json!({ "subtask": subtask })).await?;
    Ok(json!({ "subtask": subtask, "parentProgress": progress }))
}

async fn update_subtask(ctx: &HandlerContext<'_>, payload: &Value) -> Result<Value, DispatchError> {
    require_permission(&ctx.permissions, "write:task")?;
    let subtask_id = require_str(payload, "subtaskId")?;
    let parent_task_id = require_str(payload, "parentTaskId")?;
    let board_id = payload.get("boardId").and_then(Value::as_str).unwrap_or_default().to_string();
    let updates = payload.get("updates").cloned().ok_or(DispatchError::InvalidRequest)?;
    let subtask = ctx.call(ctx.repository.update_subtask(subtask_id, updates)).await?;

    let progress = publish_subtask_event(ctx, "updated", parent_task_id, &board_id, json!({ "subtask": subtask })).await?;
    Ok(json!({ "subtask": subtask, "parentProgress": progress }))
}

async fn delete_subtask(ctx: &HandlerContext<'_>, payload: &Value) -> Result<Value, DispatchError> {
    require_permission(&ctx.permissions, "write:task")?;
    let subtask_id = require_str(payload, "subtaskId")?;
    let parent_task_id = require_str(payload, "parentTaskId")?;
    let board_id = payload.get("boardId").and_then(Value::as_str).unwrap_or_default().to_string();
    ctx.call(ctx.repository.delete_subtask(subtask_id)).await?;

    let progress = publish_subtask_event(ctx, "deleted", parent_task_id, &board_id, json!({ "subtaskId": subtask_id })).await?;
    Ok(json!({ "ok": true, "parentProgress": progress }))
}
