//! Published event payloads.
//!
//! Events are tagged JSON records. Rather than a closed Rust enum per event
//! (which would force every new event shape to touch this file and the
//! wire-level dispatch at once), `PublishedEvent` pairs a wire `event_type`
//! string with a `serde_json::Value` body, the same way the router's filter
//! matching (`domain::subscription::Filter`) operates on `Value` paths —
//! keeping filter/event handling generic rather than a switch over a
//! closed set of payload structs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::subscription::Channel;

/// An event ready to be routed to matching subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedEvent {
    /// Wire event type, e.g. `"task:updated"`.
    pub event_type: String,
    /// Event body, matched against subscription filters by field path.
    pub payload: Value,
}

impl PublishedEvent {
    /// Construct an event.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// Build a `task:{created,updated,deleted,moved}` event.
    pub fn task(action: &str, task_id: &str, board_id: &str, extra: Value) -> Self {
        let mut payload = extra;
        if let Value::Object(map) = &mut payload {
            map.insert("taskId".to_string(), Value::String(task_id.to_string()));
            map.insert("boardId".to_string(), Value::String(board_id.to_string()));
        }
        Self::new(format!("task:{action}"), payload)
    }

    /// Build a `board:updated` event.
    pub fn board_updated(board_id: &str, changes: Value) -> Self {
        Self::new(
            "board:updated",
            serde_json::json!({ "boardId": board_id, "changes": changes }),
        )
    }

    /// Build a `note:{added,updated}` event.
    pub fn note(action: &str, task_id: &str, board_id: &str, note: Value) -> Self {
        Self::new(
            format!("note:{action}"),
            serde_json::json!({ "note": note, "taskId": task_id, "boardId": board_id }),
        )
    }

    /// Build a `tag:assigned` event.
    pub fn tag_assigned(task_id: &str, tag_id: &str, board_id: &str) -> Self {
        Self::new(
            "tag:assigned",
            serde_json::json!({ "taskId": task_id, "tagId": tag_id, "boardId": board_id }),
        )
    }

    /// Build a `user:presence` event.
    pub fn presence(user_id: &str, status: &str, board_id: Option<&str>, task_id: Option<&str>) -> Self {
        Self::new(
            "user:presence",
            serde_json::json!({ "userId": user_id, "status": status, "boardId": board_id, "taskId": task_id }),
        )
    }

    /// Build a `typing:{start,stop}` event.
    pub fn typing(action: &str, user_id: &str, task_id: Option<&str>, board_id: Option<&str>) -> Self {
        Self::new(
            format!("typing:{action}"),
            serde_json::json!({ "userId": user_id, "taskId": task_id, "boardId": board_id }),
        )
    }

    /// Build a `system:notification` event.
    pub fn system_notification(kind: &str, title: &str, message: &str) -> Self {
        Self::new(
            "system:notification",
            serde_json::json!({ "type": kind, "title": title, "message": message }),
        )
    }

    /// Build a `dependency:{added,removed,blocked}` event.
    pub fn dependency(action: &str, task_id: &str, depends_on_task_id: &str, board_id: &str) -> Self {
        Self::new(
            format!("dependency:{action}"),
            serde_json::json!({
                "taskId": task_id,
                "dependsOnTaskId": depends_on_task_id,
                "boardId": board_id,
            }),
        )
    }

    /// Build a `subtask:{created,updated,deleted,completed}` event, with the
 /// parent-progress rule already folded in.
    pub fn subtask(action: &str, parent_task_id: &str, board_id: &str, parent_progress: u32, extra: Value) -> Self {
        let mut payload = extra;
        if let Value::Object(map) = &mut payload {
            map.insert("parentTaskId".to_string(), Value::String(parent_task_id.to_string()));
            map.insert("boardId".to_string(), Value::String(board_id.to_string()));
            map.insert("parentProgress".to_string(), Value::Number(parent_progress.into()));
        }
        Self::new(format!("subtask:{action}"), payload)
    }

    /// Default channel to publish this event type on, when the caller
    /// doesn't need the dual-channel `publish_task_update` fan-out.
    pub fn default_channel(&self) -> Option<Channel> {
        let (prefix, _) = self.event_type.split_once(':')?;
        match prefix {
            "task" => Some(Channel::Task),
            "board" => Some(Channel::Board),
            "note" => Some(Channel::Task),
            "tag" => Some(Channel::Task),
            "user" => Some(Channel::UserPresence),
            "typing" => Some(Channel::UserPresence),
            "system" => Some(Channel::SystemNotifications),
            "dependency" => Some(Channel::Dependencies),
            "subtask" => Some(Channel::Subtasks),
            "priority" => Some(Channel::Task),
            "bulk" => Some(Channel::Task),
            "connection" => Some(Channel::SystemNotifications),
            _ => None,
        }
    }
}
