//! Subscriptions and filters.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::connection::ConnectionId;

/// Unique identifier for a subscription, stable for the process lifetime.
pub type SubscriptionId = Uuid;

/// Topics a connection can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    /// Board-scoped events.
    Board,
    /// Task-scoped events.
    Task,
    /// User presence events.
    UserPresence,
    /// System-wide notifications.
    SystemNotifications,
    /// Board analytics events.
    BoardAnalytics,
    /// Task dependency events.
    Dependencies,
    /// Subtask events.
    Subtasks,
}

impl Channel {
    /// Parse a channel name as it appears on the wire.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "board" => Some(Channel::Board),
            "task" => Some(Channel::Task),
            "user-presence" => Some(Channel::UserPresence),
            "system-notifications" => Some(Channel::SystemNotifications),
            "board-analytics" => Some(Channel::BoardAnalytics),
            "dependencies" => Some(Channel::Dependencies),
            "subtasks" => Some(Channel::Subtasks),
            _ => None,
        }
    }

    /// The permission scope a `subscribe:<channel>` permission check uses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Board => "board",
            Channel::Task => "task",
            Channel::UserPresence => "user-presence",
            Channel::SystemNotifications => "system-notifications",
            Channel::BoardAnalytics => "board-analytics",
            Channel::Dependencies => "dependencies",
            Channel::Subtasks => "subtasks",
        }
    }

    /// All channels, for iteration (stats, presets).
    pub fn all() -> [Channel; 7] {
        [
            Channel::Board,
            Channel::Task,
            Channel::UserPresence,
            Channel::SystemNotifications,
            Channel::BoardAnalytics,
            Channel::Dependencies,
            Channel::Subtasks,
        ]
    }
}

/// An open map of `"."`-separated field paths to scalar-or-list constraints
///
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(pub HashMap<String, Value>);

impl Filter {
    /// An empty filter, which matches every event.
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    /// Resolve a `"."`-separated path against a JSON value, returning
    /// `None` for any missing intermediate key rather than panicking.
    fn resolve<'a>(event: &'a Value, path: &str) -> Option<&'a Value> {
        let mut current = event;
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

 /// Whether `event` matches this filter.
    pub fn matches(&self, event: &Value) -> bool {
        for (path, expected) in &self.0 {
            if expected.is_null() {
                continue;
            }
            let actual = Self::resolve(event, path);
            let ok = match expected {
                Value::Array(candidates) => actual
                    .map(|a| candidates.iter().any(|c| c == a))
                    .unwrap_or(false),
                other => actual.map(|a| a == other).unwrap_or(false),
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

/// A live subscription to a channel, scoped by `filter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique id.
    pub id: SubscriptionId,
    /// Owning connection.
    pub connection_id: ConnectionId,
    /// Subscribed channel.
    pub channel: Channel,
    /// Filter applied to published events on this channel.
    pub filter: Filter,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last time an event matched and was delivered, or the filter changed.
    pub last_activity: DateTime<Utc>,
}

impl Subscription {
    /// Construct a new subscription with `created_at == last_activity == now`.
    pub fn new(connection_id: ConnectionId, channel: Channel, filter: Filter) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            connection_id,
            channel,
            filter,
            created_at: now,
            last_activity: now,
        }
    }

    /// Bump `last_activity` to now.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Whether this subscription has been idle longer than `max_idle`.
    pub fn is_idle(&self, max_idle: chrono::Duration) -> bool {
        Utc::now() - self.last_activity > max_idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_filter_matches_everything() {
        let filter = Filter::empty();
        assert!(filter.matches(&json!({"boardId": "B1"})));
    }

    #[test]
    fn null_value_is_ignored() {
        let mut map = HashMap::new();
        map.insert("boardId".to_string(), Value::Null);
        let filter = Filter(map);
        assert!(filter.matches(&json!({"boardId": "B1"})));
        assert!(filter.matches(&json!({})));
    }

    #[test]
    fn scalar_requires_strict_equality() {
        let mut map = HashMap::new();
        map.insert("boardId".to_string(), json!("B1"));
        let filter = Filter(map);
        assert!(filter.matches(&json!({"boardId": "B1"})));
        assert!(!filter.matches(&json!({"boardId": "B2"})));
        assert!(!filter.matches(&json!({})));
    }

    #[test]
    fn list_requires_membership() {
        let mut map = HashMap::new();
        map.insert("priority".to_string(), json!(["high", "urgent"]));
        let filter = Filter(map);
        assert!(filter.matches(&json!({"priority": "high"})));
        assert!(!filter.matches(&json!({"priority": "low"})));
    }

    #[test]
    fn nested_path_resolution() {
        let mut map = HashMap::new();
        map.insert("task.board_id".to_string(), json!("B1"));
        let filter = Filter(map);
        assert!(filter.matches(&json!({"task": {"board_id": "B1"}})));
        assert!(!filter.matches(&json!({"task": {"board_id": "B2"}})));
        assert!(!filter.matches(&json!({"other": 1})));
    }

    #[test]
    fn channel_round_trips_through_wire_names() {
        for channel in Channel::all() {
            let parsed = Channel::parse(channel.as_str());
            assert_eq!(parsed, Some(channel));
        }
        assert_eq!(Channel::parse("not-a-channel"), None);
    }
}
