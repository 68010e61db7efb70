//! SubscriptionRouter: maps `(channel, filter)` pairs to connections and
//! fans out published events.
//!
//! Grounded on `other_examples/..._subscription-registry.rs.rs`'s
//! `SubscriptionRegistry` — a `DashMap` of subscription state plus a
//! `DashMap` of connection → subscription-ids for O(1) disconnect cleanup —
//! extended with a third by-channel index, since fan-out here is
//! channel-keyed rather than broadcast-to-all.

use std::collections::{HashMap, HashSet};

use chrono::Duration;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::connection::ConnectionId;
use crate::domain::event::PublishedEvent;
use crate::domain::permission::PermissionSet;
use crate::domain::subscription::{Channel, Filter, Subscription, SubscriptionId};
use crate::registry::ConnectionRegistry;

/// Errors raised by `SubscriptionRouter::subscribe` and friends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("connection not found")]
    ConnectionNotFound,
    #[error("permission denied for channel")]
    PermissionDenied,
    #[error("subscription limit exceeded")]
    SubscriptionLimitExceeded,
    #[error("subscription not found")]
    SubscriptionNotFound,
}

/// Delivers an event to a connection's outbound queue. Implemented by the
/// `ConnectionManager`; kept as a trait here so the router stays ignorant of
/// transport/backpressure mechanics.
pub trait EventSink: Send + Sync {
    /// Attempt to enqueue `event` for `conn_id`. Returns whether it was
    /// accepted (false on backpressure or if the connection vanished).
    fn enqueue(&self, conn_id: ConnectionId, event: &PublishedEvent) -> bool;
}

/// Per-channel and total subscription counts.
#[derive(Debug, Clone, Default)]
pub struct RouterStats {
    pub total: usize,
    pub per_channel: HashMap<Channel, usize>,
}

/// Maps `(channel, filter)` subscriptions to connections and fans out
/// published events.
pub struct SubscriptionRouter {
    by_id: DashMap<SubscriptionId, Subscription>,
    by_connection: DashMap<ConnectionId, HashSet<SubscriptionId>>,
    by_channel: DashMap<Channel, HashSet<SubscriptionId>>,
    registry: std::sync::Arc<ConnectionRegistry>,
    max_subscriptions_per_connection: usize,
}

impl SubscriptionRouter {
    pub fn new(registry: std::sync::Arc<ConnectionRegistry>, max_subscriptions_per_connection: usize) -> Self {
        Self {
            by_id: DashMap::new(),
            by_connection: DashMap::new(),
            by_channel: DashMap::new(),
            registry,
            max_subscriptions_per_connection,
        }
    }

    /// Subscribe `conn_id` to `channel` filtered by `filter`.
    pub fn subscribe(
        &self,
        conn_id: ConnectionId,
        channel: Channel,
        filter: Filter,
        permissions: &PermissionSet,
    ) -> Result<SubscriptionId, RouterError> {
        if !self.registry.contains(conn_id) {
            return Err(RouterError::ConnectionNotFound);
        }
        let required = format!("subscribe:{}", channel.as_str());
        if !permissions.has(&required) {
            return Err(RouterError::PermissionDenied);
        }
        let current_count = self
            .by_connection
            .get(&conn_id)
            .map(|set| set.len())
            .unwrap_or(0);
        if current_count >= self.max_subscriptions_per_connection {
            return Err(RouterError::SubscriptionLimitExceeded);
        }

        let subscription = Subscription::new(conn_id, channel, filter);
        let sub_id = subscription.id;

        self.by_id.insert(sub_id, subscription);
        self.by_connection.entry(conn_id).or_default().insert(sub_id);
        self.by_channel.entry(channel).or_default().insert(sub_id);

        self.registry.update(conn_id, |conn| {
            conn.subscriptions.insert(sub_id);
        });

        debug!(%sub_id, %conn_id, channel = channel.as_str(), "subscribed");
        Ok(sub_id)
    }

    /// Remove a single subscription.
    pub fn unsubscribe(&self, sub_id: SubscriptionId) -> bool {
        let Some((_, subscription)) = self.by_id.remove(&sub_id) else {
            return false;
        };
        self.deindex(&subscription);
        true
    }

    /// Remove every subscription owned by `conn_id`, returning the count
    /// removed.
    pub fn unsubscribe_all(&self, conn_id: ConnectionId) -> usize {
        let Some((_, sub_ids)) = self.by_connection.remove(&conn_id) else {
            return 0;
        };
        let count = sub_ids.len();
        for sub_id in sub_ids {
            if let Some((_, subscription)) = self.by_id.remove(&sub_id) {
                if let Some(mut set) = self.by_channel.get_mut(&subscription.channel) {
                    set.remove(&sub_id);
                }
            }
        }
        count
    }

    fn deindex(&self, subscription: &Subscription) {
        if let Some(mut set) = self.by_connection.get_mut(&subscription.connection_id) {
            set.remove(&subscription.id);
        }
        if let Some(mut set) = self.by_channel.get_mut(&subscription.channel) {
            set.remove(&subscription.id);
        }
        self.registry.update(subscription.connection_id, |conn| {
            conn.subscriptions.remove(&subscription.id);
        });
    }

    /// Merge `filter` into `conn_id`'s subscription(s) on `channel`: new keys
    /// augment the existing filter, keys already present are replaced.
    pub fn set_client_filter(&self, conn_id: ConnectionId, channel: Channel, filter: Filter) -> Result<(), RouterError> {
        let sub_ids = self.by_connection.get(&conn_id).map(|set| set.clone()).unwrap_or_default();
        let mut updated = false;
        for sub_id in sub_ids {
            if let Some(mut entry) = self.by_id.get_mut(&sub_id) {
                if entry.channel == channel {
                    entry.filter.0.extend(filter.0.clone());
                    entry.touch();
                    updated = true;
                }
            }
        }
        if updated {
            Ok(())
        } else {
            Err(RouterError::SubscriptionNotFound)
        }
    }

    /// Fan out `event` to every matching subscription on `channel`.
    pub fn publish(&self, channel: Channel, event: &PublishedEvent, sink: &dyn EventSink) -> usize {
        self.publish_with_predicate(channel, event, sink, None)
    }

    /// Same as `publish`, with an additional publisher-supplied predicate
    /// (step 4) evaluated against the event payload.
    pub fn publish_with_predicate(
        &self,
        channel: Channel,
        event: &PublishedEvent,
        sink: &dyn EventSink,
        predicate: Option<&dyn Fn(&serde_json::Value) -> bool>,
    ) -> usize {
        let Some(sub_ids) = self.by_channel.get(&channel).map(|set| set.clone()) else {
            return 0;
        };
        if sub_ids.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        let mut stale = Vec::new();

        for sub_id in sub_ids {
            let Some(subscription) = self.by_id.get(&sub_id).map(|e| e.value().clone()) else {
                continue;
            };

            let Some(conn) = self.registry.get(subscription.connection_id) else {
                stale.push(sub_id);
                continue;
            };
            if !conn.is_open() {
                stale.push(sub_id);
                continue;
            }

            if !subscription.filter.matches(&event.payload) {
                continue;
            }
            if let Some(pred) = predicate {
                if !pred(&event.payload) {
                    continue;
                }
            }

            if sink.enqueue(subscription.connection_id, event) {
                delivered += 1;
                if let Some(mut entry) = self.by_id.get_mut(&sub_id) {
                    entry.touch();
                }
            }
        }

        for sub_id in stale {
            if let Some((_, subscription)) = self.by_id.remove(&sub_id) {
                warn!(%sub_id, "garbage-collecting subscription for stale connection");
                self.deindex(&subscription);
            }
        }

        delivered
    }

    /// Fan out a task-related event on both `task` and `board` channels,
 /// with implicit `taskId`/`boardId` filters.
    pub fn publish_task_update(
        &self,
        task_id: &str,
        board_id: &str,
        event: &PublishedEvent,
        sink: &dyn EventSink,
    ) -> usize {
        let task_id = task_id.to_string();
        let board_id = board_id.to_string();
        let predicate = move |payload: &serde_json::Value| {
            payload.get("taskId").map(|v| v == &task_id).unwrap_or(true)
                && payload.get("boardId").map(|v| v == &board_id).unwrap_or(true)
        };
        self.publish_with_predicate(Channel::Task, event, sink, Some(&predicate))
            + self.publish_with_predicate(Channel::Board, event, sink, Some(&predicate))
    }

    /// Evict subscriptions idle longer than `max_idle`.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let idle: Vec<SubscriptionId> = self
            .by_id
            .iter()
            .filter(|entry| entry.value().is_idle(max_idle))
            .map(|entry| *entry.key())
            .collect();
        let count = idle.len();
        for sub_id in idle {
            self.unsubscribe(sub_id);
        }
        count
    }

    /// Totals and per-channel subscription counts.
    pub fn stats(&self) -> RouterStats {
        let mut per_channel = HashMap::new();
        for entry in self.by_channel.iter() {
            per_channel.insert(*entry.key(), entry.value().len());
        }
        RouterStats { total: self.by_id.len(), per_channel }
    }
}
