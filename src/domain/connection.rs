//! Connection state.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::permission::PermissionSet;
use super::subscription::SubscriptionId;
use super::user::UserIdentity;

/// Unique identifier for a connection, stable for the process lifetime.
pub type ConnectionId = Uuid;

/// The per-connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Accepted, handshake not yet started.
    New,
    /// Open, awaiting successful authentication.
    OpenUnauth,
    /// Open and authenticated.
    OpenAuth,
    /// Terminally closed.
    Closed,
}

/// A live connection. Exclusively owned and mutated by the
/// `ConnectionManager`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// Opaque, process-unique id. Immutable.
    pub id: ConnectionId,
    /// Source address, e.g. `"203.0.113.4:51515"`. Immutable.
    pub source_addr: String,
    /// Negotiated user-agent, if supplied. Immutable.
    pub user_agent: Option<String>,
    /// Connect timestamp. Immutable.
    pub connect_time: DateTime<Utc>,
    /// Last heartbeat/inbound-activity timestamp.
    pub last_heartbeat: DateTime<Utc>,
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Authenticated user identity, set on entering `OpenAuth`.
    pub user: Option<UserIdentity>,
    /// Granted permissions, set alongside `user`.
    pub permissions: PermissionSet,
    /// Ids of subscriptions owned by this connection.
    pub subscriptions: HashSet<SubscriptionId>,
}

impl Connection {
    /// Construct a freshly accepted connection in the `New` state.
    pub fn new(source_addr: impl Into<String>, user_agent: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_addr: source_addr.into(),
            user_agent,
            connect_time: now,
            last_heartbeat: now,
            state: ConnectionState::New,
            user: None,
            permissions: PermissionSet::new(),
            subscriptions: HashSet::new(),
        }
    }

    /// Whether the connection is authenticated. Gates subscriptions.
    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, ConnectionState::OpenAuth)
    }

    /// Whether the connection is open in either unauth or authenticated
 /// state.
    pub fn is_open(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::OpenUnauth | ConnectionState::OpenAuth
        )
    }

    /// Record successful authentication.
    pub fn authenticate(&mut self, user: UserIdentity, permissions: PermissionSet) {
        self.user = Some(user);
        self.permissions = permissions;
        self.state = ConnectionState::OpenAuth;
    }

    /// Bump the heartbeat clock.
    pub fn touch_heartbeat(&mut self) {
        self.last_heartbeat = Utc::now();
    }
}
