//! ConnectionRegistry: owns the set of live connections.
//!
//! Grounded on `enterprise/realtime/room.rs`'s `RoomManager` (a DashMap of
//! ids to state with add/get/remove/iter) and the concurrent-map idiom from
//! `other_examples/..._subscription-registry.rs.rs`. The registry never
//! mutates a `Connection`'s inner fields — it only owns
//! membership, so every accessor returns a clone or a read-only guard.

use dashmap::DashMap;

use crate::domain::connection::{Connection, ConnectionId};

/// Owns the set of live connections, keyed by id.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection. Overwrites silently if the id already
    /// exists (ids are process-unique v4 UUIDs, so this should not happen
    /// in practice).
    pub fn add(&self, connection: Connection) {
        self.connections.insert(connection.id, connection);
    }

    /// Remove and return a connection by id.
    pub fn remove(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id).map(|(_, conn)| conn)
    }

    /// Fetch a connection by id.
    pub fn get(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    /// Apply `f` to the stored connection for `id`, if present. This is the
    /// one sanctioned mutation path — callers outside the
    /// `ConnectionManager` should prefer `get`/`add` to avoid racing a
    /// concurrent close.
    pub fn update<R>(&self, id: ConnectionId, f: impl FnOnce(&mut Connection) -> R) -> Option<R> {
        self.connections.get_mut(&id).map(|mut entry| f(&mut entry))
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Snapshot of all live connections.
    pub fn iter(&self) -> Vec<Connection> {
        self.connections.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Whether a connection is currently registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_get_round_trips() {
        let registry = ConnectionRegistry::new();
        let conn = Connection::new("127.0.0.1:1", None);
        let id = conn.id;
        registry.add(conn);
        assert!(registry.get(id).is_some());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn remove_drops_membership() {
        let registry = ConnectionRegistry::new();
        let conn = Connection::new("127.0.0.1:1", None);
        let id = conn.id;
        registry.add(conn);
        assert!(registry.remove(id).is_some());
        assert!(registry.get(id).is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn update_mutates_in_place() {
        let registry = ConnectionRegistry::new();
        let conn = Connection::new("127.0.0.1:1", None);
        let id = conn.id;
        registry.add(conn);
        registry.update(id, |c| c.touch_heartbeat());
        assert!(registry.get(id).is_some());
    }

    #[test]
    fn iter_snapshots_all_connections() {
        let registry = ConnectionRegistry::new();
        registry.add(Connection::new("a", None));
        registry.add(Connection::new("b", None));
        assert_eq!(registry.iter().len(), 2);
    }
}
