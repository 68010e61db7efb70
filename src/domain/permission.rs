//! String-shaped permissions.
//!
//! A permission is a string `verb:scope[:resource-id]`. Rather than a
//! closed `enum Permission` (`enterprise/auth/permission.rs` fixes one to
//! CAD operations), this system's permission space is open — the dispatch
//! table in `messages` mints new `verb:scope` pairs per message type — so
//! permissions are interned strings, with `PermissionSet` keeping that
//! module's `HashSet`-backed, O(1)-lookup shape.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A single permission string, e.g. `"write:board:B42"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(pub String);

impl Permission {
    /// Build a permission from its parts, e.g. `("write", "task", None)` ->
    /// `"write:task"`.
    pub fn new(verb: &str, scope: &str, resource_id: Option<&str>) -> Self {
        match resource_id {
            Some(id) => Permission(format!("{verb}:{scope}:{id}")),
            None => Permission(format!("{verb}:{scope}")),
        }
    }

    fn parts(&self) -> Vec<&str> {
        self.0.split(':').collect()
    }

    fn verb(&self) -> &str {
        self.parts().first().copied().unwrap_or("")
    }
}

impl From<&str> for Permission {
    fn from(value: &str) -> Self {
        Permission(value.to_string())
    }
}

impl From<String> for Permission {
    fn from(value: String) -> Self {
        Permission(value)
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A holder's granted permissions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionSet {
    permissions: HashSet<String>,
}

impl PermissionSet {
    /// An empty permission set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from an iterator of permission strings.
    pub fn from_iter<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }

    /// Add a permission string to the set.
    pub fn add(&mut self, permission: impl Into<String>) {
        self.permissions.insert(permission.into());
    }

    /// Merge another set into this one.
    pub fn merge(&mut self, other: &PermissionSet) {
        self.permissions.extend(other.permissions.iter().cloned());
    }

    /// Number of distinct permission strings held.
    pub fn count(&self) -> usize {
        self.permissions.len()
    }

 /// Whether this set grants `required`:
    /// exact match, or `verb:all`, or `admin:all`, or `*:all`.
    pub fn has(&self, required: &str) -> bool {
        if self.permissions.contains(required) {
            return true;
        }
        if self.permissions.contains("*:all") || self.permissions.contains("admin:all") {
            return true;
        }
        let required = Permission::from(required);
        let verb_all = format!("{}:all", required.verb());
        self.permissions.contains(&verb_all)
    }

    /// Whether this set grants every permission in `required`.
    pub fn has_all(&self, required: &[&str]) -> bool {
        required.iter().all(|p| self.has(p))
    }

    /// Whether this set grants any permission in `required`.
    pub fn has_any(&self, required: &[&str]) -> bool {
        required.iter().any(|p| self.has(p))
    }

    /// List the raw permission strings held.
    pub fn list(&self) -> Vec<String> {
        self.permissions.iter().cloned().collect()
    }
}
