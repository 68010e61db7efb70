//! User identity and role tags.
//!
//! Grounded on `enterprise/realtime/presence.rs`'s `UserInfo` and
//! `enterprise/auth/role.rs`'s `BuiltInRole`, generalized to this system's
//! four roles: admin, manager, user, public.

use serde::{Deserialize, Serialize};

/// A user's role tag, used to derive a default permission set when a bearer
/// token omits an explicit `permissions` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full administrative access.
    Admin,
    /// Team/board management access.
    Manager,
    /// Standard authenticated user.
    User,
    /// Any other or unrecognized role tag.
    Public,
}

impl Role {
    /// Parse a role tag from a token/credential claim, defaulting to
 /// `Public` for anything unrecognized.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "admin" => Role::Admin,
            "manager" => Role::Manager,
            "user" => Role::User,
            _ => Role::Public,
        }
    }
}

/// Immutable-after-authentication identity of the user behind a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Stable user id.
    pub id: String,
    /// Optional email address.
    pub email: Option<String>,
    /// Optional display name.
    pub name: Option<String>,
    /// Role tag, used to derive default permissions.
    pub role: Role,
}

impl UserIdentity {
    /// Construct an identity with only the required `id` and `role` fields.
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            email: None,
            name: None,
            role,
        }
    }
}
