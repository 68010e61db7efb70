//! Default role → permission-set derivation.
//!
//! Grounded on `enterprise/auth/role.rs`'s `BuiltInRole::default_permissions`
//! table shape, narrowed from CAD permissions to the four roles (admin,
//! manager, user, public) this system grants.

use crate::domain::permission::PermissionSet;
use crate::domain::user::Role;

/// Default permissions granted to a role absent an explicit grant list.
pub fn default_permissions(role: Role) -> PermissionSet {
    let grants: &[&str] = match role {
        Role::Admin => &[
            "read:all",
            "write:all",
            "delete:all",
            "manage:users",
            "manage:system",
            "subscribe:all",
        ],
        Role::Manager => &[
            "read:all",
            "write:all",
            "delete:own",
            "manage:team",
            "subscribe:all",
        ],
        Role::User => &["read:assigned", "write:assigned", "delete:own", "subscribe:assigned"],
        Role::Public => &["read:public", "subscribe:public"],
    };
    PermissionSet::from_iter(grants.iter().copied())
}
