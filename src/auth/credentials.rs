//! Username/password verification.
//!
//! The credential store itself is an external collaborator; this
//! module only defines the trait seam and the argon2 verification step,
//! using `argon2` for credential hashing over a hand-rolled comparison.

use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use async_trait::async_trait;

use super::AuthError;
use crate::domain::permission::PermissionSet;
use crate::domain::user::UserIdentity;

/// Looks up a stored password hash for an email, external to this crate.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the stored identity, permissions, and argon2 hash for
    /// `email`, or `None` if no such account exists.
    async fn lookup(&self, email: &str) -> Option<(UserIdentity, PermissionSet, String)>;
}

/// Verify `email`/`password` against `store`. An empty email or password
/// fails with `AUTH_CREDENTIALS_REQUIRED`; a mismatch fails with
/// `AUTH_INVALID_CREDENTIALS`.
pub async fn verify(
    store: &dyn CredentialStore,
    email: &str,
    password: &str,
) -> Result<(UserIdentity, PermissionSet), AuthError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(AuthError::CredentialsRequired);
    }

    let (identity, permissions, stored_hash) = store
        .lookup(email)
        .await
        .ok_or(AuthError::InvalidCredentials)?;

    let parsed = PasswordHash::new(&stored_hash).map_err(|_| AuthError::InvalidCredentials)?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AuthError::InvalidCredentials)?;

    Ok((identity, permissions))
}
