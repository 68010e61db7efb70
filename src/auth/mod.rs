//! Authenticator: validates an `auth` payload and derives a permission set.
//!
//! Grounded on `enterprise/auth/jwt.rs` + `enterprise/auth/role.rs`'s split
//! between token verification and role-derived defaults; reshaped around
//! three payload variants (bearer token, API key, credentials) instead of
//! a single bearer-token path.

pub mod apikey;
pub mod credentials;
pub mod role;
pub mod token;

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::permission::PermissionSet;
use crate::domain::user::UserIdentity;
use apikey::ApiKeyStore;
use credentials::CredentialStore;

/// Errors the Authenticator can produce.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("AUTH_PAYLOAD_REQUIRED")]
    PayloadRequired,
    #[error("AUTH_INVALID_TOKEN")]
    InvalidToken,
    #[error("AUTH_INVALID_KEY")]
    InvalidApiKey,
    #[error("AUTH_CREDENTIALS_REQUIRED")]
    CredentialsRequired,
    #[error("AUTH_INVALID_CREDENTIALS")]
    InvalidCredentials,
}

impl AuthError {
    /// Wire error code sent back to the client.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::PayloadRequired => "AUTH_PAYLOAD_REQUIRED",
            AuthError::InvalidToken => "AUTH_INVALID_TOKEN",
            AuthError::InvalidApiKey => "AUTH_INVALID_KEY",
            AuthError::CredentialsRequired => "AUTH_CREDENTIALS_REQUIRED",
            AuthError::InvalidCredentials => "AUTH_INVALID_CREDENTIALS",
        }
    }
}

/// The inbound `auth` message payload: exactly one of `token`, `apiKey`, or
/// `email`/`password` is expected to be set.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub token: Option<String>,
    pub api_key: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

impl AuthPayload {
    fn is_empty(&self) -> bool {
        self.token.is_none() && self.api_key.is_none() && self.email.is_none() && self.password.is_none()
    }
}

/// Outcome of an authentication attempt.
pub struct AuthOutcome {
    pub user: UserIdentity,
    pub permissions: PermissionSet,
}

/// Validates bearer tokens, API keys, or username/password credentials.
pub struct Authenticator {
    jwt_secret: String,
    api_keys: ApiKeyStore,
    credential_store: Option<Arc<dyn CredentialStore>>,
}

impl Authenticator {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            api_keys: ApiKeyStore::new(),
            credential_store: None,
        }
    }

    /// Attach the external credential store used for username/password auth.
    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = Some(store);
        self
    }

    /// Register an API key directly (tests, or a static-key deployment).
    pub fn register_api_key(&mut self, raw_key: &str, identity: UserIdentity, permissions: PermissionSet) {
        self.api_keys.register(raw_key, identity, permissions);
    }

    /// Validate `payload` and return the resulting identity and permissions.
    pub async fn authenticate(&self, payload: &AuthPayload) -> Result<AuthOutcome, AuthError> {
        if payload.is_empty() {
            return Err(AuthError::PayloadRequired);
        }

        if let Some(token) = payload.token.as_deref() {
            let (user, permissions) = token::verify(token, &self.jwt_secret)?;
            return Ok(AuthOutcome { user, permissions });
        }

        if let Some(key) = payload.api_key.as_deref() {
            let (user, permissions) = self.api_keys.verify(key)?;
            return Ok(AuthOutcome { user, permissions });
        }

        let email = payload.email.as_deref().unwrap_or("");
        let password = payload.password.as_deref().unwrap_or("");
        let store = self
            .credential_store
            .as_ref()
            .ok_or(AuthError::CredentialsRequired)?;
        let (user, permissions) = credentials::verify(store.as_ref(), email, password).await?;
        Ok(AuthOutcome { user, permissions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_payload() -> AuthPayload {
        AuthPayload { token: None, api_key: None, email: None, password: None }
    }

    #[tokio::test]
    async fn empty_payload_is_rejected() {
        let auth = Authenticator::new("secret");
        let result = auth.authenticate(&empty_payload()).await;
        assert_eq!(result.err(), Some(AuthError::PayloadRequired));
    }

    #[tokio::test]
    async fn api_key_path_resolves_registered_identity() {
        let mut auth = Authenticator::new("secret");
        auth.register_api_key("sk-1", UserIdentity::new("u9", crate::domain::user::Role::Admin), PermissionSet::new());
        let payload = AuthPayload { api_key: Some("sk-1".into()), ..empty_payload() };
        let outcome = auth.authenticate(&payload).await.unwrap();
        assert_eq!(outcome.user.id, "u9");
    }

    #[tokio::test]
    async fn credentials_without_store_fail_closed() {
        let auth = Authenticator::new("secret");
        let payload = AuthPayload { email: Some("a@example.com".into()), password: Some("pw".into()), ..empty_payload() };
        let result = auth.authenticate(&payload).await;
        assert_eq!(result.err(), Some(AuthError::CredentialsRequired));
    }
}
