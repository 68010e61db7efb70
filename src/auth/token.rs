//! Bearer token verification.
//!
//! Grounded on `enterprise/auth/jwt.rs`'s `JwtManager::verify_access_token`,
//! narrowed to the single HS256 verify-and-extract-claims path this system
//! needs — no refresh/rotation/blacklist, since tokens here are minted by an
//! external identity provider and only ever verified here.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use super::AuthError;
use crate::domain::permission::PermissionSet;
use crate::domain::user::{Role, UserIdentity};

/// Claims recognized on an inbound bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub exp: u64,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
}

/// Verify `token` against `secret` and derive the resulting identity and
/// permission set. A missing `permissions` claim falls back to the role's
/// default grant table.
pub fn verify(token: &str, secret: &str) -> Result<(UserIdentity, PermissionSet), AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.required_spec_claims.clear();

    let decoded = decode::<TokenClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|_| AuthError::InvalidToken)?;
    let claims = decoded.claims;

    if claims.user_id.trim().is_empty() {
        return Err(AuthError::InvalidToken);
    }

    let role = claims
        .role
        .as_deref()
        .map(Role::parse)
        .unwrap_or(Role::Public);

    let mut identity = UserIdentity::new(claims.user_id, role);
    identity.email = claims.email;
    identity.name = claims.name;

    let permissions = match claims.permissions {
        Some(list) => PermissionSet::from_iter(list),
        None => super::role::default_permissions(role),
    };

    Ok((identity, permissions))
}
