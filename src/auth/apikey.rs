//! API key verification.
//!
//! Grounded on `enterprise/auth/jwt.rs`'s `generate_fingerprint` (sha2 +
//! hex, used there for token binding) — the same hash-then-compare idiom is
//! used here to avoid leaking key length/prefix through a variable-time
//! `==` on the raw secret.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use super::AuthError;
use crate::domain::permission::PermissionSet;
use crate::domain::user::UserIdentity;

/// A key → (identity, permissions) table, looked up by hashed key.
#[derive(Debug, Default)]
pub struct ApiKeyStore {
    by_key_hash: HashMap<[u8; 32], (UserIdentity, PermissionSet)>,
}

impl ApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw API key and the identity/permissions it grants.
    pub fn register(&mut self, raw_key: &str, identity: UserIdentity, permissions: PermissionSet) {
        self.by_key_hash.insert(hash(raw_key), (identity, permissions));
    }

    /// Look up `raw_key` in constant time relative to the stored hash
    /// comparison (the lookup itself is still a hash-map probe, but no
    /// early-exit string comparison against secret material occurs).
    pub fn verify(&self, raw_key: &str) -> Result<(UserIdentity, PermissionSet), AuthError> {
        let key_hash = hash(raw_key);
        for (stored_hash, value) in &self.by_key_hash {
            if constant_time_eq(stored_hash, &key_hash) {
                return Ok(value.clone());
            }
        }
        Err(AuthError::InvalidApiKey)
    }
}

fn hash(raw_key: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    hasher.finalize().into()
}

fn constant_time_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
