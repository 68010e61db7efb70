//! Crate-level error type.
//!
//! Each module defines its own `thiserror` enum for the failures it can
//! produce; this type composes them so callers at the edges (handlers,
//! `main.rs`) can propagate with `?` without naming every module's error
//! type individually.

use thiserror::Error;

use crate::auth::AuthError;
use crate::messages::DispatchError;
use crate::ratelimit::RateLimitError;
use crate::router::RouterError;

/// Top-level error for the real-time messaging subsystem.
#[derive(Debug, Error)]
pub enum Error {
    /// Authentication/authorization failure.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Rate limiter failure.
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    /// Subscription router failure.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// Message dispatch failure.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Connection-level failure (see `connection_manager`).
    #[error("connection error: {0}")]
    Connection(String),

    /// Server lifecycle failure.
    #[error("server error: {0}")]
    Server(String),
}

/// Convenience alias for crate-level `Result`s.
pub type Result<T> = std::result::Result<T, Error>;
