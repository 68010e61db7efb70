//! # Kanban Realtime
//!
//! A real-time collaboration server for a Kanban-style task board: WebSocket
//! connection lifecycle, authentication and permission-scoped authorization,
//! subscription-based publish/subscribe with per-subscription filters, and
//! admission rate limiting. Persistence and the transport upgrade live
//! behind the `Repository` and `FrameTransport` collaborator traits.
//!
//! ## Architecture
//!
//! - `domain`: connection state, users, permissions, subscriptions, events
//! - `ratelimit`: fixed-window connection and message admission
//! - `auth`: token/API-key/credential authentication and role defaults
//! - `registry`: the live connection table
//! - `router`: subscription indices and event fan-out
//! - `messages`: frame parsing, dispatch gates, and command handlers
//! - `connection_manager`: per-connection state machine and outbound queues
//! - `transport`: the `FrameTransport` boundary and an Axum adapter
//! - `server`: accept loop and graceful shutdown
//! - `config`: recognized configuration options and their defaults

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Connection, user, permission, subscription, and event types.
pub mod domain;

/// Fixed-window connection and message rate limiting.
pub mod ratelimit;

/// Token, API-key, and credential authentication.
pub mod auth;

/// The live connection table.
pub mod registry;

/// Subscription indices and event fan-out.
pub mod router;

/// Frame parsing, dispatch gates, and command handlers.
pub mod messages;

/// Per-connection state machine and outbound delivery.
pub mod connection_manager;

/// The `FrameTransport` boundary and an Axum-based adapter.
pub mod transport;

/// Accept loop, graceful shutdown, and component wiring.
pub mod server;

/// Recognized configuration options.
pub mod config;

/// Crate-level error type composing each module's error enum.
pub mod error;

/// Re-export version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
