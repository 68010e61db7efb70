//! Recognized configuration options.
//!
//! Loading configuration from a file, environment, or secrets manager is an
//! external concern; this module only defines the shape every other
//! component is constructed from, with the documented defaults, so there is
//! exactly one place that knows what the recognized keys mean.

use serde::{Deserialize, Serialize};

/// Transport-level bind and protocol settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Bind host, e.g. `"0.0.0.0"`.
    pub bind_host: String,
    /// Bind port.
    pub bind_port: u16,
    /// Upgrade path, e.g. `"/ws"`.
    pub path: String,
    /// Whether permessage-deflate compression is enabled.
    pub compression: bool,
    /// Maximum accepted frame payload size, in bytes.
    pub max_payload: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            bind_port: 8080,
            path: "/ws".to_string(),
            compression: false,
            max_payload: 1 << 20,
        }
    }
}

/// Authentication handshake settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Whether a connection must authenticate before sending other messages.
    pub auth_required: bool,
    /// How long an unauthenticated connection may linger before being
    /// closed with `AUTH_TIMEOUT`.
    pub auth_timeout_ms: u64,
    /// Shared secret used to verify bearer tokens (HS256).
    pub jwt_secret: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            auth_required: true,
            auth_timeout_ms: 10_000,
            jwt_secret: "change-this-secret-in-production".to_string(),
        }
    }
}

/// Rate limiting thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Window length, in milliseconds, shared by both admission counters.
    pub window_ms: u64,
    /// Maximum connections admitted per source key per window.
    pub max_connections_per_window: u64,
    /// Maximum messages admitted per connection per window.
    pub max_messages_per_minute: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_connections_per_window: 20,
            max_messages_per_minute: 120,
        }
    }
}

/// Top-level configuration for the real-time server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Transport knobs.
    pub transport: TransportConfig,
    /// Authentication handshake knobs.
    pub auth: AuthSettings,
    /// Rate limiter thresholds.
    pub rate_limit: RateLimitSettings,
    /// Keepalive cadence; timeout is `2 * heartbeat_interval_ms`.
    pub heartbeat_interval_ms: u64,
    /// Per-connection subscription cap.
    pub max_subscriptions_per_connection: usize,
    /// Backpressure bound for a connection's outbound queue.
    pub outbound_queue_max: usize,
    /// Idle-eviction threshold for subscriptions.
    pub subscription_idle_ms: u64,
    /// Per-call deadline for Repository invocations.
    pub repository_call_timeout_ms: u64,
    /// Deadline given to in-flight sessions during a graceful drain.
    pub drain_deadline_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            auth: AuthSettings::default(),
            rate_limit: RateLimitSettings::default(),
            heartbeat_interval_ms: 30_000,
            max_subscriptions_per_connection: 50,
            outbound_queue_max: 1_024,
            subscription_idle_ms: 30 * 60 * 1000,
            repository_call_timeout_ms: 30_000,
            drain_deadline_ms: 10_000,
        }
    }
}

impl Config {
    /// Overlay recognized `KANBAN_RT_*` environment variables onto the
    /// defaults. Unset or unparsable variables are ignored, leaving the
    /// existing value in place.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("KANBAN_RT_BIND_HOST") {
            config.transport.bind_host = v;
        }
        if let Ok(v) = std::env::var("KANBAN_RT_BIND_PORT") {
            if let Ok(port) = v.parse() {
                config.transport.bind_port = port;
            }
        }
        if let Ok(v) = std::env::var("KANBAN_RT_JWT_SECRET") {
            config.auth.jwt_secret = v;
        }
        if let Ok(v) = std::env::var("KANBAN_RT_AUTH_REQUIRED") {
            if let Ok(flag) = v.parse() {
                config.auth.auth_required = flag;
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.max_subscriptions_per_connection, 50);
        assert_eq!(config.outbound_queue_max, 1_024);
        assert_eq!(config.subscription_idle_ms, 30 * 60 * 1000);
    }

    #[test]
    fn env_override_is_best_effort() {
        std::env::set_var("KANBAN_RT_BIND_PORT", "9999");
        let config = Config::from_env();
        assert_eq!(config.transport.bind_port, 9999);
        std::env::remove_var("KANBAN_RT_BIND_PORT");
    }
}
