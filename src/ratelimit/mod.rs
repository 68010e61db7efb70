//! Connection- and message-level rate limiting.
//!
//! Two independent fixed-window counters are kept: one keyed by source key
//! (IP) for connection admission, one keyed by connection id for message
//! admission. Both share the same algorithm (`window::WindowEntry`) and
//! policy toggles (`policy::AccessLists`, burst/adaptive).

pub mod policy;
pub mod window;

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, error, warn};

use policy::{AccessLists, AdaptiveScaling, BurstDetection};
use window::WindowEntry;

/// Errors the rate limiter can surface. Failures inside the limiter must
/// fail closed for admission and be logged; this type exists so `status_*`
/// calls have something to log even though they otherwise return safe
/// defaults rather than propagating an error.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// An internal invariant was violated while checking admission.
    #[error("rate limiter internal error: {0}")]
    Internal(String),
}

/// Non-mutating snapshot of a key's rate-limit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Events observed in the current window.
    pub count: u64,
    /// Configured limit for the window.
    pub limit: u64,
    /// Remaining budget in the current window.
    pub remaining: u64,
    /// Milliseconds until the window resets.
    pub reset_at_ms: i64,
}

impl RateLimitStatus {
    fn safe_default(limit: u64) -> Self {
        Self {
            count: 0,
            limit,
            remaining: limit,
            reset_at_ms: 0,
        }
    }
}

/// Configuration for one counter (connection or message admission).
#[derive(Debug, Clone, Copy)]
pub struct WindowConfig {
    /// Window length, in milliseconds.
    pub window_ms: i64,
    /// Maximum admitted events per window.
    pub limit: u64,
}

/// The connection- and message-level rate limiter.
pub struct RateLimiter {
    connection_window: WindowConfig,
    message_window: WindowConfig,
    connection_entries: DashMap<String, WindowEntry>,
    message_entries: DashMap<String, WindowEntry>,
    connection_lists: AccessLists,
    message_lists: AccessLists,
    burst: BurstDetection,
    adaptive: AdaptiveScaling,
}

impl RateLimiter {
    /// Build a limiter from explicit per-counter configs.
    pub fn new(connection_window: WindowConfig, message_window: WindowConfig) -> Self {
        Self {
            connection_window,
            message_window,
            connection_entries: DashMap::new(),
            message_entries: DashMap::new(),
            connection_lists: AccessLists::new(),
            message_lists: AccessLists::new(),
            burst: BurstDetection::default(),
            adaptive: AdaptiveScaling::default(),
        }
    }

    /// Construct from `crate::config::RateLimitSettings`.
    pub fn from_settings(settings: crate::config::RateLimitSettings) -> Self {
        let window = WindowConfig {
            window_ms: settings.window_ms as i64,
            limit: settings.max_connections_per_window,
        };
        let message = WindowConfig {
            window_ms: settings.window_ms as i64,
            limit: settings.max_messages_per_minute,
        };
        Self::new(window, message)
    }

    /// Access the connection-admission allow/deny lists.
    pub fn connection_lists(&self) -> &AccessLists {
        &self.connection_lists
    }

    /// Access the message-admission allow/deny lists.
    pub fn message_lists(&self) -> &AccessLists {
        &self.message_lists
    }

    /// Enable burst detection (disabled by default).
    pub fn set_burst_detection(&mut self, burst: BurstDetection) {
        self.burst = burst;
    }

    /// Enable adaptive scaling (disabled by default).
    pub fn set_adaptive_scaling(&mut self, adaptive: AdaptiveScaling) {
        self.adaptive = adaptive;
    }

    /// Consume one unit against the connection-admission window for
    /// `source_key`. Missing/empty keys are treated as a distinct key
 /// — callers must not substitute a shared
    /// sentinel for an absent key, since that would pool unrelated sources.
    pub fn admit_connection(&self, source_key: &str) -> bool {
        if self.connection_lists.is_denied(source_key) {
            warn!(source_key, "connection admission denied: on deny list");
            return false;
        }
        if self.connection_lists.is_allowed(source_key) {
            debug!(source_key, "connection admission bypassed: on allow list");
            return true;
        }
        self.admit(
            &self.connection_entries,
            source_key,
            self.connection_window,
            "connection",
        )
    }

    /// Consume one unit against the message-admission window for `conn_id`.
    pub fn admit_message(&self, conn_id: &str) -> bool {
        if self.message_lists.is_denied(conn_id) {
            warn!(conn_id, "message admission denied: on deny list");
            return false;
        }
        if self.message_lists.is_allowed(conn_id) {
            debug!(conn_id, "message admission bypassed: on allow list");
            return true;
        }
        self.admit(&self.message_entries, conn_id, self.message_window, "message")
    }

    fn admit(
        &self,
        entries: &DashMap<String, WindowEntry>,
        key: &str,
        window: WindowConfig,
        kind: &'static str,
    ) -> bool {
        let now = Utc::now();
        let limit = self.adaptive.effective_limit(window.limit, 0.0);

        let admitted = match entries.get(key).map(|e| *e) {
            Some(existing) => {
                let (next, admitted) = existing.admit(now, window.window_ms, limit);
                entries.insert(key.to_string(), next);
                admitted
            }
            None => {
                entries.insert(key.to_string(), WindowEntry::fresh(now));
                true
            }
        };

        if self.burst.enabled && admitted {
            if let Some(entry) = entries.get(key) {
                if !entry.is_idle(now, self.burst.sub_window_ms)
                    && entry.count > self.burst.threshold
                {
                    warn!(key, kind, "burst detected, rejecting despite window budget");
                    return false;
                }
            }
        }

        if !admitted {
            debug!(key, kind, "admission rejected: window limit reached");
        }
        admitted
    }

    /// Non-mutating status for a connection-admission key.
    pub fn status_connection(&self, source_key: &str) -> RateLimitStatus {
        self.status(&self.connection_entries, source_key, self.connection_window)
    }

    /// Non-mutating status for a message-admission key.
    pub fn status_message(&self, conn_id: &str) -> RateLimitStatus {
        self.status(&self.message_entries, conn_id, self.message_window)
    }

    fn status(
        &self,
        entries: &DashMap<String, WindowEntry>,
        key: &str,
        window: WindowConfig,
    ) -> RateLimitStatus {
        let now = Utc::now();
        match entries.get(key) {
            Some(entry) => {
                let window_active = (now - entry.window_start).num_milliseconds() < window.window_ms
                    && now >= entry.window_start;
                let count = if window_active { entry.count } else { 0 };
                RateLimitStatus {
                    count,
                    limit: window.limit,
                    remaining: window.limit.saturating_sub(count),
                    reset_at_ms: if window_active {
                        entry.reset_after(now, window.window_ms)
                    } else {
                        window.window_ms
                    },
                }
            }
            None => RateLimitStatus::safe_default(window.limit),
        }
    }

    /// Remove message-window state for a connection (called on disconnect).
    pub fn release(&self, conn_id: &str) {
        self.message_entries.remove(conn_id);
    }

    /// Background sweep: remove entries whose last-activity is older than
    /// one window. Errors encountered for one entry must not abort the
 /// sweep of the rest.
    pub fn sweep(&self) {
        self.sweep_map(&self.connection_entries, self.connection_window);
        self.sweep_map(&self.message_entries, self.message_window);
    }

    fn sweep_map(&self, entries: &DashMap<String, WindowEntry>, window: WindowConfig) {
        let now = Utc::now();
        let stale: Vec<String> = entries
            .iter()
            .filter_map(|entry| {
                if entry.value().is_idle(now, window.window_ms) {
                    Some(entry.key().clone())
                } else {
                    None
                }
            })
            .collect();
        for key in stale {
            entries.remove(&key);
        }
    }

    /// Spawn a periodic sweep task on the current Tokio runtime. Sweep
    /// errors (panics in user-supplied hooks, in a fuller implementation)
    /// must not abort the loop; `sweep` itself cannot fail by construction,
    /// but the error-logging seam is kept for when it does.
    pub fn spawn_sweeper(self: std::sync::Arc<Self>, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }
}

#[allow(dead_code)]
fn log_internal_error(err: &RateLimitError) {
    error!(%err, "rate limiter internal error, failing closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u64) -> RateLimiter {
        RateLimiter::new(
            WindowConfig { window_ms: 60_000, limit },
            WindowConfig { window_ms: 60_000, limit },
        )
    }

    #[test]
    fn admits_up_to_configured_limit() {
        let limiter = limiter(3);
        assert!(limiter.admit_connection("1.2.3.4"));
        assert!(limiter.admit_connection("1.2.3.4"));
        assert!(limiter.admit_connection("1.2.3.4"));
        assert!(!limiter.admit_connection("1.2.3.4"));
    }

    #[test]
    fn distinct_keys_have_independent_budgets() {
        let limiter = limiter(1);
        assert!(limiter.admit_connection("a"));
        assert!(limiter.admit_connection("b"));
        assert!(!limiter.admit_connection("a"));
    }

    #[test]
    fn empty_key_is_its_own_bucket() {
        let limiter = limiter(1);
        assert!(limiter.admit_connection(""));
        assert!(!limiter.admit_connection(""));
        assert!(limiter.admit_connection("nonempty"));
    }

    #[test]
    fn deny_list_rejects_before_counting() {
        let limiter = limiter(10);
        limiter.connection_lists().deny("blocked");
        assert!(!limiter.admit_connection("blocked"));
    }

    #[test]
    fn allow_list_bypasses_window() {
        let limiter = limiter(1);
        limiter.connection_lists().allow("vip");
        for _ in 0..5 {
            assert!(limiter.admit_connection("vip"));
        }
    }

    #[test]
    fn release_clears_message_window_state() {
        let limiter = limiter(1);
        assert!(limiter.admit_message("conn-1"));
        assert!(!limiter.admit_message("conn-1"));
        limiter.release("conn-1");
        assert!(limiter.admit_message("conn-1"));
    }

    #[test]
    fn status_is_non_mutating() {
        let limiter = limiter(2);
        assert!(limiter.admit_connection("k"));
        let before = limiter.status_connection("k");
        let after = limiter.status_connection("k");
        assert_eq!(before, after);
        assert_eq!(before.count, 1);
        assert_eq!(before.remaining, 1);
    }

    #[test]
    fn status_on_unknown_key_returns_safe_default() {
        let limiter = limiter(5);
        let status = limiter.status_connection("never-seen");
        assert_eq!(status.count, 0);
        assert_eq!(status.remaining, 5);
    }

    #[test]
    fn sweep_removes_idle_entries() {
        let limiter = RateLimiter::new(
            WindowConfig { window_ms: 1, limit: 10 },
            WindowConfig { window_ms: 1, limit: 10 },
        );
        limiter.admit_connection("k");
        std::thread::sleep(std::time::Duration::from_millis(5));
        limiter.sweep();
        assert_eq!(limiter.connection_entries.len(), 0);
    }
}
