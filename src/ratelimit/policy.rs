//! Allow/deny lists and optional enhancements.
//!
//! Grounded on `enterprise/ratelimit/mod.rs`'s `RateLimiterConfig`/policy
//! toggles, narrowed to three: allow/deny lists, burst detection, and
//! adaptive scaling — all off by default.

use std::collections::HashSet;

use parking_lot::RwLock;

/// Static allow/deny lists consulted before the window counter runs.
#[derive(Debug, Default)]
pub struct AccessLists {
    allow: RwLock<HashSet<String>>,
    deny: RwLock<HashSet<String>>,
}

impl AccessLists {
    /// Empty lists.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key to the deny list; consulted before counting.
    pub fn deny(&self, key: impl Into<String>) {
        self.deny.write().insert(key.into());
    }

    /// Remove a key from the deny list.
    pub fn undeny(&self, key: &str) {
        self.deny.write().remove(key);
    }

    /// Add a key to the allow list; bypasses counting but is still logged.
    pub fn allow(&self, key: impl Into<String>) {
        self.allow.write().insert(key.into());
    }

    /// Remove a key from the allow list.
    pub fn unallow(&self, key: &str) {
        self.allow.write().remove(key);
    }

    /// Whether `key` is denied.
    pub fn is_denied(&self, key: &str) -> bool {
        self.deny.read().contains(key)
    }

    /// Whether `key` bypasses counting via the allow list.
    pub fn is_allowed(&self, key: &str) -> bool {
        self.allow.read().contains(key)
    }
}

/// Burst detection: reject when the count observed within `sub_window_ms`
/// exceeds `threshold`, even if the outer window's limit has not been hit.
/// Disabled by default.
#[derive(Debug, Clone, Copy)]
pub struct BurstDetection {
    /// Whether burst detection is active.
    pub enabled: bool,
    /// Sub-window length, in milliseconds.
    pub sub_window_ms: i64,
    /// Maximum events allowed within the sub-window.
    pub threshold: u64,
}

impl Default for BurstDetection {
    fn default() -> Self {
        Self {
            enabled: false,
            sub_window_ms: 1_000,
            threshold: u64::MAX,
        }
    }
}

/// Adaptive scaling: shrink the effective limit when an external load
/// signal exceeds a threshold. Disabled by default.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveScaling {
    /// Whether adaptive scaling is active.
    pub enabled: bool,
    /// Load signal threshold above which limits shrink.
    pub load_threshold: f64,
    /// Factor applied to the configured limit once triggered (0.0–1.0).
    pub shrink_factor: f64,
}

impl Default for AdaptiveScaling {
    fn default() -> Self {
        Self {
            enabled: false,
            load_threshold: 1.0,
            shrink_factor: 1.0,
        }
    }
}

impl AdaptiveScaling {
    /// Effective limit given the current load signal and configured base.
    pub fn effective_limit(&self, base_limit: u64, current_load: f64) -> u64 {
        if self.enabled && current_load > self.load_threshold {
            ((base_limit as f64) * self.shrink_factor).floor().max(1.0) as u64
        } else {
            base_limit
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_list_takes_precedence() {
        let lists = AccessLists::new();
        lists.deny("10.0.0.1");
        assert!(lists.is_denied("10.0.0.1"));
        assert!(!lists.is_denied("10.0.0.2"));
    }

    #[test]
    fn allow_list_bypasses_counting() {
        let lists = AccessLists::new();
        lists.allow("trusted-key");
        assert!(lists.is_allowed("trusted-key"));
    }

    #[test]
    fn adaptive_scaling_disabled_by_default() {
        let scaling = AdaptiveScaling::default();
        assert_eq!(scaling.effective_limit(100, 999.0), 100);
    }

    #[test]
    fn adaptive_scaling_shrinks_when_enabled_and_triggered() {
        let scaling = AdaptiveScaling {
            enabled: true,
            load_threshold: 0.8,
            shrink_factor: 0.5,
        };
        assert_eq!(scaling.effective_limit(100, 0.9), 50);
        assert_eq!(scaling.effective_limit(100, 0.1), 100);
    }
}
