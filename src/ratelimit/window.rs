//! Fixed-window counter.
//!
//! Grounded on `enterprise/ratelimit/algorithm.rs`'s `SlidingWindowCounter`
//! struct shape, simplified to a single fixed-window-with-reset algorithm
//! (that file switches between several behind an `AlgorithmType` enum;
//! this system only ever needs one).

use chrono::{DateTime, Utc};

/// A single key's rate-limit bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct WindowEntry {
    /// Events observed in the active window.
    pub count: u64,
    /// When the active window started.
    pub window_start: DateTime<Utc>,
    /// Last time this entry was touched, for idle cleanup.
    pub last_activity: DateTime<Utc>,
}

impl WindowEntry {
    /// Start a fresh window with a single admitted event.
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            count: 1,
            window_start: now,
            last_activity: now,
        }
    }

    /// Outcome of an admission attempt, returning the updated entry and
    /// whether to admit.
    ///
    /// If the clock moves backwards (`now < window_start`) the window is
    /// treated as fresh rather than rejected.
    pub fn admit(self, now: DateTime<Utc>, window_ms: i64, limit: u64) -> (Self, bool) {
        let window_expired = now < self.window_start
            || (now - self.window_start).num_milliseconds() >= window_ms;

        if window_expired {
            return (Self::fresh(now), true);
        }

        if self.count < limit {
            (
                Self {
                    count: self.count + 1,
                    window_start: self.window_start,
                    last_activity: now,
                },
                true,
            )
        } else {
            (
                Self {
                    last_activity: now,
                    ..self
                },
                false,
            )
        }
    }

    /// Time remaining until this window resets, clamped to zero.
    pub fn reset_after(&self, now: DateTime<Utc>, window_ms: i64) -> i64 {
        let elapsed = (now - self.window_start).num_milliseconds();
        (window_ms - elapsed).max(0)
    }

    /// Whether this entry has been idle longer than one window.
    pub fn is_idle(&self, now: DateTime<Utc>, window_ms: i64) -> bool {
        (now - self.last_activity).num_milliseconds() >= window_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_limit_then_rejects() {
        let now = Utc::now();
        let mut entry = WindowEntry::fresh(now);
        for _ in 0..2 {
            let (next, admitted) = entry.admit(now, 60_000, 3);
            assert!(admitted);
            entry = next;
        }
        let (_, admitted) = entry.admit(now, 60_000, 3);
        assert!(!admitted);
    }

    #[test]
    fn window_expiry_resets_count() {
        let start = Utc::now();
        let entry = WindowEntry::fresh(start);
        let later = start + chrono::Duration::milliseconds(61_000);
        let (next, admitted) = entry.admit(later, 60_000, 1);
        assert!(admitted);
        assert_eq!(next.count, 1);
        assert_eq!(next.window_start, later);
    }

    #[test]
    fn clock_moving_backwards_is_treated_as_fresh_window() {
        let start = Utc::now();
        let entry = WindowEntry::fresh(start);
        let earlier = start - chrono::Duration::seconds(5);
        let (next, admitted) = entry.admit(earlier, 60_000, 1);
        assert!(admitted);
        assert_eq!(next.window_start, earlier);
    }
}
