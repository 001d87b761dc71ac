//! Per-proxy usage record: quota windows and health.

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

use crate::models::Proxy;

/// Length of the per-minute quota window.
pub const MINUTE_WINDOW: Duration = Duration::from_secs(60);
/// Length of the per-day quota window.
pub const DAY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Health/quota status reported in pool stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyStatus {
    Available,
    Limited,
    Blocked,
}

impl std::fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Limited => write!(f, "limited"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// Result of rolling a record's windows forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowRoll {
    pub minute_reset: bool,
    pub day_reset: bool,
}

/// Mutable usage state for one proxy. Owned by `ProxyPool`.
#[derive(Debug, Clone)]
pub struct ProxyUsage {
    pub proxy: Proxy,
    pub requests_this_minute: u32,
    pub requests_today: u32,
    pub minute_window_start: Instant,
    pub day_window_start: Instant,
    pub consecutive_failures: u32,
    pub is_blocked: bool,
    pub blocked_at: Option<Instant>,
    pub last_used_at: Option<Instant>,
}

impl ProxyUsage {
    pub fn new(proxy: Proxy, now: Instant) -> Self {
        Self {
            proxy,
            requests_this_minute: 0,
            requests_today: 0,
            minute_window_start: now,
            day_window_start: now,
            consecutive_failures: 0,
            is_blocked: false,
            blocked_at: None,
            last_used_at: None,
        }
    }

    /// Not blocked and under both quotas.
    pub fn is_eligible(&self) -> bool {
        !self.is_blocked
            && self.requests_this_minute < self.proxy.max_requests_per_minute
            && self.requests_today < self.proxy.max_requests_per_day
    }

    /// Count a request against both windows.
    pub fn reserve(&mut self, now: Instant) {
        self.requests_this_minute = self.requests_this_minute.saturating_add(1);
        self.requests_today = self.requests_today.saturating_add(1);
        self.last_used_at = Some(now);
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Returns true when this failure caused the proxy to become blocked.
    pub fn record_failure(&mut self, threshold: u32, now: Instant) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if !self.is_blocked && self.consecutive_failures >= threshold {
            self.is_blocked = true;
            self.blocked_at = Some(now);
            return true;
        }
        false
    }

    /// Block immediately, raising the failure count so it stays consistent
    /// with the threshold.
    pub fn block(&mut self, threshold: u32, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.max(threshold);
        self.is_blocked = true;
        self.blocked_at = Some(now);
    }

    /// Reset each counter whose window has fully elapsed. The new window
    /// starts at `now`.
    pub fn roll_windows(&mut self, now: Instant) -> WindowRoll {
        let mut roll = WindowRoll::default();
        if now.saturating_duration_since(self.minute_window_start) >= MINUTE_WINDOW {
            self.requests_this_minute = 0;
            self.minute_window_start = now;
            roll.minute_reset = true;
        }
        if now.saturating_duration_since(self.day_window_start) >= DAY_WINDOW {
            self.requests_today = 0;
            self.day_window_start = now;
            roll.day_reset = true;
        }
        roll
    }

    /// Clear the block once `block_duration` has passed since it started.
    pub fn try_unblock(&mut self, now: Instant, block_duration: Duration) -> bool {
        if !self.is_blocked {
            return false;
        }
        let started = self.blocked_at.unwrap_or(now);
        if now.saturating_duration_since(started) >= block_duration {
            self.is_blocked = false;
            self.blocked_at = None;
            self.consecutive_failures = 0;
            return true;
        }
        false
    }

    pub fn status(&self) -> ProxyStatus {
        if self.is_blocked {
            ProxyStatus::Blocked
        } else if self.is_eligible() {
            ProxyStatus::Available
        } else {
            ProxyStatus::Limited
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage() -> ProxyUsage {
        ProxyUsage::new(Proxy::new("p", 1).with_quota(2, 3), Instant::now())
    }

    #[test]
    fn test_quota_limits_eligibility() {
        let mut u = usage();
        let now = Instant::now();
        u.reserve(now);
        assert!(u.is_eligible());
        u.reserve(now);
        assert!(!u.is_eligible());
        assert_eq!(u.status(), ProxyStatus::Limited);
    }

    #[test]
    fn test_block_keeps_failure_invariant() {
        let mut u = usage();
        u.block(3, Instant::now());
        assert!(u.is_blocked);
        assert!(u.consecutive_failures >= 3);
        assert_eq!(u.status(), ProxyStatus::Blocked);
    }

    #[test]
    fn test_failure_reports_block_once() {
        let mut u = usage();
        let now = Instant::now();
        assert!(!u.record_failure(2, now));
        assert!(u.record_failure(2, now));
        assert!(!u.record_failure(2, now));
        assert_eq!(u.consecutive_failures, 3);
    }
}
