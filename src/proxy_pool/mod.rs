//! Egress proxy pool with quota windows and failure-based blocking.
//!
//! Selection is round-robin over eligible proxies and reserves quota as a
//! side effect. All usage records live behind one mutex so reservations,
//! reports and the maintenance sweep never lose updates.

mod usage;

pub use usage::{ProxyStatus, ProxyUsage, WindowRoll, DAY_WINDOW, MINUTE_WINDOW};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::Proxy;

/// Consecutive failures before a proxy is blocked.
pub const DEFAULT_BLOCK_THRESHOLD: u32 = 3;
/// How long a blocked proxy stays out of rotation.
pub const DEFAULT_BLOCK_DURATION: Duration = Duration::from_secs(30 * 60);
/// Period of the maintenance sweep.
pub const DEFAULT_MAINTENANCE_PERIOD: Duration = Duration::from_secs(60);

/// Pool behaviour settings.
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// When false the pool never hands out proxies.
    pub enabled: bool,
    pub block_threshold: u32,
    pub block_duration: Duration,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            block_threshold: DEFAULT_BLOCK_THRESHOLD,
            block_duration: DEFAULT_BLOCK_DURATION,
        }
    }
}

impl ProxyPoolConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Snapshot of one proxy for stats output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyStats {
    pub host: String,
    pub port: u16,
    pub requests_this_minute: u32,
    pub requests_today: u32,
    pub consecutive_failures: u32,
    pub status: ProxyStatus,
}

/// Counts from one maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub minute_resets: usize,
    pub day_resets: usize,
    pub unblocked: usize,
}

struct PoolState {
    entries: Vec<ProxyUsage>,
    cursor: usize,
}

impl PoolState {
    fn find_mut(&mut self, proxy: &Proxy) -> Option<&mut ProxyUsage> {
        self.entries
            .iter_mut()
            .find(|u| u.proxy.same_endpoint(proxy))
    }
}

/// Pool of egress proxies.
pub struct ProxyPool {
    config: ProxyPoolConfig,
    state: Mutex<PoolState>,
}

impl ProxyPool {
    pub fn new(proxies: Vec<Proxy>, config: ProxyPoolConfig) -> Self {
        let now = Instant::now();
        let entries = proxies
            .into_iter()
            .map(|p| ProxyUsage::new(p, now))
            .collect();
        Self {
            config,
            state: Mutex::new(PoolState { entries, cursor: 0 }),
        }
    }

    /// A pool that always returns `None` and ignores reports.
    pub fn disabled() -> Self {
        Self::new(Vec::new(), ProxyPoolConfig::disabled())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &ProxyPoolConfig {
        &self.config
    }

    /// Reserve the next eligible proxy in round-robin order.
    ///
    /// `None` means no proxy is usable right now; callers proceed direct.
    pub async fn next(&self) -> Option<Proxy> {
        if !self.config.enabled {
            return None;
        }

        let mut state = self.state.lock().await;
        let count = state.entries.len();
        if count == 0 {
            return None;
        }

        let start = state.cursor % count;
        for i in 0..count {
            let idx = (start + i) % count;
            if state.entries[idx].is_eligible() {
                state.cursor = (idx + 1) % count;
                let entry = &mut state.entries[idx];
                entry.reserve(Instant::now());
                debug!(
                    "[Proxy] Selected {} ({}/{} this minute, {}/{} today)",
                    entry.proxy,
                    entry.requests_this_minute,
                    entry.proxy.max_requests_per_minute,
                    entry.requests_today,
                    entry.proxy.max_requests_per_day
                );
                return Some(entry.proxy.clone());
            }
        }

        warn!("[Proxy] No proxies available, all {} blocked or at quota", count);
        None
    }

    pub async fn report_success(&self, proxy: &Proxy) {
        if !self.config.enabled {
            return;
        }
        let mut state = self.state.lock().await;
        if let Some(entry) = state.find_mut(proxy) {
            entry.record_success();
        }
    }

    pub async fn report_failure(&self, proxy: &Proxy) {
        if !self.config.enabled {
            return;
        }
        let threshold = self.config.block_threshold;
        let mut state = self.state.lock().await;
        if let Some(entry) = state.find_mut(proxy) {
            if entry.record_failure(threshold, Instant::now()) {
                warn!(
                    "[Proxy] {} blocked after {} consecutive failures",
                    entry.proxy, entry.consecutive_failures
                );
            } else {
                debug!(
                    "[Proxy] {} failure {}/{}",
                    entry.proxy, entry.consecutive_failures, threshold
                );
            }
        }
    }

    /// Take a proxy out of rotation right away (failed liveness probe).
    pub async fn block(&self, proxy: &Proxy) {
        if !self.config.enabled {
            return;
        }
        let threshold = self.config.block_threshold;
        let mut state = self.state.lock().await;
        if let Some(entry) = state.find_mut(proxy) {
            entry.block(threshold, Instant::now());
            warn!("[Proxy] {} blocked: unreachable", entry.proxy);
        }
    }

    /// Reset elapsed quota windows and release expired blocks.
    pub async fn maintain(&self) -> MaintenanceReport {
        let now = Instant::now();
        let block_duration = self.config.block_duration;
        let mut report = MaintenanceReport::default();

        let mut state = self.state.lock().await;
        for entry in state.entries.iter_mut() {
            let roll = entry.roll_windows(now);
            if roll.minute_reset {
                report.minute_resets += 1;
            }
            if roll.day_reset {
                report.day_resets += 1;
            }
            if entry.try_unblock(now, block_duration) {
                report.unblocked += 1;
                info!("[Proxy] {} unblocked after {:?}", entry.proxy, block_duration);
            }
        }
        report
    }

    /// Run `maintain` every `period` until `cancel` fires.
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("[Proxy] Maintenance stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = pool.maintain().await;
                        if report != MaintenanceReport::default() {
                            debug!("[Proxy] Maintenance: {:?}", report);
                        }
                    }
                }
            }
        })
    }

    /// Configured proxies in pool order.
    pub async fn proxies(&self) -> Vec<Proxy> {
        let state = self.state.lock().await;
        state.entries.iter().map(|u| u.proxy.clone()).collect()
    }

    pub async fn stats(&self) -> Vec<ProxyStats> {
        let state = self.state.lock().await;
        state
            .entries
            .iter()
            .map(|u| ProxyStats {
                host: u.proxy.host.clone(),
                port: u.proxy.port,
                requests_this_minute: u.requests_this_minute,
                requests_today: u.requests_today,
                consecutive_failures: u.consecutive_failures,
                status: u.status(),
            })
            .collect()
    }

    /// Copy of one proxy's usage record.
    pub async fn usage(&self, proxy: &Proxy) -> Option<ProxyUsage> {
        let mut state = self.state.lock().await;
        state.find_mut(proxy).map(|u| u.clone())
    }
}
