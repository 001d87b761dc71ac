//! Per-second spacing and per-UTC-day quota for geocoding lookups.
//!
//! The daily counter lives in the key/value store so it survives restarts.
//! The day it belongs to is stored next to it.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{GeocodeError, GeocodeResult};
use crate::store::{BoxedKeyValueStore, StoreError};

pub const DAILY_COUNTER_KEY: &str = "geocoding:dailyRequests";
pub const CURRENT_DAY_KEY: &str = "geocoding:currentDay";

/// Longest spacing a very low per-second rate is allowed to produce.
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Source of wall-clock time for day boundaries.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub type BoxedClock = Arc<dyn Clock>;

#[derive(Debug, Default)]
struct LimiterState {
    current_day: Option<NaiveDate>,
    last_request_at: Option<Instant>,
    last_request_wall: Option<DateTime<Utc>>,
}

/// Quota snapshot without side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub daily_requests: u64,
    pub remaining_requests: u64,
    pub last_request_at: Option<DateTime<Utc>>,
}

/// Minimum gap between lookups for a per-second rate. Zero, negative and NaN
/// rates disable spacing.
fn spacing_for(requests_per_second: f64) -> Duration {
    if requests_per_second.is_nan() || requests_per_second <= 0.0 {
        return Duration::ZERO;
    }
    match Duration::try_from_secs_f64(1.0 / requests_per_second) {
        Ok(interval) if interval <= MAX_INTERVAL => interval,
        _ => {
            warn!(
                "Geocoding rate of {} requests/s is too low, spacing lookups {:?} apart",
                requests_per_second, MAX_INTERVAL
            );
            MAX_INTERVAL
        }
    }
}

pub struct QuotaLimiter {
    store: BoxedKeyValueStore,
    clock: BoxedClock,
    min_interval: Duration,
    requests_per_day: u64,
    state: Mutex<LimiterState>,
}

impl QuotaLimiter {
    pub fn new(
        store: BoxedKeyValueStore,
        clock: BoxedClock,
        requests_per_second: f64,
        requests_per_day: u64,
    ) -> Self {
        Self {
            store,
            clock,
            min_interval: spacing_for(requests_per_second),
            requests_per_day,
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn requests_per_day(&self) -> u64 {
        self.requests_per_day
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    async fn stored_day(&self) -> GeocodeResult<Option<NaiveDate>> {
        let value = self.store.get(CURRENT_DAY_KEY).await?;
        Ok(value.and_then(|v| v.parse::<NaiveDate>().ok()))
    }

    async fn stored_count(&self) -> GeocodeResult<u64> {
        match self.store.get(DAILY_COUNTER_KEY).await? {
            Some(v) => v.parse::<u64>().map_err(|e| {
                GeocodeError::Store(StoreError::Serialization(format!(
                    "{}: {}",
                    DAILY_COUNTER_KEY, e
                )))
            }),
            None => Ok(0),
        }
    }

    /// Reserve one lookup, sleeping for per-second spacing if needed.
    ///
    /// Returns the daily count including this lookup. Fails without waiting
    /// when today's quota is already used up. The store's increment decides:
    /// a count past the limit is rejected even if the first read allowed it,
    /// so processes sharing a backend cannot overshoot together.
    pub async fn acquire(&self) -> GeocodeResult<u64> {
        let mut state = self.state.lock().await;
        let today = self.clock.now().date_naive();

        let day = match state.current_day {
            Some(day) => Some(day),
            None => self.stored_day().await?,
        };
        if day != Some(today) {
            if let Some(previous) = day {
                info!("Geocoding day rolled over from {} to {}, resetting quota", previous, today);
            }
            self.store.set(DAILY_COUNTER_KEY, "0").await?;
            self.store.set(CURRENT_DAY_KEY, &today.to_string()).await?;
        }
        state.current_day = Some(today);

        if self.stored_count().await? >= self.requests_per_day {
            return Err(GeocodeError::RateLimitExceeded {
                limit: self.requests_per_day,
            });
        }

        if let Some(last) = state.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!("Geocoding rate limit: waiting {:?}", wait);
                tokio::time::sleep(wait).await;
            }
        }

        let count = self.store.increment(DAILY_COUNTER_KEY).await?;
        if count > self.requests_per_day {
            debug!(
                "Geocoding quota taken by another process ({} of {})",
                count, self.requests_per_day
            );
            return Err(GeocodeError::RateLimitExceeded {
                limit: self.requests_per_day,
            });
        }
        state.last_request_at = Some(Instant::now());
        state.last_request_wall = Some(self.clock.now());
        Ok(count)
    }

    pub async fn snapshot(&self) -> GeocodeResult<QuotaSnapshot> {
        let state = self.state.lock().await;
        let today = self.clock.now().date_naive();
        let day = match state.current_day {
            Some(day) => Some(day),
            None => self.stored_day().await?,
        };
        // rejected increments can leave the stored count past the limit
        let daily_requests = if day == Some(today) {
            self.stored_count().await?.min(self.requests_per_day)
        } else {
            0
        };
        Ok(QuotaSnapshot {
            daily_requests,
            remaining_requests: self.requests_per_day.saturating_sub(daily_requests),
            last_request_at: state.last_request_wall,
        })
    }
}
