//! Bounded retry driver over explicit attempt outcomes.

use std::future::Future;

use rand::Rng;
use tokio::time::Duration;
use tracing::debug;

/// Result of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome<T> {
    Success(T),
    /// Worth trying again (timeouts, connection errors, 5xx, 429).
    Retriable(String),
    /// Retrying cannot help.
    Fatal(String),
}

/// Retry policy expressed as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Deterministic part of the backoff: `base * 2^attempt`.
    pub fn backoff_base(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// `base * 2^attempt` plus uniform jitter in `[0, base)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_base(attempt) + jitter(self.base_delay)
    }

    /// Pause after a success, uniform in `[base, 2 * base)`.
    pub fn success_delay(&self) -> Duration {
        self.base_delay + jitter(self.base_delay)
    }
}

fn jitter(upper: Duration) -> Duration {
    let upper_ms = upper.as_millis() as u64;
    if upper_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..upper_ms))
}

/// Successful run of the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryReport<T> {
    pub value: T,
    pub attempts: u32,
    /// Backoff sleeps taken before the successful attempt.
    pub backoffs: Vec<Duration>,
}

/// Failed run of the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryFailure {
    Exhausted { attempts: u32, last_error: String },
    Fatal { attempts: u32, reason: String },
}

/// Run `attempt` until it succeeds, fails fatally, or the policy runs out.
///
/// The closure receives the zero-based attempt number. Backoff sleeps use
/// `tokio::time::sleep` between attempts only; nothing is slept after the
/// final failure.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut attempt: F) -> Result<RetryReport<T>, RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AttemptOutcome<T>>,
{
    let mut backoffs = Vec::new();
    let mut last_error = String::new();

    for n in 0..policy.max_attempts {
        match attempt(n).await {
            AttemptOutcome::Success(value) => {
                return Ok(RetryReport {
                    value,
                    attempts: n + 1,
                    backoffs,
                });
            }
            AttemptOutcome::Fatal(reason) => {
                return Err(RetryFailure::Fatal {
                    attempts: n + 1,
                    reason,
                });
            }
            AttemptOutcome::Retriable(reason) => {
                last_error = reason;
                if n + 1 < policy.max_attempts {
                    let delay = policy.backoff_delay(n);
                    debug!(
                        "Attempt {}/{} failed ({}), backing off {:?}",
                        n + 1,
                        policy.max_attempts,
                        last_error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    backoffs.push(delay);
                }
            }
        }
    }

    Err(RetryFailure::Exhausted {
        attempts: policy.max_attempts,
        last_error,
    })
}
