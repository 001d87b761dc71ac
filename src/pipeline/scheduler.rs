//! Cancellable recurring job: first run after a startup delay, then on a
//! fixed interval.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Work driven by the scheduler.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    async fn run_scheduled(&self, cancel: &CancellationToken);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub initial_delay: Duration,
    pub interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5 * 60),
            interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the background task. At most one task exists per scheduler, and
/// the task runs the job to completion before waiting for the next tick.
pub struct Scheduler {
    job: Arc<dyn ScheduledJob>,
    config: ScheduleConfig,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(job: Arc<dyn ScheduledJob>, config: ScheduleConfig) -> Self {
        Self {
            job,
            config,
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> ScheduleConfig {
        self.config
    }

    /// Start the background task. Returns false if already started.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let job = Arc::clone(&self.job);
        let config = self.config;
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + config.initial_delay, config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                "Scheduler started: first run in {:?}, then every {:?}",
                config.initial_delay, config.interval
            );
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                info!("Scheduled harvest starting");
                job.run_scheduled(&token).await;
            }
            info!("Scheduler stopped");
        });

        *running = Some(Running { cancel, handle });
        true
    }

    /// Cancel the task (including an in-progress run) and wait for it.
    pub async fn stop(&self) {
        let running = {
            let mut guard = self.running.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        if let Some(running) = running {
            running.cancel.cancel();
            if let Err(e) = running.handle.await {
                warn!("Scheduler task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.as_ref().is_some_and(|r| !r.handle.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        runs: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    #[async_trait]
    impl ScheduledJob for Counting {
        async fn run_scheduled(&self, cancel: &CancellationToken) {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs(10)) => {}
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config() -> ScheduleConfig {
        ScheduleConfig {
            initial_delay: Duration::from_secs(300),
            interval: Duration::from_secs(3600),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_run_after_initial_delay() {
        let job = Arc::new(Counting::default());
        let scheduler = Scheduler::new(job.clone(), config());
        assert!(scheduler.start());

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
        assert_eq!(job.max_active.load(Ordering::SeqCst), 1);

        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_rejected() {
        let scheduler = Scheduler::new(Arc::new(Counting::default()), config());
        assert!(scheduler.start());
        assert!(!scheduler.start());
        scheduler.stop().await;
        assert!(scheduler.start());
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_running_job() {
        let job = Arc::new(Counting::default());
        let scheduler = Scheduler::new(job.clone(), config());
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(job.active.load(Ordering::SeqCst), 1);

        scheduler.stop().await;
        assert_eq!(job.active.load(Ordering::SeqCst), 0);
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    }
}
