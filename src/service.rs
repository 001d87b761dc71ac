//! Harvest service: owns the wiring and exposes the operator controls.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, DatabaseLocation, DEFAULT_PROXY_CHECK_URL};
use crate::geocoding::{GeocodeResult, GeocodingGateway, GeocodingStats};
use crate::http_client::{ProxyProbe, ResilientClient};
use crate::models::ScrapingSource;
use crate::pipeline::{Pipeline, ScheduledJob, SourceOutcome};
use crate::proxy_pool::{ProxyPool, ProxyStats, DEFAULT_MAINTENANCE_PERIOD};
use crate::repository::{
    BoxedCompanyRepository, InMemoryCompanyRepository, RepositoryError, SqliteCompanyRepository,
};
use crate::store::{StoreBackend, StoreError};

/// Pause between consecutive proxy probes.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Invalid state backend: {0}")]
    Backend(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    AlreadyRunning,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::AlreadyRunning => write!(f, "already_running"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of a manual or scheduled run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeReport {
    pub status: RunStatus,
    pub companies_scraped: usize,
    pub proxy_stats: Vec<ProxyStats>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceOutcome>,
}

/// How proxies are probed.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub check_url: String,
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            check_url: DEFAULT_PROXY_CHECK_URL.to_string(),
            timeout: Duration::from_secs(10),
            interval: PROBE_INTERVAL,
        }
    }
}

/// Components a service is assembled from.
pub struct ServiceParts {
    pub client: Arc<ResilientClient>,
    pub geocoder: Arc<GeocodingGateway>,
    pub pipeline: Pipeline,
    pub sources: Vec<ScrapingSource>,
    pub probe: ProbeSettings,
}

pub struct HarvestService {
    client: Arc<ResilientClient>,
    geocoder: Arc<GeocodingGateway>,
    pipeline: Pipeline,
    sources: Vec<ScrapingSource>,
    probe: ProbeSettings,
    run_lock: Mutex<()>,
    shutdown: CancellationToken,
}

impl HarvestService {
    pub fn new(parts: ServiceParts) -> Self {
        Self {
            client: parts.client,
            geocoder: parts.geocoder,
            pipeline: parts.pipeline,
            sources: parts.sources,
            probe: parts.probe,
            run_lock: Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the full stack from configuration.
    pub async fn from_config(config: &Config) -> Result<Self, ServiceError> {
        let proxies = Arc::new(ProxyPool::new(
            config.proxy.proxies.clone(),
            config.proxy.pool_config(),
        ));
        let client = Arc::new(
            ResilientClient::builder(proxies)
                .user_agents(config.scraper.user_agents.clone())
                .build(),
        );

        let backend_url = config.state_backend_url();
        let backend = StoreBackend::from_url(&backend_url).map_err(ServiceError::Backend)?;
        info!("State backend: {}", backend);
        let store = backend.open().await?;

        let geocoder = Arc::new(GeocodingGateway::new(
            Arc::clone(&client),
            store,
            config.geocoding.gateway_config(),
        ));

        let repository: BoxedCompanyRepository = match config.database_location() {
            DatabaseLocation::Memory => Arc::new(InMemoryCompanyRepository::new()),
            DatabaseLocation::Sqlite(path) => {
                info!("Company database: {}", path.display());
                Arc::new(SqliteCompanyRepository::open(&path)?)
            }
        };

        let pipeline = Pipeline::new(
            Arc::clone(&client),
            Arc::clone(&geocoder),
            repository,
            config.pipeline_settings(),
        );

        Ok(Self::new(ServiceParts {
            client,
            geocoder,
            pipeline,
            sources: config.sources.clone(),
            probe: ProbeSettings {
                check_url: config.proxy.check_url.clone(),
                timeout: config.proxy.timeout(),
                interval: PROBE_INTERVAL,
            },
        }))
    }

    pub fn proxies(&self) -> &Arc<ProxyPool> {
        self.client.proxies()
    }

    pub fn geocoder(&self) -> &Arc<GeocodingGateway> {
        &self.geocoder
    }

    pub fn repository(&self) -> &BoxedCompanyRepository {
        self.pipeline.repository()
    }

    pub fn sources(&self) -> &[ScrapingSource] {
        &self.sources
    }

    /// Run now, outside the schedule. Cancelled only by `shutdown`.
    pub async fn run_scrape_now(&self) -> ScrapeReport {
        let token = self.shutdown.child_token();
        self.run_scrape(&token).await
    }

    /// Run every source once unless a run is already in progress.
    pub async fn run_scrape(&self, cancel: &CancellationToken) -> ScrapeReport {
        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!("Harvest already running, skipping");
            return ScrapeReport {
                status: RunStatus::AlreadyRunning,
                companies_scraped: 0,
                proxy_stats: self.get_proxy_stats().await,
                sources: Vec::new(),
            };
        };

        self.log_proxy_stats("before run").await;
        let summary = self.pipeline.run(&self.sources, cancel).await;
        let proxy_stats = self.log_proxy_stats("after run").await;

        let companies_scraped = summary.companies_scraped();
        info!(
            "Harvest finished: {} companies from {} sources",
            companies_scraped,
            summary.sources.len()
        );

        ScrapeReport {
            status: if summary.cancelled {
                RunStatus::Cancelled
            } else {
                RunStatus::Success
            },
            companies_scraped,
            proxy_stats,
            sources: summary.sources,
        }
    }

    async fn log_proxy_stats(&self, when: &str) -> Vec<ProxyStats> {
        let stats = self.get_proxy_stats().await;
        if !stats.is_empty() {
            info!("[Proxy] Stats {}:", when);
            for s in &stats {
                info!(
                    "[Proxy]   {}:{} {} ({}/min, {}/day, {} failures)",
                    s.host, s.port, s.status, s.requests_this_minute, s.requests_today, s.consecutive_failures
                );
            }
        }
        stats
    }

    pub async fn get_proxy_stats(&self) -> Vec<ProxyStats> {
        self.proxies().stats().await
    }

    /// Probe every configured proxy in turn. Pool state is not changed.
    pub async fn test_proxies(&self) -> Vec<ProxyProbe> {
        let proxies = self.proxies().proxies().await;
        let mut results = Vec::with_capacity(proxies.len());
        for (idx, proxy) in proxies.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(self.probe.interval).await;
            }
            results.push(
                self.client
                    .probe_proxy(proxy, &self.probe.check_url, self.probe.timeout)
                    .await,
            );
        }
        results
    }

    /// Probe every proxy and block the ones that do not respond.
    pub async fn check_proxies_on_start(&self) -> Vec<ProxyProbe> {
        if !self.proxies().is_enabled() {
            return Vec::new();
        }
        let probes = self.test_proxies().await;
        for probe in probes.iter().filter(|p| !p.working) {
            let proxies = self.proxies().proxies().await;
            if let Some(proxy) = proxies
                .iter()
                .find(|p| p.host == probe.host && p.port == probe.port)
            {
                self.proxies().block(proxy).await;
            }
        }
        let working = probes.iter().filter(|p| p.working).count();
        info!("[Proxy] {}/{} proxies working", working, probes.len());
        probes
    }

    pub async fn geocoding_stats(&self) -> GeocodeResult<GeocodingStats> {
        self.geocoder.stats().await
    }

    /// Start the proxy window/unblock sweep, stopped by `shutdown`.
    pub fn spawn_maintenance(&self, period: Option<Duration>) -> JoinHandle<()> {
        self.proxies().spawn_maintenance(
            period.unwrap_or(DEFAULT_MAINTENANCE_PERIOD),
            self.shutdown.child_token(),
        )
    }

    /// Cancel in-flight runs and background tasks.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[async_trait]
impl ScheduledJob for HarvestService {
    async fn run_scheduled(&self, cancel: &CancellationToken) {
        let report = self.run_scrape(cancel).await;
        info!(
            "Scheduled harvest {}: {} companies",
            report.status, report.companies_scraped
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_in_memory() {
        let mut config = Config::default();
        config.storage.state_backend = Some("memory".to_string());
        config.storage.database = Some("memory".to_string());

        let service = HarvestService::from_config(&config).await.unwrap();
        assert!(service.sources().is_empty());
        assert!(service.get_proxy_stats().await.is_empty());
        assert!(service.check_proxies_on_start().await.is_empty());

        let stats = service.geocoding_stats().await.unwrap();
        assert_eq!(stats.daily_requests, 0);
        assert_eq!(stats.remaining_requests, 2500);
    }

    #[tokio::test]
    async fn test_unknown_backend_is_rejected() {
        let mut config = Config::default();
        config.storage.state_backend = Some("etcd://x".to_string());
        assert!(matches!(
            HarvestService::from_config(&config).await,
            Err(ServiceError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_run_with_no_sources() {
        let mut config = Config::default();
        config.storage.state_backend = Some("memory".to_string());
        config.storage.database = Some("memory".to_string());
        let service = HarvestService::from_config(&config).await.unwrap();

        let report = service.run_scrape_now().await;
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.companies_scraped, 0);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&RunStatus::AlreadyRunning).unwrap(),
            "\"already_running\""
        );
    }
}
