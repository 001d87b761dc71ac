//! Configuration for dirharvest.
//!
//! Values come from a file found by prefer or named with `--config` (see
//! `loader`), then environment overrides using the names deployments already
//! set (`PROXY_ENABLED`, `PROXY_LIST`, `SCRAPER_TIMEOUT`, ...).

mod loader;

pub use loader::LoadOptions;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::warn;

use crate::extractor::validate_selectors;
use crate::geocoding::{GeocodingConfig, DEFAULT_GEOCODER_USER_AGENT, DEFAULT_PROVIDER_URL};
use crate::http_client::{FetchOptions, DEFAULT_FATAL_STATUSES};
use crate::models::{parse_proxy_list, Proxy, ScrapingSource};
use crate::pipeline::{PipelineSettings, ScheduleConfig};
use crate::proxy_pool::{ProxyPoolConfig, DEFAULT_BLOCK_THRESHOLD};

/// Default URL used to check that a proxy relays traffic.
pub const DEFAULT_PROXY_CHECK_URL: &str = "https://api.ipify.org?format=json";
/// Default database filename for companies.
pub const DEFAULT_DATABASE_FILENAME: &str = "companies.db";
/// Lowest non-zero geocoding rate accepted: one lookup per day.
pub const MIN_REQUESTS_PER_SECOND: f64 = 1.0 / (24.0 * 60.0 * 60.0);
/// Default database filename for quota counters and the geocoding cache.
pub const DEFAULT_STATE_FILENAME: &str = "state.db";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: PathBuf, message: String },
    #[error("Failed to parse {format} config: {message}")]
    Parse { format: &'static str, message: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn default_true() -> bool {
    true
}

fn default_block_threshold() -> u32 {
    DEFAULT_BLOCK_THRESHOLD
}

fn default_block_minutes() -> u64 {
    30
}

fn default_proxy_timeout_ms() -> u64 {
    10_000
}

fn default_check_url() -> String {
    DEFAULT_PROXY_CHECK_URL.to_string()
}

fn default_maintenance_secs() -> u64 {
    60
}

/// `[proxy]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxySettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub proxies: Vec<Proxy>,
    /// Consecutive failures before a proxy is blocked (`PROXY_RETRY_ATTEMPTS`).
    #[serde(default = "default_block_threshold")]
    pub block_threshold: u32,
    #[serde(default = "default_block_minutes")]
    pub block_minutes: u64,
    /// Timeout for liveness probes (`PROXY_TIMEOUT_MS`).
    #[serde(default = "default_proxy_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_check_url")]
    pub check_url: String,
    /// Probe every proxy at startup and block the dead ones.
    #[serde(default = "default_true")]
    pub check_on_start: bool,
    #[serde(default = "default_maintenance_secs")]
    pub maintenance_secs: u64,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            proxies: Vec::new(),
            block_threshold: default_block_threshold(),
            block_minutes: default_block_minutes(),
            timeout_ms: default_proxy_timeout_ms(),
            check_url: default_check_url(),
            check_on_start: true,
            maintenance_secs: default_maintenance_secs(),
        }
    }
}

impl ProxySettings {
    pub fn pool_config(&self) -> ProxyPoolConfig {
        ProxyPoolConfig {
            enabled: self.enabled,
            block_threshold: self.block_threshold.max(1),
            block_duration: Duration::from_secs(self.block_minutes.saturating_mul(60)),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_scraper_timeout_ms() -> u64 {
    10_000
}

fn default_request_delay_ms() -> u64 {
    2_000
}

fn default_fatal_statuses() -> Vec<u16> {
    DEFAULT_FATAL_STATUSES.to_vec()
}

/// `[scraper]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScraperSettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_scraper_timeout_ms")]
    pub timeout_ms: u64,
    /// Base delay for backoff and pauses between requests.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_true")]
    pub use_proxy: bool,
    /// Identities to rotate; empty means the built-in browser list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_agents: Vec<String>,
    /// Listing statuses that are not retried; empty retries every failure.
    #[serde(default = "default_fatal_statuses")]
    pub fatal_statuses: Vec<u16>,
}

impl Default for ScraperSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: default_scraper_timeout_ms(),
            request_delay_ms: default_request_delay_ms(),
            use_proxy: true,
            user_agents: Vec::new(),
            fatal_statuses: default_fatal_statuses(),
        }
    }
}

impl ScraperSettings {
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions::new(
            self.max_retries.max(1),
            Duration::from_millis(self.timeout_ms),
            Duration::from_millis(self.request_delay_ms),
        )
        .use_proxy(self.use_proxy)
        .fatal_statuses(self.fatal_statuses.clone())
    }
}

fn default_provider_url() -> String {
    DEFAULT_PROVIDER_URL.to_string()
}

fn default_geocoder_user_agent() -> String {
    DEFAULT_GEOCODER_USER_AGENT.to_string()
}

fn default_geocoding_timeout_ms() -> u64 {
    5_000
}

fn default_requests_per_second() -> f64 {
    1.0
}

fn default_requests_per_day() -> u64 {
    2_500
}

fn default_cache_ttl_days() -> u64 {
    30
}

/// `[geocoding]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodingSettings {
    #[serde(default = "default_provider_url")]
    pub provider_url: String,
    #[serde(default = "default_geocoder_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub use_proxy: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_request_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_geocoding_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_requests_per_second")]
    pub max_requests_per_second: f64,
    #[serde(default = "default_requests_per_day")]
    pub max_requests_per_day: u64,
    #[serde(default = "default_cache_ttl_days")]
    pub cache_ttl_days: u64,
}

impl Default for GeocodingSettings {
    fn default() -> Self {
        Self {
            provider_url: default_provider_url(),
            user_agent: default_geocoder_user_agent(),
            use_proxy: false,
            max_retries: default_max_retries(),
            retry_delay_ms: default_request_delay_ms(),
            timeout_ms: default_geocoding_timeout_ms(),
            max_requests_per_second: default_requests_per_second(),
            max_requests_per_day: default_requests_per_day(),
            cache_ttl_days: default_cache_ttl_days(),
        }
    }
}

impl GeocodingSettings {
    pub fn gateway_config(&self) -> GeocodingConfig {
        GeocodingConfig {
            provider_url: self.provider_url.clone(),
            user_agent: self.user_agent.clone(),
            use_proxy: self.use_proxy,
            max_retries: self.max_retries.max(1),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            timeout: Duration::from_millis(self.timeout_ms),
            requests_per_second: self.max_requests_per_second,
            requests_per_day: self.max_requests_per_day,
            cache_ttl: Duration::from_secs(self.cache_ttl_days.saturating_mul(24 * 60 * 60)),
            ..Default::default()
        }
    }
}

fn default_initial_delay_secs() -> u64 {
    5 * 60
}

fn default_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_source_delay_min_secs() -> u64 {
    5
}

fn default_source_delay_max_secs() -> u64 {
    15
}

/// `[schedule]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_source_delay_min_secs")]
    pub source_delay_min_secs: u64,
    #[serde(default = "default_source_delay_max_secs")]
    pub source_delay_max_secs: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay_secs(),
            interval_secs: default_interval_secs(),
            source_delay_min_secs: default_source_delay_min_secs(),
            source_delay_max_secs: default_source_delay_max_secs(),
        }
    }
}

impl ScheduleSettings {
    pub fn schedule_config(&self) -> ScheduleConfig {
        ScheduleConfig {
            initial_delay: Duration::from_secs(self.initial_delay_secs),
            interval: Duration::from_secs(self.interval_secs.max(1)),
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory for default database files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// `memory`, `sqlite://<path>` or `redis://...` for quota and cache state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_backend: Option<String>,
    /// Company database path, or `memory`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

/// Where companies are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    Memory,
    Sqlite(PathBuf),
}

/// Full configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub proxy: ProxySettings,
    #[serde(default)]
    pub scraper: ScraperSettings,
    #[serde(default)]
    pub geocoding: GeocodingSettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<ScrapingSource>,
    /// File this config was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}: cannot parse '{}'", name, value);
            None
        }
    }
}

impl Config {
    /// Apply environment variable overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PROXY_ENABLED") {
            self.proxy.enabled = parse_bool(&v);
        }
        if let Some(v) = lookup("PROXY_LIST") {
            match parse_proxy_list(&v) {
                Ok(proxies) => self.proxy.proxies = proxies,
                Err(e) => warn!("Ignoring PROXY_LIST: {}", e),
            }
        }
        if let Some(n) = lookup("PROXY_RETRY_ATTEMPTS").and_then(|v| parse_env("PROXY_RETRY_ATTEMPTS", &v)) {
            self.proxy.block_threshold = n;
        }
        if let Some(n) = lookup("PROXY_TIMEOUT_MS").and_then(|v| parse_env("PROXY_TIMEOUT_MS", &v)) {
            self.proxy.timeout_ms = n;
        }

        if let Some(n) = lookup("SCRAPER_MAX_RETRIES").and_then(|v| parse_env("SCRAPER_MAX_RETRIES", &v)) {
            self.scraper.max_retries = n;
        }
        if let Some(n) = lookup("SCRAPER_TIMEOUT").and_then(|v| parse_env("SCRAPER_TIMEOUT", &v)) {
            self.scraper.timeout_ms = n;
        }
        if let Some(n) = lookup("SCRAPER_REQUEST_DELAY").and_then(|v| parse_env("SCRAPER_REQUEST_DELAY", &v)) {
            self.scraper.request_delay_ms = n;
        }

        if let Some(v) = lookup("GEOCODING_USE_PROXY") {
            self.geocoding.use_proxy = parse_bool(&v);
        }
        if let Some(n) = lookup("GEOCODING_MAX_RETRIES").and_then(|v| parse_env("GEOCODING_MAX_RETRIES", &v)) {
            self.geocoding.max_retries = n;
        }
        if let Some(n) = lookup("GEOCODING_RETRY_DELAY").and_then(|v| parse_env("GEOCODING_RETRY_DELAY", &v)) {
            self.geocoding.retry_delay_ms = n;
        }
        if let Some(n) = lookup("GEOCODING_MAX_REQUESTS_PER_SECOND")
            .and_then(|v| parse_env("GEOCODING_MAX_REQUESTS_PER_SECOND", &v))
        {
            self.geocoding.max_requests_per_second = n;
        }
        if let Some(n) = lookup("GEOCODING_MAX_REQUESTS_PER_DAY")
            .and_then(|v| parse_env("GEOCODING_MAX_REQUESTS_PER_DAY", &v))
        {
            self.geocoding.max_requests_per_day = n;
        }

        // REDIS_URL only applies when no backend was chosen explicitly
        if let Some(v) = lookup("DIRHARVEST_STATE_BACKEND") {
            self.storage.state_backend = Some(v);
        } else if let Some(v) = lookup("REDIS_URL") {
            if self.storage.state_backend.is_none() {
                self.storage.state_backend = Some(v);
            }
        }
        if let Some(v) = lookup("DIRHARVEST_DATABASE") {
            self.storage.database = Some(v);
        }
        if let Some(v) = lookup("DIRHARVEST_DATA_DIR") {
            self.storage.data_dir = Some(v);
        }

        self
    }

    /// Check sources and schedule values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = std::collections::HashSet::new();
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate source name '{}'",
                    source.name
                )));
            }
            url::Url::parse(&source.url).map_err(|e| {
                ConfigError::Invalid(format!("source '{}' has invalid url: {}", source.name, e))
            })?;
            validate_selectors(source)
                .map_err(|e| ConfigError::Invalid(format!("source '{}': {}", source.name, e)))?;
        }

        let rps = self.geocoding.max_requests_per_second;
        if !rps.is_finite() || rps < 0.0 || (rps > 0.0 && rps < MIN_REQUESTS_PER_SECOND) {
            return Err(ConfigError::Invalid(format!(
                "geocoding.max_requests_per_second must be 0 or a finite value of at least {:.6}, got {}",
                MIN_REQUESTS_PER_SECOND, rps
            )));
        }

        if self.schedule.source_delay_min_secs > self.schedule.source_delay_max_secs {
            return Err(ConfigError::Invalid(
                "schedule.source_delay_min_secs exceeds source_delay_max_secs".to_string(),
            ));
        }
        if self.proxy.enabled && self.proxy.proxies.is_empty() {
            warn!("Proxy rotation enabled but no proxies configured; requests go direct");
        }
        Ok(())
    }

    /// Base directory for relative paths: the config file's directory.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    pub fn resolve_path(&self, path_str: &str) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match self.base_dir() {
            Some(base) => base.join(path),
            None => path.to_path_buf(),
        }
    }

    /// Data directory for default database files.
    pub fn data_dir(&self) -> PathBuf {
        match self.storage.data_dir {
            Some(ref dir) => self.resolve_path(dir),
            None => dirs::data_dir()
                .map(|d| d.join("dirharvest"))
                .unwrap_or_else(|| PathBuf::from("data")),
        }
    }

    /// Store backend URL for quota counters and the geocoding cache.
    pub fn state_backend_url(&self) -> String {
        match self.storage.state_backend {
            Some(ref url) => match url.strip_prefix("sqlite://") {
                Some(path) => format!("sqlite://{}", self.resolve_path(path).display()),
                None => url.clone(),
            },
            None => format!(
                "sqlite://{}",
                self.data_dir().join(DEFAULT_STATE_FILENAME).display()
            ),
        }
    }

    pub fn database_location(&self) -> DatabaseLocation {
        match self.storage.database.as_deref() {
            Some("memory") => DatabaseLocation::Memory,
            Some(path) => {
                DatabaseLocation::Sqlite(self.resolve_path(path.trim_start_matches("sqlite://")))
            }
            None => DatabaseLocation::Sqlite(self.data_dir().join(DEFAULT_DATABASE_FILENAME)),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            fetch: self.scraper.fetch_options(),
            source_delay_min: Duration::from_secs(self.schedule.source_delay_min_secs),
            source_delay_max: Duration::from_secs(self.schedule.source_delay_max_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.proxy.enabled);
        assert_eq!(config.proxy.block_threshold, 3);
        assert_eq!(config.scraper.max_retries, 3);
        assert_eq!(config.scraper.timeout_ms, 10_000);
        assert_eq!(config.scraper.request_delay_ms, 2_000);
        assert_eq!(config.geocoding.max_requests_per_day, 2_500);
        assert_eq!(config.schedule.initial_delay_secs, 300);
        assert_eq!(config.schedule.interval_secs, 86_400);
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::default().with_overrides_from(lookup(&[
            ("PROXY_ENABLED", "true"),
            ("PROXY_LIST", r#"[{"host":"10.0.0.2","port":3128}]"#),
            ("PROXY_RETRY_ATTEMPTS", "5"),
            ("SCRAPER_TIMEOUT", "2500"),
            ("GEOCODING_USE_PROXY", "1"),
            ("GEOCODING_MAX_REQUESTS_PER_SECOND", "0.5"),
            ("GEOCODING_MAX_REQUESTS_PER_DAY", "100"),
            ("REDIS_URL", "redis://cache:6379"),
        ]));
        assert!(config.proxy.enabled);
        assert_eq!(config.proxy.proxies, vec![Proxy::new("10.0.0.2", 3128)]);
        assert_eq!(config.proxy.block_threshold, 5);
        assert_eq!(config.scraper.timeout_ms, 2500);
        assert!(config.geocoding.use_proxy);
        assert_eq!(config.geocoding.max_requests_per_second, 0.5);
        assert_eq!(config.geocoding.max_requests_per_day, 100);
        assert_eq!(config.state_backend_url(), "redis://cache:6379");
    }

    #[test]
    fn test_bad_env_values_are_ignored() {
        let config = Config::default().with_overrides_from(lookup(&[
            ("PROXY_LIST", "not json"),
            ("SCRAPER_MAX_RETRIES", "many"),
        ]));
        assert!(config.proxy.proxies.is_empty());
        assert_eq!(config.scraper.max_retries, 3);
    }

    #[test]
    fn test_explicit_backend_beats_redis_url() {
        let mut config = Config::default();
        config.storage.state_backend = Some("memory".to_string());
        let config = config.with_overrides_from(lookup(&[("REDIS_URL", "redis://x")]));
        assert_eq!(config.state_backend_url(), "memory");
    }

    #[test]
    fn test_relative_paths_follow_config_file() {
        let config = Config {
            source_path: Some(PathBuf::from("/etc/dirharvest/dirharvest.toml")),
            storage: StorageSettings {
                data_dir: Some("data".to_string()),
                state_backend: Some("sqlite://state/kv.db".to_string()),
                database: None,
            },
            ..Default::default()
        };
        assert_eq!(config.data_dir(), PathBuf::from("/etc/dirharvest/data"));
        assert_eq!(config.state_backend_url(), "sqlite:///etc/dirharvest/state/kv.db");
        assert_eq!(
            config.database_location(),
            DatabaseLocation::Sqlite(PathBuf::from("/etc/dirharvest/data/companies.db"))
        );
    }

    #[test]
    fn test_validate_rejects_bad_sources() {
        use crate::models::SelectorSet;
        let mut config = Config::default();
        config.sources.push(ScrapingSource::new(
            "a",
            "https://a.example/",
            SelectorSet::new(".c", ".n"),
        ));
        assert!(config.validate().is_ok());

        config.sources.push(ScrapingSource::new(
            "a",
            "https://b.example/",
            SelectorSet::new(".c", ".n"),
        ));
        assert!(config.validate().is_err());

        config.sources.pop();
        config.sources.push(ScrapingSource::new(
            "b",
            "https://b.example/",
            SelectorSet::new("div[", ".n"),
        ));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unusable_geocoding_rate() {
        for value in ["1e-30", "-1", "NaN", "inf"] {
            let config = Config::default()
                .with_overrides_from(lookup(&[("GEOCODING_MAX_REQUESTS_PER_SECOND", value)]));
            assert!(config.validate().is_err(), "accepted {}", value);
        }
        for value in ["0", "0.5", "20"] {
            let config = Config::default()
                .with_overrides_from(lookup(&[("GEOCODING_MAX_REQUESTS_PER_SECOND", value)]));
            assert!(config.validate().is_ok(), "rejected {}", value);
        }
    }

    #[test]
    fn test_fatal_statuses_reach_fetch_options() {
        let mut config = Config::default();
        assert!(config.scraper.fetch_options().is_fatal_status(404));

        config.scraper.fatal_statuses.clear();
        let options = config.scraper.fetch_options();
        assert!(!options.is_fatal_status(404));
        assert!(!options.is_fatal_status(410));
    }

    #[test]
    fn test_large_durations_saturate() {
        let mut config = Config::default();
        config.geocoding.cache_ttl_days = u64::MAX;
        config.proxy.block_minutes = u64::MAX;
        assert_eq!(
            config.geocoding.gateway_config().cache_ttl,
            Duration::from_secs(u64::MAX)
        );
        assert_eq!(
            config.proxy.pool_config().block_duration,
            Duration::from_secs(u64::MAX)
        );
    }
}
