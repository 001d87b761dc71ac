//! Rate-limited, cached address geocoding.

mod limiter;
mod provider;

pub use limiter::{
    BoxedClock, Clock, QuotaLimiter, QuotaSnapshot, SystemClock, CURRENT_DAY_KEY,
    DAILY_COUNTER_KEY,
};
pub use provider::{cache_key, clean_address, parse_search_response, search_url, DEFAULT_PROVIDER_URL};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::{debug, warn};

use crate::http_client::{FetchError, FetchOptions, ResilientClient};
use crate::models::Coordinates;
use crate::store::{BoxedKeyValueStore, StoreError};

/// How long a resolved coordinate stays cached.
pub const CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
pub const DEFAULT_GEOCODER_USER_AGENT: &str = "DirHarvest/0.3 (business directory geocoding)";

/// Result type for geocoding.
pub type GeocodeResult<T> = Result<T, GeocodeError>;

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("Geocoding daily limit of {limit} requests reached")]
    RateLimitExceeded { limit: u64 },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Geocoding store error: {0}")]
    Store(#[from] StoreError),
    #[error("Invalid geocoding response: {0}")]
    InvalidResponse(String),
}

/// Gateway settings.
#[derive(Debug, Clone)]
pub struct GeocodingConfig {
    pub provider_url: String,
    pub user_agent: String,
    pub accept_language: String,
    pub use_proxy: bool,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub requests_per_second: f64,
    pub requests_per_day: u64,
    pub cache_ttl: Duration,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            provider_url: DEFAULT_PROVIDER_URL.to_string(),
            user_agent: DEFAULT_GEOCODER_USER_AGENT.to_string(),
            accept_language: "pl".to_string(),
            use_proxy: false,
            max_retries: 3,
            retry_delay: Duration::from_millis(2000),
            timeout: Duration::from_millis(5000),
            requests_per_second: 1.0,
            requests_per_day: 2500,
            cache_ttl: CACHE_TTL,
        }
    }
}

impl GeocodingConfig {
    fn fetch_options(&self) -> FetchOptions {
        FetchOptions::new(self.max_retries, self.timeout, self.retry_delay)
            .use_proxy(self.use_proxy)
            .user_agent(self.user_agent.clone())
            .header("Accept", "application/json")
            .header("Accept-Language", self.accept_language.clone())
    }
}

/// Quota usage as reported to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeocodingStats {
    pub daily_requests: u64,
    pub remaining_requests: u64,
    pub last_request_at: Option<DateTime<Utc>>,
}

pub struct GeocodingGateway {
    client: Arc<ResilientClient>,
    cache: BoxedKeyValueStore,
    limiter: QuotaLimiter,
    config: GeocodingConfig,
}

impl GeocodingGateway {
    pub fn new(client: Arc<ResilientClient>, store: BoxedKeyValueStore, config: GeocodingConfig) -> Self {
        Self::with_clock(client, store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        client: Arc<ResilientClient>,
        store: BoxedKeyValueStore,
        config: GeocodingConfig,
        clock: BoxedClock,
    ) -> Self {
        let limiter = QuotaLimiter::new(
            Arc::clone(&store),
            clock,
            config.requests_per_second,
            config.requests_per_day,
        );
        Self {
            client,
            cache: store,
            limiter,
            config,
        }
    }

    /// Resolve an address to coordinates.
    ///
    /// Cache hits cost no quota. `Ok(None)` means the provider had no match.
    pub async fn resolve(&self, address: &str) -> GeocodeResult<Option<Coordinates>> {
        let query = clean_address(address);
        if query.is_empty() {
            return Ok(None);
        }
        let key = cache_key(&query);

        if let Some(coordinates) = self.cached(&key).await {
            debug!("Geocoding cache hit for '{}'", query);
            return Ok(Some(coordinates));
        }

        let used = self.limiter.acquire().await?;
        debug!(
            "Geocoding '{}' ({}/{} today)",
            query, used, self.config.requests_per_day
        );

        let url = search_url(&self.config.provider_url, &query);
        let body = self.client.fetch(&url, &self.config.fetch_options()).await?;

        let result = parse_search_response(&body)?;
        match result {
            Some(coordinates) => self.remember(&key, coordinates).await,
            None => debug!("No geocoding match for '{}'", query),
        }
        Ok(result)
    }

    async fn cached(&self, key: &str) -> Option<Coordinates> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(coordinates) => Some(coordinates),
                Err(e) => {
                    warn!("Ignoring unreadable cache entry {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Geocoding cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    async fn remember(&self, key: &str, coordinates: Coordinates) {
        let raw = match serde_json::to_string(&coordinates) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Could not serialize coordinates for {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self
            .cache
            .set_with_expiry(key, &raw, self.config.cache_ttl)
            .await
        {
            warn!("Geocoding cache write failed for {}: {}", key, e);
        }
    }

    /// Read-only quota snapshot.
    pub async fn stats(&self) -> GeocodeResult<GeocodingStats> {
        let snapshot = self.limiter.snapshot().await?;
        Ok(GeocodingStats {
            daily_requests: snapshot.daily_requests,
            remaining_requests: snapshot.remaining_requests,
            last_request_at: snapshot.last_request_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{Transport, TransportError, TransportRequest, TransportResponse};
    use crate::proxy_pool::ProxyPool;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Provider {
        calls: AtomicUsize,
        body: &'static str,
    }

    #[async_trait]
    impl Transport for Provider {
        async fn get(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(request.url.contains("format=json&limit=1"));
            Ok(TransportResponse::new(200, self.body))
        }
    }

    fn gateway(body: &'static str, config: GeocodingConfig) -> (GeocodingGateway, Arc<Provider>) {
        let provider = Arc::new(Provider {
            calls: AtomicUsize::new(0),
            body,
        });
        let client = ResilientClient::builder(Arc::new(ProxyPool::disabled()))
            .transport(provider.clone())
            .build();
        let store: BoxedKeyValueStore = Arc::new(InMemoryStore::new());
        (GeocodingGateway::new(Arc::new(client), store, config), provider)
    }

    fn fast_config() -> GeocodingConfig {
        GeocodingConfig {
            retry_delay: Duration::from_millis(1),
            requests_per_second: 0.0,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_match_is_none_and_not_cached() {
        let (gateway, provider) = gateway("[]", fast_config());
        assert_eq!(gateway.resolve("Nowhere 0").await.unwrap(), None);
        assert_eq!(gateway.resolve("Nowhere 0").await.unwrap(), None);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_address_skips_lookup() {
        let (gateway, provider) = gateway("[]", fast_config());
        assert_eq!(gateway.resolve("   ").await.unwrap(), None);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(gateway.stats().await.unwrap().daily_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_track_usage() {
        let (gateway, _) = gateway(r#"[{"lat":"1.5","lon":"2.5"}]"#, GeocodingConfig {
            requests_per_day: 5,
            ..fast_config()
        });
        gateway.resolve("A 1").await.unwrap();
        gateway.resolve("B 2").await.unwrap();
        let stats = gateway.stats().await.unwrap();
        assert_eq!(stats.daily_requests, 2);
        assert_eq!(stats.remaining_requests, 3);
        assert!(stats.last_request_at.is_some());
    }
}
