//! Resilient HTTP fetching with identity rotation, proxy reservation and
//! bounded exponential backoff.

mod retry;
mod transport;
mod user_agent;

pub use retry::{retry, AttemptOutcome, RetryFailure, RetryPolicy, RetryReport};
pub use transport::{
    BoxedTransport, ReqwestTransport, Transport, TransportError, TransportRequest,
    TransportResponse,
};
pub use user_agent::{IdentityRotator, BROWSER_USER_AGENTS};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::models::Proxy;
use crate::proxy_pool::ProxyPool;

pub const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "pl,en-US;q=0.7,en;q=0.3";

/// Default number of attempts per fetch.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);
/// Default base delay for backoff and inter-request pauses.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(2_000);
/// Statuses treated as permanent for a URL: no retry.
pub const DEFAULT_FATAL_STATUSES: &[u16] = &[404, 410];

/// Result type for fetch operations.
pub type FetchResult<T> = Result<T, FetchError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Fetch exhausted for {url} after {attempts} attempts: {last_error}")]
    Exhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },
    #[error("Fetch rejected for {url}: {reason}")]
    Rejected { url: String, reason: String },
}

impl FetchError {
    pub fn url(&self) -> &str {
        match self {
            Self::Exhausted { url, .. } | Self::Rejected { url, .. } => url,
        }
    }
}

/// Per-call fetch parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub use_proxy: bool,
    pub max_attempts: u32,
    pub timeout: Duration,
    pub base_delay: Duration,
    /// Fixed User-Agent instead of a rotated identity.
    pub user_agent: Option<String>,
    /// Extra headers; these replace defaults with the same name.
    pub headers: Vec<(String, String)>,
    /// Statuses that fail the fetch at once. Empty retries every non-2xx.
    pub fatal_statuses: Vec<u16>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            use_proxy: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: DEFAULT_TIMEOUT,
            base_delay: DEFAULT_BASE_DELAY,
            user_agent: None,
            headers: Vec::new(),
            fatal_statuses: DEFAULT_FATAL_STATUSES.to_vec(),
        }
    }
}

impl FetchOptions {
    pub fn new(max_attempts: u32, timeout: Duration, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            timeout,
            base_delay,
            ..Default::default()
        }
    }

    pub fn use_proxy(mut self, use_proxy: bool) -> Self {
        self.use_proxy = use_proxy;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn fatal_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.fatal_statuses = statuses;
        self
    }

    pub fn is_fatal_status(&self, status: u16) -> bool {
        self.fatal_statuses.contains(&status)
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.base_delay)
    }
}

/// Details of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    pub body: String,
    pub attempts: u32,
    pub backoffs: Vec<Duration>,
    /// Pause taken after the successful attempt.
    pub settle_delay: Duration,
}

/// Result of probing one proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyProbe {
    pub host: String,
    pub port: u16,
    pub working: bool,
    pub response_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fetch client shared by the pipeline and the geocoder.
pub struct ResilientClient {
    transport: BoxedTransport,
    proxies: Arc<ProxyPool>,
    identities: IdentityRotator,
}

/// Builder for `ResilientClient`.
pub struct ResilientClientBuilder {
    proxies: Arc<ProxyPool>,
    transport: Option<BoxedTransport>,
    user_agents: Vec<String>,
}

impl ResilientClientBuilder {
    /// Replace the reqwest transport.
    pub fn transport(mut self, transport: BoxedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Identities to rotate through instead of the built-in list.
    pub fn user_agents(mut self, agents: Vec<String>) -> Self {
        self.user_agents = agents;
        self
    }

    pub fn build(self) -> ResilientClient {
        ResilientClient {
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(ReqwestTransport::new())),
            proxies: self.proxies,
            identities: IdentityRotator::with_agents(self.user_agents),
        }
    }
}

impl ResilientClient {
    pub fn builder(proxies: Arc<ProxyPool>) -> ResilientClientBuilder {
        ResilientClientBuilder {
            proxies,
            transport: None,
            user_agents: Vec::new(),
        }
    }

    pub fn proxies(&self) -> &Arc<ProxyPool> {
        &self.proxies
    }

    /// Fetch `url` and return the body.
    pub async fn fetch(&self, url: &str, options: &FetchOptions) -> FetchResult<String> {
        self.fetch_with_report(url, options)
            .await
            .map(|report| report.body)
    }

    /// Fetch `url`, returning attempt and backoff details with the body.
    pub async fn fetch_with_report(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> FetchResult<FetchReport> {
        let policy = options.policy();
        let outcome = retry(&policy, |attempt| self.attempt(url, options, attempt)).await;

        match outcome {
            Ok(report) => {
                let settle_delay = policy.success_delay();
                debug!("Fetched {} in {} attempt(s), pausing {:?}", url, report.attempts, settle_delay);
                tokio::time::sleep(settle_delay).await;
                Ok(FetchReport {
                    body: report.value,
                    attempts: report.attempts,
                    backoffs: report.backoffs,
                    settle_delay,
                })
            }
            Err(RetryFailure::Exhausted {
                attempts,
                last_error,
            }) => {
                warn!("Giving up on {} after {} attempts: {}", url, attempts, last_error);
                Err(FetchError::Exhausted {
                    url: url.to_string(),
                    attempts,
                    last_error,
                })
            }
            Err(RetryFailure::Fatal { reason, .. }) => {
                warn!("Not retrying {}: {}", url, reason);
                Err(FetchError::Rejected {
                    url: url.to_string(),
                    reason,
                })
            }
        }
    }

    async fn attempt(&self, url: &str, options: &FetchOptions, attempt: u32) -> AttemptOutcome<String> {
        let proxy = if options.use_proxy {
            self.proxies.next().await
        } else {
            None
        };

        let request = TransportRequest {
            url: url.to_string(),
            headers: self.headers(options),
            timeout: options.timeout,
            proxy: proxy.clone(),
        };

        debug!(
            "GET {} (attempt {}/{}, via {})",
            url,
            attempt + 1,
            options.max_attempts,
            proxy.as_ref().map(|p| p.to_string()).unwrap_or_else(|| "direct".to_string())
        );

        let outcome = match self.transport.get(&request).await {
            Ok(response) if response.is_success() => AttemptOutcome::Success(response.body),
            Ok(response) if options.is_fatal_status(response.status) => {
                AttemptOutcome::Fatal(format!("HTTP {}", response.status))
            }
            Ok(response) => AttemptOutcome::Retriable(format!("HTTP {}", response.status)),
            Err(e) if e.is_retriable() => AttemptOutcome::Retriable(e.to_string()),
            Err(e) => AttemptOutcome::Fatal(e.to_string()),
        };

        if let Some(ref proxy) = proxy {
            match &outcome {
                AttemptOutcome::Success(_) => self.proxies.report_success(proxy).await,
                _ => self.proxies.report_failure(proxy).await,
            }
        }

        outcome
    }

    fn headers(&self, options: &FetchOptions) -> Vec<(String, String)> {
        let user_agent = match options.user_agent {
            Some(ref ua) => ua.clone(),
            None => self.identities.next_agent().to_string(),
        };

        let mut headers = vec![
            ("User-Agent".to_string(), user_agent),
            ("Accept".to_string(), DEFAULT_ACCEPT.to_string()),
            ("Accept-Language".to_string(), DEFAULT_ACCEPT_LANGUAGE.to_string()),
            ("Cache-Control".to_string(), "no-cache".to_string()),
            ("Pragma".to_string(), "no-cache".to_string()),
        ];

        for (name, value) in &options.headers {
            headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
            headers.push((name.clone(), value.clone()));
        }
        headers
    }

    /// Single direct request through `proxy`, outside pool accounting.
    pub async fn probe_proxy(&self, proxy: &Proxy, check_url: &str, timeout: Duration) -> ProxyProbe {
        let request = TransportRequest {
            url: check_url.to_string(),
            headers: vec![(
                "User-Agent".to_string(),
                self.identities.next_agent().to_string(),
            )],
            timeout,
            proxy: Some(proxy.clone()),
        };

        let started = Instant::now();
        let result = self.transport.get(&request).await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        let error = match result {
            Ok(response) if response.is_success() => None,
            Ok(response) => Some(format!("HTTP {}", response.status)),
            Err(e) => Some(e.to_string()),
        };

        match error {
            None => info!("[Proxy] {} working ({} ms)", proxy, response_time_ms),
            Some(ref e) => warn!("[Proxy] {} not working: {}", proxy, e),
        }

        ProxyProbe {
            host: proxy.host.clone(),
            port: proxy.port,
            working: error.is_none(),
            response_time_ms,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy_pool::ProxyPoolConfig;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned results and records requests.
    struct Scripted {
        results: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
        seen: Mutex<Vec<TransportRequest>>,
    }

    impl Scripted {
        fn new(results: Vec<Result<TransportResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<TransportRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn get(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Other("script exhausted".into())))
        }
    }

    fn client(transport: Arc<Scripted>, pool: Arc<ProxyPool>) -> ResilientClient {
        ResilientClient::builder(pool).transport(transport).build()
    }

    fn options(attempts: u32) -> FetchOptions {
        FetchOptions::new(attempts, Duration::from_secs(5), Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_with_two_backoffs() {
        let transport = Scripted::new(vec![
            Ok(TransportResponse::new(503, "busy")),
            Err(TransportError::Timeout(Duration::from_secs(5))),
            Ok(TransportResponse::new(200, "payload-3")),
        ]);
        let client = client(transport.clone(), Arc::new(ProxyPool::disabled()));

        let report = client.fetch_with_report("http://x/", &options(3)).await.unwrap();

        assert_eq!(report.body, "payload-3");
        assert_eq!(report.attempts, 3);
        assert_eq!(report.backoffs.len(), 2);
        let policy = options(3).policy();
        assert!(report.backoffs[0] >= policy.backoff_base(0));
        assert!(report.backoffs[1] >= policy.backoff_base(1));
        assert!(report.settle_delay >= Duration::from_millis(100));
        assert!(report.settle_delay < Duration::from_millis(200));
        assert_eq!(transport.seen().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_carries_last_error() {
        let transport = Scripted::new(vec![
            Ok(TransportResponse::new(500, "")),
            Ok(TransportResponse::new(502, "")),
        ]);
        let client = client(transport, Arc::new(ProxyPool::disabled()));

        let err = client.fetch("http://x/", &options(2)).await.unwrap_err();
        assert_eq!(
            err,
            FetchError::Exhausted {
                url: "http://x/".to_string(),
                attempts: 2,
                last_error: "HTTP 502".to_string(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_retried() {
        let transport = Scripted::new(vec![
            Ok(TransportResponse::new(404, "")),
            Ok(TransportResponse::new(200, "never")),
        ]);
        let client = client(transport.clone(), Arc::new(ProxyPool::disabled()));

        let err = client.fetch("http://x/gone", &options(3)).await.unwrap_err();
        assert!(matches!(err, FetchError::Rejected { .. }));
        assert_eq!(transport.seen().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_statuses_are_configurable() {
        let transport = Scripted::new(vec![
            Ok(TransportResponse::new(404, "")),
            Ok(TransportResponse::new(404, "")),
            Ok(TransportResponse::new(403, "")),
        ]);
        let client = client(transport.clone(), Arc::new(ProxyPool::disabled()));

        let retry_all = options(2).fatal_statuses(Vec::new());
        let err = client.fetch("http://x/gone", &retry_all).await.unwrap_err();
        assert!(matches!(err, FetchError::Exhausted { attempts: 2, .. }));
        assert_eq!(transport.seen().len(), 2);

        let forbidden = options(3).fatal_statuses(vec![403]);
        let err = client.fetch("http://x/private", &forbidden).await.unwrap_err();
        assert!(matches!(err, FetchError::Rejected { .. }));
        assert_eq!(transport.seen().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_reported_to_pool() {
        let proxy = Proxy::new("p1", 8080);
        let pool = Arc::new(ProxyPool::new(vec![proxy.clone()], ProxyPoolConfig::default()));
        let transport = Scripted::new(vec![
            Err(TransportError::Connect("refused".into())),
            Err(TransportError::Connect("refused".into())),
            Err(TransportError::Connect("refused".into())),
            Ok(TransportResponse::new(200, "direct")),
        ]);
        let client = client(transport.clone(), pool.clone());

        assert!(client.fetch("http://x/", &options(3)).await.is_err());
        assert!(pool.usage(&proxy).await.unwrap().is_blocked);

        // Blocked pool means the next fetch goes direct
        assert_eq!(client.fetch("http://x/", &options(1)).await.unwrap(), "direct");
        let seen = transport.seen();
        assert!(seen[..3].iter().all(|r| r.proxy.is_some()));
        assert!(seen[3].proxy.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_proxy_failures() {
        let proxy = Proxy::new("p1", 8080);
        let pool = Arc::new(ProxyPool::new(vec![proxy.clone()], ProxyPoolConfig::default()));
        let transport = Scripted::new(vec![
            Ok(TransportResponse::new(500, "")),
            Ok(TransportResponse::new(200, "ok")),
        ]);
        let client = client(transport, pool.clone());

        client.fetch("http://x/", &options(2)).await.unwrap();
        assert_eq!(pool.usage(&proxy).await.unwrap().consecutive_failures, 0);
        assert_eq!(pool.usage(&proxy).await.unwrap().requests_today, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_headers_rotate_and_override() {
        let transport = Scripted::new(vec![
            Ok(TransportResponse::new(200, "a")),
            Ok(TransportResponse::new(200, "b")),
        ]);
        let client = client(transport.clone(), Arc::new(ProxyPool::disabled()));

        client.fetch("http://x/", &options(1)).await.unwrap();
        let fixed = options(1)
            .user_agent("Geocoder/1.0")
            .header("accept-language", "pl");
        client.fetch("http://x/", &fixed).await.unwrap();

        let seen = transport.seen();
        assert!(seen[0].header("User-Agent").unwrap().contains("Mozilla"));
        assert_eq!(seen[0].header("Pragma"), Some("no-cache"));
        assert_eq!(seen[1].header("User-Agent"), Some("Geocoder/1.0"));
        assert_eq!(seen[1].header("Accept-Language"), Some("pl"));
        assert_eq!(
            seen[1]
                .headers
                .iter()
                .filter(|(k, _)| k.eq_ignore_ascii_case("accept-language"))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_proxy_check_reports_failure() {
        let transport = Scripted::new(vec![Err(TransportError::Connect("refused".into()))]);
        let client = client(transport, Arc::new(ProxyPool::disabled()));
        let probe = client
            .probe_proxy(&Proxy::new("dead", 1), "http://check/", Duration::from_secs(1))
            .await;
        assert!(!probe.working);
        assert!(probe.error.is_some());
    }
}
