//! Shared fixtures: a scripted transport and a pre-wired service.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::Duration;

use dirharvest::geocoding::{Clock, GeocodingConfig, GeocodingGateway};
use dirharvest::http_client::{
    FetchOptions, ResilientClient, Transport, TransportError, TransportRequest, TransportResponse,
};
use dirharvest::models::{ContactSelectors, ScrapingSource, SelectorSet};
use dirharvest::pipeline::{Pipeline, PipelineSettings};
use dirharvest::proxy_pool::ProxyPool;
use dirharvest::repository::{BoxedCompanyRepository, InMemoryCompanyRepository};
use dirharvest::service::{HarvestService, ProbeSettings, ServiceParts};
use dirharvest::store::{BoxedKeyValueStore, InMemoryStore};

pub const GEO_URL: &str = "https://geo.test";

/// Listing page with two companies, one of them reachable by address.
pub const LISTING: &str = r#"
<html><body>
  <div class="company-item">
    <h2 class="company-name">Clean Co</h2>
    <p class="address">ul. Długa 5, Kraków</p>
    <p class="desc">Sprzątanie biur, od 150 zł, 45 zł/h</p>
    <span class="phone">+48 600 100 200</span>
  </div>
  <div class="company-item">
    <h2 class="company-name">Okno Serwis</h2>
    <p class="desc">Mycie okien</p>
  </div>
</body></html>
"#;

pub const GEO_HIT: &str = r#"[{"lat":"50.0614","lon":"19.9366","display_name":"Długa 5, Kraków"}]"#;

#[derive(Clone)]
pub enum Reply {
    Status(u16, String),
    Error(TransportError),
    /// Wait for the gate, then answer 200.
    Gated(Arc<Notify>, String),
}

/// Transport answering by URL prefix and recording every request.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<(String, Reply)>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(self: &Arc<Self>, prefix: &str, reply: Reply) -> Arc<Self> {
        self.routes
            .lock()
            .unwrap()
            .push((prefix.to_string(), reply));
        Arc::clone(self)
    }

    pub fn ok(self: &Arc<Self>, prefix: &str, body: &str) -> Arc<Self> {
        self.route(prefix, Reply::Status(200, body.to_string()))
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .routes
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| request.url.starts_with(prefix.as_str()))
            .map(|(_, reply)| reply.clone());

        match reply {
            Some(Reply::Status(status, body)) => Ok(TransportResponse::new(status, body)),
            Some(Reply::Error(e)) => Err(e),
            Some(Reply::Gated(gate, body)) => {
                gate.notified().await;
                Ok(TransportResponse::new(200, body))
            }
            None => Ok(TransportResponse::new(404, "not found")),
        }
    }
}

/// Settable wall clock.
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(now)))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

pub fn source(name: &str, url: &str) -> ScrapingSource {
    ScrapingSource::new(
        name,
        url,
        SelectorSet {
            address: Some(".address".to_string()),
            services: Some(".desc".to_string()),
            prices: Some(".desc".to_string()),
            contact: ContactSelectors {
                phone: Some(".phone".to_string()),
                ..Default::default()
            },
            ..SelectorSet::new(".company-item", ".company-name")
        },
    )
}

pub fn client(transport: Arc<ScriptedTransport>) -> Arc<ResilientClient> {
    Arc::new(
        ResilientClient::builder(Arc::new(ProxyPool::disabled()))
            .transport(transport)
            .build(),
    )
}

pub fn geocoding_config() -> GeocodingConfig {
    GeocodingConfig {
        provider_url: GEO_URL.to_string(),
        max_retries: 1,
        retry_delay: Duration::from_millis(1),
        requests_per_second: 0.0,
        ..Default::default()
    }
}

pub fn pipeline_settings() -> PipelineSettings {
    PipelineSettings {
        fetch: FetchOptions::new(2, Duration::from_secs(1), Duration::from_millis(1)),
        source_delay_min: Duration::ZERO,
        source_delay_max: Duration::ZERO,
    }
}

pub struct Harness {
    pub transport: Arc<ScriptedTransport>,
    pub repository: BoxedCompanyRepository,
    pub store: BoxedKeyValueStore,
    pub service: Arc<HarvestService>,
}

/// Wire a service over `transport` with in-memory storage.
pub fn harness(transport: Arc<ScriptedTransport>, sources: Vec<ScrapingSource>) -> Harness {
    harness_with_repository(
        transport,
        sources,
        Arc::new(InMemoryCompanyRepository::new()),
    )
}

/// Same as `harness`, persisting into `repository`.
pub fn harness_with_repository(
    transport: Arc<ScriptedTransport>,
    sources: Vec<ScrapingSource>,
    repository: BoxedCompanyRepository,
) -> Harness {
    let client = client(Arc::clone(&transport));
    let store: BoxedKeyValueStore = Arc::new(InMemoryStore::new());
    let geocoder = Arc::new(GeocodingGateway::new(
        Arc::clone(&client),
        Arc::clone(&store),
        geocoding_config(),
    ));
    let pipeline = Pipeline::new(
        Arc::clone(&client),
        Arc::clone(&geocoder),
        Arc::clone(&repository),
        pipeline_settings(),
    );
    let service = Arc::new(HarvestService::new(ServiceParts {
        client,
        geocoder,
        pipeline,
        sources,
        probe: ProbeSettings {
            interval: Duration::ZERO,
            ..Default::default()
        },
    }));
    Harness {
        transport,
        repository,
        store,
        service,
    }
}
