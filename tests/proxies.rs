//! Proxy probing and rotation through the service.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Duration;

use common::{geocoding_config, pipeline_settings, source, LISTING};
use dirharvest::geocoding::GeocodingGateway;
use dirharvest::http_client::{
    ResilientClient, Transport, TransportError, TransportRequest, TransportResponse,
};
use dirharvest::models::Proxy;
use dirharvest::pipeline::Pipeline;
use dirharvest::proxy_pool::{ProxyPool, ProxyPoolConfig, ProxyStatus};
use dirharvest::repository::InMemoryCompanyRepository;
use dirharvest::service::{HarvestService, ProbeSettings, RunStatus, ServiceParts};
use dirharvest::store::InMemoryStore;

/// Every proxy on port 9999 refuses connections.
#[derive(Default)]
struct Egress {
    routes: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl Transport for Egress {
    async fn get(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        self.routes
            .lock()
            .unwrap()
            .push(request.proxy.as_ref().map(|p| p.to_string()));
        match request.proxy {
            Some(ref p) if p.port == 9999 => Err(TransportError::Connect("refused".to_string())),
            _ if request.url.contains("ipify") => Ok(TransportResponse::new(200, r#"{"ip":"1.2.3.4"}"#)),
            _ => Ok(TransportResponse::new(200, LISTING)),
        }
    }
}

fn service(egress: Arc<Egress>, proxies: Vec<Proxy>) -> HarvestService {
    let pool = Arc::new(ProxyPool::new(proxies, ProxyPoolConfig::default()));
    let client = Arc::new(ResilientClient::builder(pool).transport(egress).build());
    let geocoder = Arc::new(GeocodingGateway::new(
        Arc::clone(&client),
        Arc::new(InMemoryStore::new()),
        geocoding_config(),
    ));
    let pipeline = Pipeline::new(
        Arc::clone(&client),
        Arc::clone(&geocoder),
        Arc::new(InMemoryCompanyRepository::new()),
        pipeline_settings(),
    );
    HarvestService::new(ServiceParts {
        client,
        geocoder,
        pipeline,
        sources: vec![source("dir", "https://dir.test/list")],
        probe: ProbeSettings {
            timeout: Duration::from_secs(2),
            ..Default::default()
        },
    })
}

#[tokio::test(start_paused = true)]
async fn test_startup_check_blocks_dead_proxies() {
    let egress = Arc::new(Egress::default());
    let svc = service(
        egress.clone(),
        vec![Proxy::new("10.0.0.1", 8080), Proxy::new("10.0.0.2", 9999)],
    );

    let started = tokio::time::Instant::now();
    let probes = svc.check_proxies_on_start().await;
    assert_eq!(probes.len(), 2);
    assert!(probes[0].working);
    assert!(!probes[1].working);
    // probes are spaced a second apart
    assert!(started.elapsed() >= Duration::from_secs(1));

    let stats = svc.get_proxy_stats().await;
    assert_eq!(stats[0].status, ProxyStatus::Available);
    assert_eq!(stats[1].status, ProxyStatus::Blocked);

    // probing does not count against quotas
    assert_eq!(stats[0].requests_today, 0);

    egress.routes.lock().unwrap().clear();
    let report = svc.run_scrape_now().await;
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.companies_scraped, 2);

    let listing_route = egress.routes.lock().unwrap()[0].clone();
    assert_eq!(listing_route.as_deref(), Some("10.0.0.1:8080"));
    assert_eq!(report.proxy_stats[0].requests_today, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failing_proxy_is_blocked_and_request_falls_back() {
    let egress = Arc::new(Egress::default());
    let svc = service(egress.clone(), vec![Proxy::new("10.0.0.9", 9999)]);

    // two attempts per fetch: one run reports two failures, a second run blocks it
    svc.run_scrape_now().await;
    let report = svc.run_scrape_now().await;
    assert_eq!(report.proxy_stats[0].status, ProxyStatus::Blocked);

    let report = svc.run_scrape_now().await;
    assert_eq!(report.companies_scraped, 2);
    assert_eq!(egress.routes.lock().unwrap().last().cloned().flatten(), None);
}
