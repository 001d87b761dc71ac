//! HTTP transport seam: a single GET with timeout, headers and optional proxy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Client;
use tokio::time::Duration;
use tracing::debug;

use crate::models::{Proxy, ProxyProtocol};

/// One outbound GET.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    pub proxy: Option<Proxy>,
}

impl TransportRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn is_retriable(&self) -> bool {
        !matches!(self, TransportError::InvalidRequest(_))
    }
}

/// Anything that can perform a GET.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError>;
}

pub type BoxedTransport = Arc<dyn Transport>;

/// reqwest-backed transport. One client per egress route, built lazily.
pub struct ReqwestTransport {
    clients: Mutex<HashMap<String, Client>>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn route_key(proxy: Option<&Proxy>) -> String {
        match proxy {
            Some(p) => match p.auth {
                Some(ref auth) => format!("{}#{}", p.url(), auth.username),
                None => p.url(),
            },
            None => "direct".to_string(),
        }
    }

    fn build_client(proxy: Option<&Proxy>) -> Result<Client, TransportError> {
        let mut builder = Client::builder().gzip(true).brotli(true);

        if let Some(proxy) = proxy {
            let route = match (&proxy.protocol, &proxy.auth) {
                // SOCKS credentials travel in the URL
                (ProxyProtocol::Socks5, Some(auth)) => reqwest::Proxy::all(format!(
                    "socks5://{}:{}@{}:{}",
                    urlencoding::encode(&auth.username),
                    urlencoding::encode(&auth.password),
                    proxy.host,
                    proxy.port
                )),
                (_, Some(auth)) => reqwest::Proxy::all(proxy.url())
                    .map(|p| p.basic_auth(&auth.username, &auth.password)),
                (_, None) => reqwest::Proxy::all(proxy.url()),
            }
            .map_err(|e| TransportError::InvalidRequest(format!("invalid proxy '{}': {}", proxy, e)))?;
            builder = builder.proxy(route);
        }

        builder
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {}", e)))
    }

    fn client_for(&self, proxy: Option<&Proxy>) -> Result<Client, TransportError> {
        let key = Self::route_key(proxy);
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let client = Self::build_client(proxy)?;
        debug!("Built HTTP client for route {}", key);
        clients.insert(key, client.clone());
        Ok(client)
    }

    fn map_error(err: reqwest::Error, timeout: Duration) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(timeout)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        url::Url::parse(&request.url)
            .map_err(|e| TransportError::InvalidRequest(format!("{}: {}", request.url, e)))?;

        let client = self.client_for(request.proxy.as_ref())?;
        let mut builder = client.get(&request.url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Self::map_error(e, request.timeout))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Self::map_error(e, request.timeout))?;

        Ok(TransportResponse { status, body })
    }
}
