//! Egress proxy configuration.

use serde::{Deserialize, Serialize};

/// Default per-minute request quota for a proxy.
pub const DEFAULT_MAX_REQUESTS_PER_MINUTE: u32 = 100;
/// Default per-day request quota for a proxy.
pub const DEFAULT_MAX_REQUESTS_PER_DAY: u32 = 5000;

fn default_max_per_minute() -> u32 {
    DEFAULT_MAX_REQUESTS_PER_MINUTE
}

fn default_max_per_day() -> u32 {
    DEFAULT_MAX_REQUESTS_PER_DAY
}

/// Protocol spoken by the proxy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    #[default]
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks5 => "socks5",
        }
    }
}

/// Basic-auth credentials for a proxy.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// An egress proxy. Immutable once the pool is built.
///
/// Deserializes from the `PROXY_LIST` JSON shape
/// (`{"host", "port", "auth", "maxRequestsPerMinute", "maxRequestsPerDay"}`)
/// as well as snake_case keys from config files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: ProxyProtocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ProxyCredentials>,
    #[serde(
        default = "default_max_per_minute",
        alias = "maxRequestsPerMinute"
    )]
    pub max_requests_per_minute: u32,
    #[serde(default = "default_max_per_day", alias = "maxRequestsPerDay")]
    pub max_requests_per_day: u32,
}

impl Proxy {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: ProxyProtocol::default(),
            auth: None,
            max_requests_per_minute: DEFAULT_MAX_REQUESTS_PER_MINUTE,
            max_requests_per_day: DEFAULT_MAX_REQUESTS_PER_DAY,
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(ProxyCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_quota(mut self, per_minute: u32, per_day: u32) -> Self {
        self.max_requests_per_minute = per_minute;
        self.max_requests_per_day = per_day;
        self
    }

    /// Proxy URL without credentials; auth is applied separately.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol.scheme(), self.host, self.port)
    }

    /// Identity used to match report calls back to their usage record.
    pub fn same_endpoint(&self, other: &Proxy) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl std::fmt::Display for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parse the `PROXY_LIST` JSON array.
pub fn parse_proxy_list(json: &str) -> Result<Vec<Proxy>, serde_json::Error> {
    serde_json::from_str(json)
}
