//! Pluggable key/value store for persisted counters and TTL caches.
//!
//! Backends: in-memory (single process), SQLite (survives restarts) and
//! Redis (shared between processes, `redis-backend` feature).

mod memory;
#[cfg(feature = "redis-backend")]
mod redis;
mod sqlite;

pub use memory::InMemoryStore;
#[cfg(feature = "redis-backend")]
pub use self::redis::RedisStore;
pub use sqlite::SqliteStore;
pub(crate) use sqlite::open_db;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Duration;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// String key/value storage with optional expiry.
///
/// Expired entries must read back as absent.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Add one to an integer value (absent counts as 0) and return the result.
    async fn increment(&self, key: &str) -> StoreResult<u64> {
        let current = match self.get(key).await? {
            Some(v) => v
                .parse::<u64>()
                .map_err(|e| StoreError::Serialization(format!("{}: {}", key, e)))?,
            None => 0,
        };
        let next = current + 1;
        self.set(key, &next.to_string()).await?;
        Ok(next)
    }
}

pub type BoxedKeyValueStore = Arc<dyn KeyValueStore>;

/// Which backend to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Sqlite(PathBuf),
    #[cfg(feature = "redis-backend")]
    Redis(String),
}

impl StoreBackend {
    /// Parse `memory`, `sqlite://<path>` or `redis://...`.
    pub fn from_url(url: &str) -> Result<Self, String> {
        if url == "memory" {
            return Ok(Self::Memory);
        }
        if let Some(path) = url.strip_prefix("sqlite://") {
            return Ok(Self::Sqlite(PathBuf::from(shellexpand::tilde(path).as_ref())));
        }
        if url.starts_with("redis://") || url.starts_with("rediss://") {
            #[cfg(feature = "redis-backend")]
            return Ok(Self::Redis(url.to_string()));
            #[cfg(not(feature = "redis-backend"))]
            return Err("Redis store requires the 'redis-backend' feature".to_string());
        }
        Err(format!("Unknown store backend '{}'", url))
    }

    pub async fn open(&self) -> StoreResult<BoxedKeyValueStore> {
        match self {
            Self::Memory => Ok(Arc::new(InMemoryStore::new())),
            Self::Sqlite(path) => Ok(Arc::new(SqliteStore::open(path)?)),
            #[cfg(feature = "redis-backend")]
            Self::Redis(url) => Ok(Arc::new(RedisStore::new(url).await?)),
        }
    }
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Sqlite(path) => write!(f, "sqlite://{}", path.display()),
            #[cfg(feature = "redis-backend")]
            Self::Redis(url) => write!(f, "{}", url),
        }
    }
}
