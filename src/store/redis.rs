//! Redis key/value store for sharing quota and cache state across processes.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::time::Duration;

use super::{KeyValueStore, StoreError, StoreResult};

/// Prefix applied to every key.
const KEY_PREFIX: &str = "dirharvest:";

pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to `redis_url` (e.g. "redis://localhost:6379").
    pub async fn new(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::Unavailable(format!("Redis connection error: {}", e)))?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            StoreError::Unavailable(format!("Redis connection manager error: {}", e))
        })?;

        Ok(Self { conn })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(self.key(key))
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(self.key(key), value)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        // SETEX rejects a zero TTL
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(self.key(key), value, seconds)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn increment(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        conn.incr(self.key(key), 1u64)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}
