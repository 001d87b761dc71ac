//! In-memory key/value store. State is lost on restart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

use super::{KeyValueStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|t| now < t).unwrap_or(true)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(Instant::now()))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                // a ttl past the clock's range never expires
                expires_at: Instant::now().checked_add(ttl),
            },
        );
        Ok(())
    }

    async fn increment(&self, key: &str) -> StoreResult<u64> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let current = match entries.get(key).filter(|e| e.is_live(now)) {
            Some(e) => e
                .value
                .parse::<u64>()
                .map_err(|err| StoreError::Serialization(format!("{}: {}", key, err)))?,
            None => 0,
        };
        let expires_at = entries.get(key).and_then(|e| e.expires_at).filter(|t| now < *t);
        entries.insert(
            key.to_string(),
            Entry {
                value: (current + 1).to_string(),
                expires_at,
            },
        );
        Ok(current + 1)
    }
}
