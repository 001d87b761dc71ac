//! SQLite key/value store. Survives restarts; expiry is checked on read.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::time::Duration;
use tracing::debug;

use super::{KeyValueStore, StoreError, StoreResult};

/// Open a database connection with proper concurrency settings, creating
/// the parent directory first.
pub(crate) fn open_db(db_path: &Path) -> StoreResult<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Database(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
    }
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 30000;
    "#,
    )?;
    Ok(conn)
}

fn init_kv_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at INTEGER
        );
    "#,
    )
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = open_db(path)?;
        init_kv_table(&conn)?;
        debug!("Opened key/value store at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_kv_table(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("store connection poisoned".to_string()))
    }

    fn read_live(conn: &Connection, key: &str, now_ms: i64) -> StoreResult<Option<String>> {
        let value = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
                params![key, now_ms],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.lock()?;
        Self::read_live(&conn, key, Utc::now().timestamp_millis())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv_store (key, value, expires_at) VALUES (?, ?, NULL)",
            params![key, value],
        )?;
        Ok(())
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_ms);
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv_store (key, value, expires_at) VALUES (?, ?, ?)",
            params![key, value, expires_at],
        )?;
        Ok(())
    }

    async fn increment(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let current = match Self::read_live(&tx, key, Utc::now().timestamp_millis())? {
            Some(v) => v
                .parse::<u64>()
                .map_err(|e| StoreError::Serialization(format!("{}: {}", key, e)))?,
            None => 0,
        };
        let next = current + 1;
        tx.execute(
            "INSERT OR REPLACE INTO kv_store (key, value, expires_at) VALUES (?, ?, NULL)",
            params![key, next.to_string()],
        )?;
        tx.commit()?;
        Ok(next)
    }
}
