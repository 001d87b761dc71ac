//! SQLite company repository.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use super::{CompanyRepository, RepositoryError, RepositoryResult};
use crate::models::{Company, CompanyChanges, Contact, Coordinates, Prices};
use crate::store::open_db;

const COLUMNS: &str = "id, name, address, lat, lng, services, base_price, price_per_hour, \
                       minimum_hours, contact, created_at, updated_at";

fn init_companies_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS companies (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            address TEXT,
            lat REAL,
            lng REAL,
            services TEXT NOT NULL DEFAULT '[]',
            base_price INTEGER NOT NULL DEFAULT 0,
            price_per_hour INTEGER NOT NULL DEFAULT 0,
            minimum_hours INTEGER,
            contact TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
    "#,
    )
}

/// Raw column values before JSON/date decoding.
struct RawRow {
    id: String,
    name: String,
    address: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
    services: String,
    base_price: i64,
    price_per_hour: i64,
    minimum_hours: Option<i64>,
    contact: String,
    created_at: String,
    updated_at: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            address: row.get(2)?,
            lat: row.get(3)?,
            lng: row.get(4)?,
            services: row.get(5)?,
            base_price: row.get(6)?,
            price_per_hour: row.get(7)?,
            minimum_hours: row.get(8)?,
            contact: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_company(self) -> RepositoryResult<Company> {
        let parse_time = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| RepositoryError::Serialization(format!("bad timestamp '{}': {}", s, e)))
        };
        let coordinates = match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(Coordinates::new(lat, lng)),
            _ => None,
        };
        Ok(Company {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| RepositoryError::Serialization(e.to_string()))?,
            name: self.name,
            address: self.address,
            coordinates,
            services: serde_json::from_str(&self.services)?,
            prices: Prices {
                base_price: self.base_price.max(0) as u32,
                price_per_hour: self.price_per_hour.max(0) as u32,
                minimum_hours: self.minimum_hours.map(|h| h.max(0) as u32),
            },
            contact: serde_json::from_str::<Contact>(&self.contact)?,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

#[derive(Clone)]
pub struct SqliteCompanyRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCompanyRepository {
    pub fn open(path: &Path) -> RepositoryResult<Self> {
        let conn = open_db(path)?;
        init_companies_table(&conn)?;
        debug!("Opened company database at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> RepositoryResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_companies_table(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RepositoryError::Database("connection poisoned".to_string()))
    }

    fn select_one(
        conn: &Connection,
        clause: &str,
        value: &str,
    ) -> RepositoryResult<Option<Company>> {
        let sql = format!("SELECT {} FROM companies WHERE {} = ?", COLUMNS, clause);
        let raw = conn
            .query_row(&sql, params![value], RawRow::from_row)
            .optional()?;
        raw.map(RawRow::into_company).transpose()
    }

    fn write(conn: &Connection, company: &Company) -> RepositoryResult<usize> {
        let services = serde_json::to_string(&company.services)?;
        let contact = serde_json::to_string(&company.contact)?;
        let changed = conn.execute(
            r#"INSERT OR REPLACE INTO companies
               (id, name, address, lat, lng, services, base_price, price_per_hour,
                minimum_hours, contact, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                company.id.to_string(),
                company.name,
                company.address,
                company.coordinates.map(|c| c.lat),
                company.coordinates.map(|c| c.lng),
                services,
                company.prices.base_price as i64,
                company.prices.price_per_hour as i64,
                company.prices.minimum_hours.map(|h| h as i64),
                contact,
                company.created_at.to_rfc3339(),
                company.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(changed)
    }
}

#[async_trait]
impl CompanyRepository for SqliteCompanyRepository {
    async fn find_by_name(&self, name: &str) -> RepositoryResult<Option<Company>> {
        let conn = self.lock()?;
        Self::select_one(&conn, "name", name)
    }

    async fn insert(&self, company: &Company) -> RepositoryResult<()> {
        let conn = self.lock()?;
        if Self::select_one(&conn, "name", &company.name)?.is_some() {
            return Err(RepositoryError::Duplicate(company.name.clone()));
        }
        Self::write(&conn, company)?;
        Ok(())
    }

    async fn update(&self, id: Uuid, changes: &CompanyChanges) -> RepositoryResult<Company> {
        let conn = self.lock()?;
        let mut company = Self::select_one(&conn, "id", &id.to_string())?
            .ok_or(RepositoryError::NotFound(id))?;
        company.apply(changes);
        Self::write(&conn, &company)?;
        Ok(company)
    }

    async fn list(&self) -> RepositoryResult<Vec<Company>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM companies ORDER BY name", COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map([], RawRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter().map(RawRow::into_company).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PartialCompanyRecord;
    use tempfile::tempdir;

    fn record() -> PartialCompanyRecord {
        let mut record = PartialCompanyRecord::new("Clean Co");
        record.address = Some("Main St 1, Kraków".to_string());
        record.services.insert("window washing".to_string());
        record.prices = Some(Prices {
            base_price: 100,
            price_per_hour: 0,
            minimum_hours: None,
        });
        record.contact.phone = Some("+48 123".to_string());
        record
    }

    #[tokio::test]
    async fn test_insert_find_round_trip() {
        let repo = SqliteCompanyRepository::in_memory().unwrap();
        let company = Company::from_record(record(), Some(Coordinates::new(50.06, 19.94)), Utc::now());
        repo.insert(&company).await.unwrap();

        let found = repo.find_by_name("Clean Co").await.unwrap().unwrap();
        assert_eq!(found.id, company.id);
        assert_eq!(found.coordinates, company.coordinates);
        assert!(found.services.contains("window washing"));
        assert_eq!(found.prices.base_price, 100);
        assert_eq!(found.contact.phone.as_deref(), Some("+48 123"));
        assert!(repo.find_by_name("clean co").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_persists_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("companies.db");
        let company = Company::from_record(record(), None, Utc::now());
        {
            let repo = SqliteCompanyRepository::open(&path).unwrap();
            repo.insert(&company).await.unwrap();
            let later = company.updated_at + chrono::Duration::seconds(1);
            let changes = CompanyChanges::from_record(
                PartialCompanyRecord::new("Clean Co"),
                Some(Coordinates::new(1.0, 2.0)),
                later,
            );
            let updated = repo.update(company.id, &changes).await.unwrap();
            assert_eq!(updated.updated_at, later);
        }
        let repo = SqliteCompanyRepository::open(&path).unwrap();
        let rows = repo.list().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].coordinates, Some(Coordinates::new(1.0, 2.0)));
        assert_eq!(rows[0].address, company.address);
        assert!(rows[0].updated_at > rows[0].created_at);
    }

    #[test]
    fn test_open_reports_uncreatable_directory() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        match SqliteCompanyRepository::open(&blocker.join("companies.db")) {
            Err(RepositoryError::Database(message)) => assert!(message.contains("cannot create")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("opened a database under a regular file"),
        }
    }
}
