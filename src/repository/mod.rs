//! Company storage keyed by business name.

mod memory;
mod sqlite;

pub use memory::InMemoryCompanyRepository;
pub use sqlite::SqliteCompanyRepository;

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Company, CompanyChanges};

/// Result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Company not found: {0}")]
    NotFound(Uuid),
    #[error("Company already exists: {0}")]
    Duplicate(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(e: rusqlite::Error) -> Self {
        RepositoryError::Database(e.to_string())
    }
}

impl From<crate::store::StoreError> for RepositoryError {
    fn from(e: crate::store::StoreError) -> Self {
        match e {
            crate::store::StoreError::Database(message) => RepositoryError::Database(message),
            other => RepositoryError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(e: serde_json::Error) -> Self {
        RepositoryError::Serialization(e.to_string())
    }
}

/// Upsert-capable company storage.
#[async_trait]
pub trait CompanyRepository: Send + Sync {
    /// Exact, case-sensitive name match.
    async fn find_by_name(&self, name: &str) -> RepositoryResult<Option<Company>>;

    async fn insert(&self, company: &Company) -> RepositoryResult<()>;

    /// Apply `changes` to the row with `id` and return the updated row.
    async fn update(&self, id: Uuid, changes: &CompanyChanges) -> RepositoryResult<Company>;

    async fn list(&self) -> RepositoryResult<Vec<Company>>;
}

pub type BoxedCompanyRepository = Arc<dyn CompanyRepository>;
