//! In-memory company repository.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CompanyRepository, RepositoryError, RepositoryResult};
use crate::models::{Company, CompanyChanges};

#[derive(Clone, Default)]
pub struct InMemoryCompanyRepository {
    rows: Arc<RwLock<HashMap<Uuid, Company>>>,
}

impl InMemoryCompanyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl CompanyRepository for InMemoryCompanyRepository {
    async fn find_by_name(&self, name: &str) -> RepositoryResult<Option<Company>> {
        let rows = self.rows.read().await;
        Ok(rows.values().find(|c| c.name == name).cloned())
    }

    async fn insert(&self, company: &Company) -> RepositoryResult<()> {
        let mut rows = self.rows.write().await;
        if rows.values().any(|c| c.name == company.name) {
            return Err(RepositoryError::Duplicate(company.name.clone()));
        }
        rows.insert(company.id, company.clone());
        Ok(())
    }

    async fn update(&self, id: Uuid, changes: &CompanyChanges) -> RepositoryResult<Company> {
        let mut rows = self.rows.write().await;
        let row = rows.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        row.apply(changes);
        Ok(row.clone())
    }

    async fn list(&self) -> RepositoryResult<Vec<Company>> {
        let rows = self.rows.read().await;
        let mut companies: Vec<Company> = rows.values().cloned().collect();
        companies.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(companies)
    }
}
