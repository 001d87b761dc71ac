//! Harvest pipeline: fetch, extract, geocode and upsert each source in turn.
//!
//! Sources are processed strictly one after another with a randomized pause
//! in between. A failing source is logged and skipped; a failing record is
//! logged and skipped.

mod scheduler;

pub use scheduler::{ScheduleConfig, ScheduledJob, Scheduler};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::extractor::extract;
use crate::geocoding::{GeocodeError, GeocodingGateway};
use crate::http_client::{FetchError, FetchOptions, ResilientClient};
use crate::models::{Company, CompanyChanges, Coordinates, PartialCompanyRecord, ScrapingSource};
use crate::repository::{BoxedCompanyRepository, RepositoryResult};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Cancelled")]
    Cancelled,
}

/// Tunables for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub fetch: FetchOptions,
    pub source_delay_min: Duration,
    pub source_delay_max: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fetch: FetchOptions::default(),
            source_delay_min: Duration::from_secs(5),
            source_delay_max: Duration::from_secs(15),
        }
    }
}

impl PipelineSettings {
    fn source_delay(&self) -> Duration {
        let min = self.source_delay_min.as_millis() as u64;
        let max = self.source_delay_max.as_millis() as u64;
        if max <= min {
            return self.source_delay_min;
        }
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Inserted(Uuid),
    Updated(Uuid),
}

/// Per-source result of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source: String,
    pub extracted: usize,
    pub inserted: usize,
    pub updated: usize,
    pub geocoded: usize,
    pub skipped: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceOutcome {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            ..Default::default()
        }
    }

    pub fn persisted(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Result of a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceOutcome>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn companies_scraped(&self) -> usize {
        self.sources.iter().map(|s| s.persisted()).sum()
    }
}

pub struct Pipeline {
    client: Arc<ResilientClient>,
    geocoder: Arc<GeocodingGateway>,
    repository: BoxedCompanyRepository,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        client: Arc<ResilientClient>,
        geocoder: Arc<GeocodingGateway>,
        repository: BoxedCompanyRepository,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            client,
            geocoder,
            repository,
            settings,
        }
    }

    pub fn repository(&self) -> &BoxedCompanyRepository {
        &self.repository
    }

    /// Process every source in order until done or cancelled.
    pub async fn run(&self, sources: &[ScrapingSource], cancel: &CancellationToken) -> RunSummary {
        let started_at = Utc::now();
        let mut outcomes = Vec::with_capacity(sources.len());
        let mut cancelled = false;

        for (idx, source) in sources.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let mut outcome = SourceOutcome::new(&source.name);
            match self.process_source(source, &mut outcome, cancel).await {
                Ok(()) => info!(
                    "Source {}: {} extracted, {} inserted, {} updated, {} skipped",
                    source.name, outcome.extracted, outcome.inserted, outcome.updated, outcome.skipped
                ),
                Err(PipelineError::Cancelled) => {
                    warn!("Source {}: cancelled", source.name);
                    outcome.error = Some(PipelineError::Cancelled.to_string());
                    outcomes.push(outcome);
                    cancelled = true;
                    break;
                }
                Err(e) => {
                    error!("Source {} failed: {}", source.name, e);
                    outcome.error = Some(e.to_string());
                }
            }
            outcomes.push(outcome);

            if idx + 1 < sources.len() {
                let delay = self.settings.source_delay();
                debug!("Waiting {:?} before next source", delay);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        RunSummary {
            started_at,
            finished_at: Utc::now(),
            sources: outcomes,
            cancelled,
        }
    }

    async fn process_source(
        &self,
        source: &ScrapingSource,
        outcome: &mut SourceOutcome,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        info!("Scraping {} ({})", source.name, source.url);

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            body = self.client.fetch(&source.url, &self.settings.fetch) => body?,
        };

        let records = extract(source, &body);
        outcome.extracted = records.len();

        for record in records {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let name = record.name.clone();
            let coordinates = self.enrich(&record).await;
            if coordinates.is_some() {
                outcome.geocoded += 1;
            }

            match self.upsert(record, coordinates).await {
                Ok(UpsertAction::Inserted(_)) => outcome.inserted += 1,
                Ok(UpsertAction::Updated(_)) => outcome.updated += 1,
                Err(e) => {
                    warn!("Skipping company '{}': {}", name, e);
                    outcome.skipped += 1;
                }
            }
        }

        Ok(())
    }

    /// Geocode the record's address. Failures only cost the coordinates.
    async fn enrich(&self, record: &PartialCompanyRecord) -> Option<Coordinates> {
        let address = record.address.as_deref()?;
        match self.geocoder.resolve(address).await {
            Ok(coordinates) => coordinates,
            Err(GeocodeError::RateLimitExceeded { limit }) => {
                warn!(
                    "Geocoding quota ({}/day) reached, storing '{}' without coordinates",
                    limit, record.name
                );
                None
            }
            Err(e) => {
                warn!("Geocoding '{}' failed: {}", address, e);
                None
            }
        }
    }

    /// Insert or update by exact name.
    pub async fn upsert(
        &self,
        record: PartialCompanyRecord,
        coordinates: Option<Coordinates>,
    ) -> RepositoryResult<UpsertAction> {
        let now = Utc::now();
        match self.repository.find_by_name(&record.name).await? {
            Some(existing) => {
                // updated_at must strictly advance even on a coarse clock
                let updated_at = if now > existing.updated_at {
                    now
                } else {
                    existing.updated_at + chrono::Duration::microseconds(1)
                };
                let changes = CompanyChanges::from_record(record, coordinates, updated_at);
                let company = self.repository.update(existing.id, &changes).await?;
                Ok(UpsertAction::Updated(company.id))
            }
            None => {
                let company = Company::from_record(record, coordinates, now);
                self.repository.insert(&company).await?;
                Ok(UpsertAction::Inserted(company.id))
            }
        }
    }
}
