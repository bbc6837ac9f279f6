//! Extractor → Normalizer → catalog store, for one locator.
//!
//! The stored checksum is read without a lock as a hint for the extractor.
//! After the network work is done, the per-key lock is taken and held from
//! re-reading the stored component through the write, so two scrapes of the
//! same component never interleave their writes. A cancelled scrape never writes.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use espforge_extractor::{CancelToken, ExtractError, ExtractOutcome, Extractor};
use espforge_shared::EspforgeError;
use espforge_storage::Storage;

use crate::jobs::KeyLocks;
use crate::normalizer::{self, NormalizeOutcome};

/// What one successful ingest did to the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Created { key: String },
    Updated { key: String },
    /// Content unchanged; only `checked_at` moved.
    Unchanged { key: String },
}

impl IngestOutcome {
    pub fn key(&self) -> &str {
        match self {
            Self::Created { key } | Self::Updated { key } | Self::Unchanged { key } => key,
        }
    }

    /// Status label recorded in scrape job history.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Updated { .. } => "updated",
            Self::Unchanged { .. } => "unchanged",
        }
    }
}

/// Why an ingest failed.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Store(#[from] EspforgeError),
}

impl IngestError {
    /// Status label recorded in scrape job history.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Extract(e) => e.kind(),
            Self::Store(_) => "storage",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Extract(ExtractError::Cancelled { .. }))
    }
}

/// Runs single-locator ingests against one store.
pub struct Ingestor {
    extractor: Extractor,
    storage: Arc<Storage>,
    locks: KeyLocks,
}

impl Ingestor {
    pub fn new(extractor: Extractor, storage: Arc<Storage>) -> Self {
        Self {
            extractor,
            storage,
            locks: KeyLocks::default(),
        }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Scrape `locator` into the catalog and record the attempt in job history.
    #[instrument(skip_all, fields(locator = %locator))]
    pub async fn ingest(
        &self,
        locator: &str,
        cancel: &CancelToken,
    ) -> Result<IngestOutcome, IngestError> {
        let job_id = self.storage.insert_scrape_job(locator).await?;
        let result = self.run(locator, cancel).await;

        let (status, key, error) = match &result {
            Ok(outcome) => (outcome.status(), Some(outcome.key()), None),
            Err(e) => (e.kind(), None, Some(e.to_string())),
        };
        if let Err(e) = self
            .storage
            .finish_scrape_job(&job_id, status, key, error.as_deref())
            .await
        {
            warn!(%job_id, error = %e, "failed to record scrape job result");
        }

        match &result {
            Ok(outcome) => info!(key = %outcome.key(), status, "ingest finished"),
            Err(e) => warn!(status, error = %e, "ingest failed"),
        }
        result
    }

    async fn run(&self, locator: &str, cancel: &CancelToken) -> Result<IngestOutcome, IngestError> {
        let key = normalizer::canonical_key(locator).map_err(|e| ExtractError::InvalidLocator {
            locator: locator.to_string(),
            reason: e.to_string(),
        })?;

        // Hint only; re-checked under the key lock.
        let previous = self
            .storage
            .get_component(&key)
            .await?
            .map(|c| c.checksum);

        let extracted = self
            .extractor
            .extract(locator, previous.as_deref(), cancel)
            .await?;

        let _guard = self.locks.lock(&key).await;
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled {
                url: locator.to_string(),
            }
            .into());
        }

        let stored = self.storage.get_component(&key).await?;
        let now = Utc::now();

        let raw = match extracted {
            ExtractOutcome::Unchanged { checksum } => {
                match stored {
                    Some(s) if s.checksum == checksum => {
                        self.storage.touch_checked(&key, now).await?;
                    }
                    _ => debug!(%key, "stored record changed while fetching; leaving it"),
                }
                return Ok(IngestOutcome::Unchanged { key });
            }
            ExtractOutcome::Extracted(raw) => raw,
        };

        match normalizer::normalize(&raw, stored.as_ref(), now)? {
            NormalizeOutcome::Unchanged { key, .. } => {
                self.storage.touch_checked(&key, now).await?;
                Ok(IngestOutcome::Unchanged { key })
            }
            NormalizeOutcome::Created(component) => {
                self.storage.write_component(&component).await?;
                Ok(IngestOutcome::Created { key: component.key })
            }
            NormalizeOutcome::Updated(component) => {
                self.storage.write_component(&component).await?;
                Ok(IngestOutcome::Updated { key: component.key })
            }
        }
    }
}
