//! Background scrape scheduling.
//!
//! [`Scheduler::submit`] spawns one tokio task per locator. Tasks wait for one
//! of `concurrency` semaphore permits, run an ingest, and report through a
//! oneshot channel. Each job can be cancelled through its [`ScrapeHandle`];
//! cancellation is seen while waiting for a permit, before each fetch attempt
//! and during retry backoff.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore, oneshot, watch};
use tracing::{Instrument, debug, info_span};
use uuid::Uuid;

use espforge_extractor::{CancelToken, ExtractError};

use crate::ingest::{IngestError, IngestOutcome, Ingestor};

// ---------------------------------------------------------------------------
// Per-key locks
// ---------------------------------------------------------------------------

/// One async mutex per canonical key.
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Drop entries nobody holds or waits on.
            locks.retain(|k, l| k == key || Arc::strong_count(l) > 1);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Final state of a scrape job.
#[derive(Debug)]
pub enum JobOutcome {
    Done(IngestOutcome),
    Failed(IngestError),
    Cancelled,
}

impl JobOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Done(outcome) => outcome.status(),
            Self::Failed(e) => e.kind(),
            Self::Cancelled => "cancelled",
        }
    }
}

/// Cancels one job; detached from its [`ScrapeHandle`] so it can be moved
/// into a signal handler.
#[derive(Clone)]
pub struct Canceller(Arc<watch::Sender<bool>>);

impl Canceller {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Caller's side of a submitted job.
pub struct ScrapeHandle {
    id: String,
    locator: String,
    cancel: Canceller,
    done: oneshot::Receiver<JobOutcome>,
}

impl ScrapeHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Request cancellation. In-flight requests finish; nothing is written.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn canceller(&self) -> Canceller {
        self.cancel.clone()
    }

    /// Wait for the job to finish.
    pub async fn wait(self) -> JobOutcome {
        // The task always reports unless it panicked.
        self.done.await.unwrap_or(JobOutcome::Cancelled)
    }
}

/// Runs scrape jobs with bounded concurrency.
#[derive(Clone)]
pub struct Scheduler {
    ingestor: Arc<Ingestor>,
    permits: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(ingestor: Arc<Ingestor>, concurrency: usize) -> Self {
        Self {
            ingestor,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Start scraping `locator` in the background.
    pub fn submit(&self, locator: impl Into<String>) -> ScrapeHandle {
        let locator = locator.into();
        let id = Uuid::now_v7().to_string();
        let (cancel_tx, cancel) = CancelToken::channel();
        let (done_tx, done) = oneshot::channel();

        let ingestor = Arc::clone(&self.ingestor);
        let permits = Arc::clone(&self.permits);
        let span = info_span!("scrape_job", job_id = %id, locator = %locator);
        let task_locator = locator.clone();

        tokio::spawn(
            async move {
                let outcome = run_job(&ingestor, &permits, &task_locator, &cancel).await;
                debug!(status = outcome.status(), "job finished");
                // The handle may have been dropped; nobody is waiting then.
                let _ = done_tx.send(outcome);
            }
            .instrument(span),
        );

        ScrapeHandle {
            id,
            locator,
            cancel: Canceller(Arc::new(cancel_tx)),
            done,
        }
    }
}

async fn run_job(
    ingestor: &Ingestor,
    permits: &Semaphore,
    locator: &str,
    cancel: &CancelToken,
) -> JobOutcome {
    let _permit = tokio::select! {
        permit = permits.acquire() => match permit {
            Ok(p) => p,
            Err(_) => return JobOutcome::Cancelled,
        },
        () = cancel.cancelled() => return JobOutcome::Cancelled,
    };

    match ingestor.ingest(locator, cancel).await {
        Ok(outcome) => JobOutcome::Done(outcome),
        Err(IngestError::Extract(ExtractError::Cancelled { .. })) => JobOutcome::Cancelled,
        Err(e) => JobOutcome::Failed(e),
    }
}
