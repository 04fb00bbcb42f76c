use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tenderflow_core::{CoreError, JobStatus, PlatformProfile, RawContent, TenderRecord};
use tenderflow_extract::ExtractionEngine;
use tenderflow_fetch::{AcquisitionError, BackoffPolicy, ContentAcquisition, CrawlOverrides};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, info_span, warn, Instrument};

use crate::jobs::{JobTracker, JobUpdate};
use crate::registry::PlatformRegistry;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub concurrency: usize,
    /// Pause between chunks, not applied after the last one.
    pub per_batch_delay: Duration,
    pub crawl_overrides: CrawlOverrides,
    /// Repeat failed acquisitions up to the platform's `maxRetries`.
    pub retry_acquisition: bool,
    /// Wait at least the platform's `rateLimitMs` before each repeat.
    pub respect_rate_limit: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 3,
            per_batch_delay: Duration::from_millis(5000),
            crawl_overrides: CrawlOverrides::new(),
            retry_acquisition: false,
            respect_rate_limit: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: String,
    pub platform_id: String,
    pub status: JobStatus,
    pub records_processed: usize,
    pub data: Vec<TenderRecord>,
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    UnknownPlatform(#[from] CoreError),
    #[error("job {job_id} failed: {source}")]
    Acquisition {
        job_id: String,
        #[source]
        source: AcquisitionError,
    },
    #[error("job {job_id} was stopped before completion")]
    Stopped { job_id: String },
}

impl ScrapeError {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::UnknownPlatform(_) => None,
            Self::Acquisition { job_id, .. } | Self::Stopped { job_id } => Some(job_id),
        }
    }
}

/// One entry of a batch result, always in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum BatchOutcome {
    Completed {
        job_id: String,
        platform_id: String,
        records_processed: usize,
        data: Vec<TenderRecord>,
    },
    Failed {
        platform_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
        error: String,
    },
    Stopped {
        job_id: String,
        platform_id: String,
    },
}

impl BatchOutcome {
    pub fn platform_id(&self) -> &str {
        match self {
            Self::Completed { platform_id, .. }
            | Self::Failed { platform_id, .. }
            | Self::Stopped { platform_id, .. } => platform_id,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Self::Completed { .. } => JobStatus::Completed,
            Self::Failed { .. } => JobStatus::Failed,
            Self::Stopped { .. } => JobStatus::Stopped,
        }
    }

    fn from_result(platform_id: &str, result: Result<JobSummary, ScrapeError>) -> Self {
        match result {
            Ok(summary) => Self::Completed {
                job_id: summary.job_id,
                platform_id: summary.platform_id,
                records_processed: summary.records_processed,
                data: summary.data,
            },
            Err(ScrapeError::Stopped { job_id }) => Self::Stopped {
                job_id,
                platform_id: platform_id.to_string(),
            },
            Err(err) => Self::Failed {
                platform_id: platform_id.to_string(),
                job_id: err.job_id().map(str::to_string),
                error: err.to_string(),
            },
        }
    }
}

/// Cancels the inter-chunk delay and every chunk not yet started.
#[derive(Debug, Clone)]
pub struct BatchCancel {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for BatchCancel {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchCancel {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[derive(Clone)]
pub struct BatchScheduler {
    registry: Arc<PlatformRegistry>,
    tracker: Arc<JobTracker>,
    acquisition: ContentAcquisition,
    extraction: Arc<ExtractionEngine>,
}

impl BatchScheduler {
    pub fn new(
        registry: Arc<PlatformRegistry>,
        tracker: Arc<JobTracker>,
        acquisition: ContentAcquisition,
        extraction: Arc<ExtractionEngine>,
    ) -> Self {
        Self {
            registry,
            tracker,
            acquisition,
            extraction,
        }
    }

    pub async fn run_batch(&self, platform_ids: &[String], options: &BatchOptions) -> Vec<BatchOutcome> {
        self.run_batch_with_cancel(platform_ids, options, &BatchCancel::new())
            .await
    }

    pub async fn run_batch_with_cancel(
        &self,
        platform_ids: &[String],
        options: &BatchOptions,
        cancel: &BatchCancel,
    ) -> Vec<BatchOutcome> {
        let chunk_size = options.concurrency.max(1);
        let chunk_count = platform_ids.len().div_ceil(chunk_size);
        let mut outcomes = Vec::with_capacity(platform_ids.len());

        for (index, chunk) in platform_ids.chunks(chunk_size).enumerate() {
            if cancel.is_cancelled() {
                outcomes.extend(chunk.iter().map(|id| BatchOutcome::Failed {
                    platform_id: id.clone(),
                    job_id: None,
                    error: "batch cancelled".to_string(),
                }));
                continue;
            }

            info!(chunk = index + 1, of = chunk_count, size = chunk.len(), "starting batch chunk");
            let results = join_all(chunk.iter().map(|id| self.run_single(id, options))).await;
            outcomes.extend(
                chunk
                    .iter()
                    .zip(results)
                    .map(|(id, result)| BatchOutcome::from_result(id, result)),
            );

            if index + 1 < chunk_count && !options.per_batch_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(options.per_batch_delay) => {}
                    _ = cancel.cancelled() => {
                        warn!(after_chunk = index + 1, "batch cancelled during pacing delay");
                    }
                }
            }
        }

        outcomes
    }

    /// Runs one platform job end to end: create, acquire, extract, record.
    pub async fn run_single(&self, platform_id: &str, options: &BatchOptions) -> Result<JobSummary, ScrapeError> {
        let platform = self.registry.get_by_id(platform_id)?.clone();
        let job_id = self.tracker.create_job(&platform.id).await;
        let span = info_span!("scrape_job", %job_id, platform_id = %platform.id);
        self.execute(platform, job_id, options).instrument(span).await
    }

    async fn execute(
        &self,
        platform: PlatformProfile,
        job_id: String,
        options: &BatchOptions,
    ) -> Result<JobSummary, ScrapeError> {
        let raw = match self.acquire(&platform, &job_id, options).await {
            Ok(raw) => raw,
            Err(source) => {
                if !self.tracker.update_job(&job_id, JobUpdate::failed(source.to_string())).await {
                    return Err(ScrapeError::Stopped { job_id });
                }
                warn!(error = %source, "job failed");
                return Err(ScrapeError::Acquisition { job_id, source });
            }
        };
        self.tracker.update_job(&job_id, JobUpdate::progress(50)).await;

        let records = self.extraction.extract(&raw, &platform).await;
        let records_processed = records.len();
        if !self
            .tracker
            .update_job(&job_id, JobUpdate::completed(records.clone()))
            .await
        {
            info!("job stopped while in flight, discarding result");
            return Err(ScrapeError::Stopped { job_id });
        }

        info!(records_processed, "job completed");
        Ok(JobSummary {
            job_id,
            platform_id: platform.id,
            status: JobStatus::Completed,
            records_processed,
            data: records,
        })
    }

    async fn acquire(
        &self,
        platform: &PlatformProfile,
        job_id: &str,
        options: &BatchOptions,
    ) -> Result<RawContent, AcquisitionError> {
        let policy = if options.retry_acquisition {
            BackoffPolicy::with_max_retries(platform.scraper_config.max_retries)
        } else {
            BackoffPolicy::with_max_retries(0)
        };

        let mut attempt = 0;
        loop {
            match self.acquisition.acquire(platform, &options.crawl_overrides).await {
                Ok(raw) => return Ok(raw),
                Err(err) if attempt < policy.max_retries && self.tracker.is_running(job_id).await => {
                    let mut delay = policy.delay_for_attempt(attempt);
                    if options.respect_rate_limit {
                        delay = delay.max(Duration::from_millis(platform.scraper_config.rate_limit_ms));
                    }
                    warn!(attempt = attempt + 1, max = policy.max_retries, ?delay, error = %err, "retrying acquisition");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
