use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tenderflow_core::{CoreError, HealthReport, PlatformProfile, ScrapeJob};
use tenderflow_extract::{ExtractionConfig, ExtractionEngine, LlmProvider, OpenAiClient};
use tenderflow_fetch::{ContentAcquisition, CrawlerClient, HttpFetcher};
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::health::HealthMonitor;
use crate::jobs::{JobStats, JobTracker};
use crate::registry::PlatformRegistry;
use crate::scheduler::{BatchCancel, BatchOptions, BatchOutcome, BatchScheduler, JobSummary, ScrapeError};

/// Application surface over the registry, job tracker, batch scheduler and health monitor.
#[derive(Clone)]
pub struct ScraperService {
    registry: Arc<PlatformRegistry>,
    tracker: Arc<JobTracker>,
    scheduler: BatchScheduler,
    health: HealthMonitor,
    extraction: Arc<ExtractionEngine>,
}

impl ScraperService {
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let registry = match &config.platforms_file {
            Some(path) => PlatformRegistry::from_path(path)?,
            None => PlatformRegistry::embedded()?,
        };

        let http = config.http_client_config();
        let crawler = CrawlerClient::new(&config.crawler_endpoint, &http)
            .context("building crawler client")?;
        let fetcher = HttpFetcher::new(&http).context("building direct fetcher")?;

        let api_key = match &config.openai_api_key {
            Some(key) => key.as_str(),
            None => {
                warn!("OPENAI_API_KEY is not set; extraction will fall back to placeholder records");
                ""
            }
        };
        let llm = OpenAiClient::new(api_key, http.timeout)
            .context("building OpenAI client")?
            .with_base_url(&config.openai_base_url)
            .with_probe_timeout(http.health_timeout);

        info!(
            platforms = registry.len(),
            crawler = %config.crawler_endpoint,
            model = %config.openai_model,
            "scraper service configured"
        );

        Ok(Self::new(
            registry,
            ContentAcquisition::new(Arc::new(crawler), Arc::new(fetcher)),
            Arc::new(llm),
            config.extraction_config(),
            http.health_timeout,
        ))
    }

    /// Assembles the service from already-built seams.
    pub fn new(
        registry: PlatformRegistry,
        acquisition: ContentAcquisition,
        llm: Arc<dyn LlmProvider>,
        extraction_config: ExtractionConfig,
        health_timeout: Duration,
    ) -> Self {
        let registry = Arc::new(registry);
        let tracker = Arc::new(JobTracker::new());
        let health = HealthMonitor::new(Arc::clone(&llm), acquisition.crawler(), health_timeout);
        let extraction = Arc::new(ExtractionEngine::new(llm, extraction_config));
        let scheduler = BatchScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
            acquisition,
            Arc::clone(&extraction),
        );
        Self {
            registry,
            tracker,
            scheduler,
            health,
            extraction,
        }
    }

    pub fn get_platforms(&self) -> &[PlatformProfile] {
        self.registry.get_all()
    }

    pub async fn start_scraping(
        &self,
        platform_id: &str,
        options: &BatchOptions,
    ) -> Result<JobSummary, ScrapeError> {
        self.scheduler.run_single(platform_id, options).await
    }

    pub async fn batch_scrape(&self, platform_ids: &[String], options: &BatchOptions) -> Vec<BatchOutcome> {
        self.scheduler.run_batch(platform_ids, options).await
    }

    pub async fn batch_scrape_with_cancel(
        &self,
        platform_ids: &[String],
        options: &BatchOptions,
        cancel: &BatchCancel,
    ) -> Vec<BatchOutcome> {
        self.scheduler
            .run_batch_with_cancel(platform_ids, options, cancel)
            .await
    }

    pub async fn get_active_jobs(&self) -> Vec<ScrapeJob> {
        self.tracker.list_jobs().await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<ScrapeJob, CoreError> {
        self.tracker.get_job(job_id).await
    }

    pub async fn stop_job(&self, job_id: &str) -> bool {
        let stopped = self.tracker.stop_job(job_id).await;
        if stopped {
            info!(job_id, "job stopped");
        }
        stopped
    }

    pub async fn stop_all_jobs(&self) -> usize {
        let stopped = self.tracker.stop_all().await;
        info!(stopped, "stopped all running jobs");
        stopped
    }

    pub async fn health_check(&self) -> HealthReport {
        let active = self.tracker.active_count().await;
        self.health.check(active, self.registry.len()).await
    }

    pub async fn job_stats(&self) -> JobStats {
        self.tracker.stats().await
    }

    pub fn extraction_fallbacks(&self) -> u64 {
        self.extraction.fallback_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{service, StubCrawler, StubFetcher, StubLlm, ONE_TENDER_REPLY};
    use tenderflow_core::{HealthStatus, JobStatus};

    #[tokio::test]
    async fn lists_every_registered_platform() {
        let svc = service(StubCrawler::ok("<html/>"), StubFetcher::ok(), StubLlm::replying(ONE_TENDER_REPLY));
        assert_eq!(svc.get_platforms().len(), 11);
    }

    #[tokio::test]
    async fn start_scraping_records_the_job() {
        let svc = service(StubCrawler::ok("<html/>"), StubFetcher::ok(), StubLlm::replying(ONE_TENDER_REPLY));
        let summary = svc
            .start_scraping("ted-europa", &BatchOptions::default())
            .await
            .unwrap();

        let job = svc.get_job(&summary.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.records_processed, 1);
        assert_eq!(svc.get_active_jobs().await.len(), 1);
        assert_eq!(svc.job_stats().await.records_processed, 1);
    }

    #[tokio::test]
    async fn unknown_platform_creates_no_job() {
        let svc = service(StubCrawler::ok("<html/>"), StubFetcher::ok(), StubLlm::replying(ONE_TENDER_REPLY));
        let err = svc
            .start_scraping("nope", &BatchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::UnknownPlatform(CoreError::UnknownPlatform(_))));
        assert!(svc.get_active_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn stopping_a_finished_job_is_refused() {
        let svc = service(StubCrawler::ok("<html/>"), StubFetcher::ok(), StubLlm::replying(ONE_TENDER_REPLY));
        let summary = svc
            .start_scraping("simap-ch", &BatchOptions::default())
            .await
            .unwrap();
        assert!(!svc.stop_job(&summary.job_id).await);
        assert_eq!(svc.stop_all_jobs().await, 0);
    }

    #[tokio::test]
    async fn health_check_counts_platforms() {
        let svc = service(StubCrawler::failing(), StubFetcher::ok(), StubLlm::replying(ONE_TENDER_REPLY));
        let report = svc.health_check().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.platform_count, 11);
        assert_eq!(report.active_job_count, 0);
    }

    #[tokio::test]
    async fn malformed_llm_reply_counts_a_fallback() {
        let svc = service(StubCrawler::ok("<html>notice</html>"), StubFetcher::ok(), StubLlm::replying("not json"));
        let summary = svc
            .start_scraping("dtvp-de", &BatchOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.records_processed, 1);
        assert!(summary.data[0].is_placeholder());
        assert_eq!(svc.extraction_fallbacks(), 1);
    }
}
