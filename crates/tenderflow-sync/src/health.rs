use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tenderflow_core::{HealthReport, HealthStatus, ServiceStatus};
use tenderflow_extract::LlmProvider;
use tenderflow_fetch::Crawler;
use tracing::{debug, warn};

pub const OPENAI_SERVICE: &str = "openai";
pub const CRAWLER_SERVICE: &str = "crawl4ai";

/// Probes the external dependencies. A failed probe degrades the report, it never fails it.
#[derive(Clone)]
pub struct HealthMonitor {
    llm: Arc<dyn LlmProvider>,
    crawler: Arc<dyn Crawler>,
    timeout: Duration,
}

impl HealthMonitor {
    pub fn new(llm: Arc<dyn LlmProvider>, crawler: Arc<dyn Crawler>, timeout: Duration) -> Self {
        Self {
            llm,
            crawler,
            timeout,
        }
    }

    pub async fn check(&self, active_job_count: usize, platform_count: usize) -> HealthReport {
        let (openai, crawler) = tokio::join!(
            probe(OPENAI_SERVICE, self.timeout, async {
                self.llm.list_models().await.map(|_| ()).map_err(|e| e.to_string())
            }),
            probe(CRAWLER_SERVICE, self.timeout, async {
                self.crawler.health().await.map_err(|e| e.to_string())
            }),
        );

        let status = if openai == ServiceStatus::Healthy && crawler == ServiceStatus::Healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        let mut services = BTreeMap::new();
        services.insert(OPENAI_SERVICE.to_string(), openai);
        services.insert(CRAWLER_SERVICE.to_string(), crawler);

        HealthReport {
            status,
            timestamp: Utc::now(),
            services,
            active_job_count,
            platform_count,
        }
    }
}

async fn probe<F>(service: &str, timeout: Duration, call: F) -> ServiceStatus
where
    F: Future<Output = Result<(), String>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(())) => {
            debug!(service, "health probe ok");
            ServiceStatus::Healthy
        }
        Ok(Err(error)) => {
            warn!(service, %error, "health probe failed");
            ServiceStatus::Error
        }
        Err(_) => {
            warn!(service, ?timeout, "health probe timed out");
            ServiceStatus::Error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubCrawler, StubLlm};

    #[tokio::test]
    async fn both_probes_ok_is_healthy() {
        let monitor = HealthMonitor::new(
            Arc::new(StubLlm::replying("{}")),
            Arc::new(StubCrawler::ok("<html/>")),
            Duration::from_secs(5),
        );
        let report = monitor.check(0, 11).await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.services[OPENAI_SERVICE], ServiceStatus::Healthy);
        assert_eq!(report.services[CRAWLER_SERVICE], ServiceStatus::Healthy);
        assert_eq!(report.platform_count, 11);
    }

    #[tokio::test]
    async fn crawler_down_degrades_without_failing() {
        let monitor = HealthMonitor::new(
            Arc::new(StubLlm::replying("{}")),
            Arc::new(StubCrawler::failing()),
            Duration::from_secs(5),
        );
        let report = monitor.check(2, 11).await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.services[OPENAI_SERVICE], ServiceStatus::Healthy);
        assert_eq!(report.services[CRAWLER_SERVICE], ServiceStatus::Error);
        assert_eq!(report.active_job_count, 2);
    }

    #[tokio::test]
    async fn everything_down_is_still_only_degraded() {
        let monitor = HealthMonitor::new(
            Arc::new(StubLlm::failing()),
            Arc::new(StubCrawler::failing()),
            Duration::from_secs(5),
        );
        let report = monitor.check(0, 0).await;
        assert_eq!(report.status, HealthStatus::Degraded);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["services"]["crawl4ai"], "error");
    }
}
