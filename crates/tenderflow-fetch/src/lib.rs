//! Content acquisition for tender platforms: AI-assisted crawl with a direct HTTP fallback.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value as JsonValue};
use tenderflow_core::{ContentOrigin, PlatformProfile, RawContent};
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

pub const CRATE_NAME: &str = "tenderflow-fetch";

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Caller-supplied keys merged over the fixed crawl request.
pub type CrawlOverrides = Map<String, JsonValue>;

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub health_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            health_timeout: Duration::from_secs(5),
            user_agent: BROWSER_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries as usize,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error("crawler network error: {0}")]
    Network(String),
    #[error("crawler API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

impl From<reqwest::Error> for CrawlerError {
    fn from(err: reqwest::Error) -> Self {
        CrawlerError::Network(err.to_string())
    }
}

/// Both acquisition paths failed; carries the fallback's error message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("acquisition failed for {platform_id}: {message}")]
pub struct AcquisitionError {
    pub platform_id: String,
    pub message: String,
}

/// AI-assisted crawler service.
#[async_trait]
pub trait Crawler: Send + Sync {
    async fn crawl(&self, url: &str, overrides: &CrawlOverrides) -> Result<String, CrawlerError>;
    async fn health(&self) -> Result<(), CrawlerError>;
}

/// Plain HTTP page download.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError>;
}

/// Fixed crawl request shape; overrides win on key collisions.
pub fn crawl_request_body(url: &str, overrides: &CrawlOverrides) -> JsonValue {
    let mut body = Map::new();
    body.insert("urls".into(), JsonValue::Array(vec![JsonValue::String(url.to_string())]));
    body.insert("extraction_strategy".into(), "ai".into());
    body.insert("chunking_strategy".into(), "by_topic".into());
    body.insert("screenshot".into(), true.into());
    body.insert("pdf_extraction".into(), true.into());
    body.insert("remove_overlay_elements".into(), true.into());
    body.insert("simulate_user".into(), true.into());
    body.insert("magic".into(), true.into());
    for (key, value) in overrides {
        body.insert(key.clone(), value.clone());
    }
    JsonValue::Object(body)
}

pub struct CrawlerClient {
    client: reqwest::Client,
    base_url: String,
    health_timeout: Duration,
}

impl CrawlerClient {
    pub fn new(base_url: &str, config: &HttpClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building crawler client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            health_timeout: config.health_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Crawler for CrawlerClient {
    async fn crawl(&self, url: &str, overrides: &CrawlOverrides) -> Result<String, CrawlerError> {
        let endpoint = format!("{}/crawl", self.base_url);
        debug!(%endpoint, url, "crawler request");

        let resp = self
            .client
            .post(&endpoint)
            .json(&crawl_request_body(url, overrides))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(CrawlerError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.text().await?)
    }

    async fn health(&self) -> Result<(), CrawlerError> {
        let resp = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(self.health_timeout)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(CrawlerError::Api {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            })
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &HttpClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .context("building reqwest client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        Ok(resp.text().await?)
    }
}

/// Primary crawl then single direct fetch. No retries here; repetition belongs to the caller.
#[derive(Clone)]
pub struct ContentAcquisition {
    crawler: Arc<dyn Crawler>,
    fetcher: Arc<dyn PageFetcher>,
}

impl ContentAcquisition {
    pub fn new(crawler: Arc<dyn Crawler>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { crawler, fetcher }
    }

    pub fn crawler(&self) -> Arc<dyn Crawler> {
        Arc::clone(&self.crawler)
    }

    pub async fn acquire(
        &self,
        platform: &PlatformProfile,
        overrides: &CrawlOverrides,
    ) -> Result<RawContent, AcquisitionError> {
        let span = info_span!("acquire", platform_id = %platform.id, url = %platform.url);
        self.acquire_inner(platform, overrides).instrument(span).await
    }

    async fn acquire_inner(
        &self,
        platform: &PlatformProfile,
        overrides: &CrawlOverrides,
    ) -> Result<RawContent, AcquisitionError> {
        match self.crawler.crawl(&platform.url, overrides).await {
            Ok(content) => {
                return Ok(RawContent {
                    content,
                    url: platform.url.clone(),
                    status: ContentOrigin::AiCrawl,
                    timestamp: Utc::now(),
                })
            }
            Err(err) => {
                warn!(platform_id = %platform.id, error = %err, "ai crawl failed, falling back to direct fetch");
            }
        }

        match self.fetcher.fetch_page(&platform.url).await {
            Ok(content) => Ok(RawContent {
                content,
                url: platform.url.clone(),
                status: ContentOrigin::DirectFetch,
                timestamp: Utc::now(),
            }),
            Err(err) => Err(AcquisitionError {
                platform_id: platform.id.clone(),
                message: format!("direct fetch failed: {err}"),
            }),
        }
    }
}
