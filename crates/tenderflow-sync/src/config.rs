use std::path::PathBuf;
use std::time::Duration;

use tenderflow_extract::{ExtractionConfig, OPENAI_API_URL};
use tenderflow_fetch::{HttpClientConfig, BROWSER_USER_AGENT};

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub crawler_endpoint: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub health_timeout_secs: u64,
    /// Replaces the embedded platform catalog when set.
    pub platforms_file: Option<PathBuf>,
    pub schedules_file: PathBuf,
    pub export_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            crawler_endpoint: "http://localhost:8000".to_string(),
            openai_api_key: None,
            openai_base_url: OPENAI_API_URL.to_string(),
            openai_model: "gpt-4o".to_string(),
            user_agent: BROWSER_USER_AGENT.to_string(),
            http_timeout_secs: 30,
            health_timeout_secs: 5,
            platforms_file: None,
            schedules_file: PathBuf::from("./schedules.yaml"),
            export_dir: PathBuf::from("./exports"),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            crawler_endpoint: std::env::var("CRAWL4AI_ENDPOINT")
                .unwrap_or(defaults.crawler_endpoint),
            openai_api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            openai_base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            openai_model: std::env::var("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            user_agent: std::env::var("TENDERFLOW_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: std::env::var("TENDERFLOW_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            health_timeout_secs: std::env::var("TENDERFLOW_HEALTH_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.health_timeout_secs),
            platforms_file: std::env::var("TENDERFLOW_PLATFORMS_FILE").ok().map(PathBuf::from),
            schedules_file: std::env::var("TENDERFLOW_SCHEDULES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.schedules_file),
            export_dir: std::env::var("TENDERFLOW_EXPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.export_dir),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            health_timeout: Duration::from_secs(self.health_timeout_secs),
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn extraction_config(&self) -> ExtractionConfig {
        ExtractionConfig {
            model: self.openai_model.clone(),
            ..ExtractionConfig::default()
        }
    }
}
