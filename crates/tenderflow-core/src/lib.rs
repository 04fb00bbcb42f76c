//! Core domain model for tender scraping: platforms, jobs, tender records and health.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "tenderflow-core";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("platform {0} not found")]
    UnknownPlatform(String),
    #[error("job {0} not found")]
    JobNotFound(String),
}

/// How much of a platform's catalog is IT procurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItSpecificity {
    Yes,
    Partial,
    No,
}

impl ItSpecificity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::Partial => "partial",
            Self::No => "no",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScraperConfig {
    /// Named CSS selector hints forwarded to the crawler, e.g. `title -> .notice-title`.
    #[serde(default)]
    pub selectors: BTreeMap<String, String>,
    #[serde(default)]
    pub pagination: Option<String>,
    pub rate_limit_ms: u64,
    pub max_retries: u32,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default)]
    pub ai_enhanced: bool,
    #[serde(default)]
    pub specialization: Option<String>,
    #[serde(default)]
    pub data_source: Option<String>,
    #[serde(default)]
    pub trial_available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformProfile {
    pub id: String,
    pub name: String,
    pub url: String,
    pub region: String,
    pub requires_auth: bool,
    pub it_specific: ItSpecificity,
    #[serde(default)]
    pub categories: Vec<String>,
    pub scraper_config: ScraperConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// One public procurement notice extracted from a platform page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenderRecord {
    pub title: String,
    pub description: Option<String>,
    pub deadline: Option<String>,
    pub value: Option<String>,
    pub currency: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub cpv_codes: Vec<String>,
    pub authority: Option<String>,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub contact_info: ContactInfo,
    pub url: Option<String>,
    pub platform_id: String,
    pub extracted_at: DateTime<Utc>,
    /// Only set on placeholder records produced when structured extraction failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_excerpt: Option<String>,
}

impl TenderRecord {
    pub fn is_placeholder(&self) -> bool {
        self.raw_excerpt.is_some()
    }
}

/// Which acquisition path produced the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentOrigin {
    AiCrawl,
    DirectFetch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawContent {
    pub content: String,
    pub url: String,
    pub status: ContentOrigin,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Forward-only state machine: queued -> running -> {completed, failed, stopped}.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match self {
            Self::Queued => next != Self::Queued,
            Self::Running => next.is_terminal() || next == Self::Running,
            Self::Completed | Self::Failed | Self::Stopped => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeJob {
    pub id: String,
    pub platform_id: String,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    pub terminal_time: Option<DateTime<Utc>>,
    pub progress: u8,
    pub records_processed: usize,
    pub errors: Vec<String>,
    #[serde(default)]
    pub data: Vec<TenderRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub services: BTreeMap<String, ServiceStatus>,
    pub active_job_count: usize,
    pub platform_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_accept_no_transition() {
        for status in [JobStatus::Completed, JobStatus::Failed, JobStatus::Stopped] {
            assert!(status.is_terminal());
            for next in [
                JobStatus::Queued,
                JobStatus::Running,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Stopped,
            ] {
                assert!(!status.can_transition_to(next));
            }
        }
        assert!(JobStatus::Running.can_transition_to(JobStatus::Stopped));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Queued));
    }

    #[test]
    fn tender_record_uses_camel_case_keys() {
        let record = TenderRecord {
            title: "Cloud migration".into(),
            description: None,
            deadline: Some("2026-11-30".into()),
            value: Some("250000".into()),
            currency: Some("EUR".into()),
            category: None,
            cpv_codes: vec!["72000000".into()],
            authority: None,
            requirements: vec![],
            contact_info: ContactInfo::default(),
            url: None,
            platform_id: "ted-europa".into(),
            extracted_at: Utc::now(),
            raw_excerpt: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["platformId"], "ted-europa");
        assert_eq!(value["cpvCodes"][0], "72000000");
        assert!(value.get("rawExcerpt").is_none());
        assert!(!record.is_placeholder());
    }

    #[test]
    fn platform_profile_parses_optional_config_fields() {
        let yaml = r#"
id: it-ausschreibung-de
name: IT-Ausschreibung.de
url: https://it-ausschreibung.de
region: Deutschland (DACH)
requiresAuth: true
itSpecific: "yes"
categories: [it-only, software]
scraperConfig:
  rateLimitMs: 2000
  maxRetries: 3
  authRequired: true
  specialization: it-focused
"#;
        let profile: PlatformProfile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(profile.it_specific, ItSpecificity::Yes);
        assert!(profile.scraper_config.auth_required);
        assert!(!profile.scraper_config.ai_enhanced);
        assert_eq!(profile.scraper_config.specialization.as_deref(), Some("it-focused"));
        assert!(profile.scraper_config.selectors.is_empty());
    }
}
