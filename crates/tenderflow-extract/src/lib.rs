//! Structured tender extraction: LLM with a strict output schema, placeholder record on failure.

mod openai;
mod schema;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tenderflow_core::{ContactInfo, PlatformProfile, RawContent, TenderRecord};
use thiserror::Error;
use tracing::{debug, warn};

pub use openai::{ChatMessage, ChatRequest, OpenAiClient, Role, OPENAI_API_URL};
pub use schema::strict_schema;

pub const CRATE_NAME: &str = "tenderflow-extract";

const SYSTEM_PROMPT: &str = "You are an expert at extracting structured tender/procurement data from web content. Return valid JSON only.";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM network error: {0}")]
    Network(String),
    #[error("LLM API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("LLM returned no content")]
    EmptyResponse,
    #[error("LLM client misconfigured: {0}")]
    Config(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Network(err.to_string())
    }
}

/// Chat-completion provider with structured output support.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the raw text of the first choice.
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;
    /// Lightweight capability call used as a health probe.
    async fn list_models(&self) -> Result<Vec<String>, LlmError>;
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedContact {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// Shape the model must answer with. Engine-owned fields are accepted but overwritten.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedTender {
    pub title: String,
    pub description: Option<String>,
    pub deadline: Option<String>,
    pub value: Option<String>,
    pub currency: Option<String>,
    pub category: Option<String>,
    pub cpv_codes: Option<Vec<String>>,
    pub authority: Option<String>,
    pub requirements: Option<Vec<String>>,
    pub contact_info: Option<ExtractedContact>,
    pub url: Option<String>,
    pub platform_id: Option<String>,
    pub extracted_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TenderExtraction {
    pub tenders: Vec<ExtractedTender>,
}

#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub model: String,
    /// Character budget for raw content sent to the model.
    pub max_input_chars: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub excerpt_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            max_input_chars: 15_000,
            temperature: 0.1,
            max_tokens: 4000,
            excerpt_chars: 1000,
        }
    }
}

#[derive(Debug, Error)]
enum ExtractionFailure {
    #[error("llm call failed: {0}")]
    Llm(#[from] LlmError),
    #[error("response is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("response has no `tenders` array")]
    MissingTenders,
    #[error("response contains no tenders")]
    NoTenders,
    #[error("tender entry does not match schema: {0}")]
    InvalidTender(#[source] serde_json::Error),
}

pub struct ExtractionEngine {
    llm: Arc<dyn LlmProvider>,
    config: ExtractionConfig,
    response_format: JsonValue,
    fallbacks: AtomicU64,
}

impl ExtractionEngine {
    pub fn new(llm: Arc<dyn LlmProvider>, config: ExtractionConfig) -> Self {
        let response_format = serde_json::json!({
            "type": "json_schema",
            "json_schema": {
                "name": "tender_extraction",
                "strict": true,
                "schema": strict_schema::<TenderExtraction>(),
            }
        });
        Self {
            llm,
            config,
            response_format,
            fallbacks: AtomicU64::new(0),
        }
    }

    pub fn llm(&self) -> Arc<dyn LlmProvider> {
        Arc::clone(&self.llm)
    }

    /// Number of times the placeholder path has been taken since construction.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    /// Never fails. Non-empty content always yields at least one record: extraction
    /// problems and empty `tenders` replies degrade to a single placeholder.
    pub async fn extract(&self, raw: &RawContent, platform: &PlatformProfile) -> Vec<TenderRecord> {
        if raw.content.is_empty() {
            debug!(platform_id = %platform.id, "empty raw content, nothing to extract");
            return Vec::new();
        }

        match self.structured_extract(raw, platform).await {
            Ok(records) => {
                debug!(platform_id = %platform.id, records = records.len(), "structured extraction succeeded");
                records
            }
            Err(failure) => {
                let total = self.fallbacks.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    platform_id = %platform.id,
                    url = %raw.url,
                    reason = %failure,
                    fallback_total = total,
                    "structured extraction failed, emitting placeholder record"
                );
                vec![placeholder_record(raw, platform, self.config.excerpt_chars)]
            }
        }
    }

    pub fn build_request(&self, raw: &RawContent, platform: &PlatformProfile) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(build_prompt(raw, platform, self.config.max_input_chars)),
            ],
            response_format: self.response_format.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }

    async fn structured_extract(
        &self,
        raw: &RawContent,
        platform: &PlatformProfile,
    ) -> Result<Vec<TenderRecord>, ExtractionFailure> {
        let request = self.build_request(raw, platform);
        let reply = self.llm.complete(&request).await?;
        let tenders = parse_tenders(&reply)?;
        if tenders.is_empty() {
            return Err(ExtractionFailure::NoTenders);
        }

        let extracted_at = Utc::now();
        Ok(tenders
            .into_iter()
            .map(|t| into_record(t, &platform.id, extracted_at))
            .collect())
    }
}

fn parse_tenders(reply: &str) -> Result<Vec<ExtractedTender>, ExtractionFailure> {
    let value: JsonValue =
        serde_json::from_str(strip_code_blocks(reply)).map_err(ExtractionFailure::InvalidJson)?;
    let tenders = match value.get("tenders") {
        Some(JsonValue::Array(items)) => items.clone(),
        _ => return Err(ExtractionFailure::MissingTenders),
    };
    tenders
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(ExtractionFailure::InvalidTender))
        .collect()
}

fn into_record(t: ExtractedTender, platform_id: &str, extracted_at: chrono::DateTime<Utc>) -> TenderRecord {
    let contact = t.contact_info.unwrap_or(ExtractedContact {
        email: None,
        phone: None,
        address: None,
    });
    TenderRecord {
        title: t.title,
        description: t.description,
        deadline: t.deadline,
        value: t.value,
        currency: t.currency,
        category: t.category,
        cpv_codes: t.cpv_codes.unwrap_or_default(),
        authority: t.authority,
        requirements: t.requirements.unwrap_or_default(),
        contact_info: ContactInfo {
            email: contact.email,
            phone: contact.phone,
            address: contact.address,
        },
        url: t.url,
        platform_id: platform_id.to_string(),
        extracted_at,
        raw_excerpt: None,
    }
}

pub fn build_prompt(raw: &RawContent, platform: &PlatformProfile, max_chars: usize) -> String {
    format!(
        "Extract every tender/procurement notice from the content below, published on {name}.\n\
         For each notice capture: title and description, submission deadline (ISO date), \
         contract value and currency, category and CPV codes, contracting authority, \
         requirements, and contact information (email, phone, address).\n\n\
         Platform context: {region} - {categories}\n\
         IT-specific focus: {it}\n\
         Source URL: {url}\n\n\
         Raw data:\n{content}",
        name = platform.name,
        region = platform.region,
        categories = platform.categories.join(", "),
        it = platform.it_specific.as_str(),
        url = raw.url,
        content = truncate_chars(&raw.content, max_chars),
    )
}

pub fn placeholder_record(raw: &RawContent, platform: &PlatformProfile, excerpt_chars: usize) -> TenderRecord {
    TenderRecord {
        title: format!("Scraped content from {}", platform.name),
        description: Some(format!("Raw data extracted from {}", raw.url)),
        deadline: None,
        value: None,
        currency: None,
        category: None,
        cpv_codes: Vec::new(),
        authority: None,
        requirements: Vec::new(),
        contact_info: ContactInfo::default(),
        url: Some(raw.url.clone()),
        platform_id: platform.id.clone(),
        extracted_at: Utc::now(),
        raw_excerpt: Some(format!("{}...", truncate_chars(&raw.content, excerpt_chars))),
    }
}

/// First `max_chars` characters of `s`.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tenderflow_core::{ContentOrigin, ItSpecificity, ScraperConfig};

    struct StubLlm {
        reply: Result<String, u16>,
        calls: AtomicUsize,
        last_request: Mutex<Option<ChatRequest>>,
    }

    impl StubLlm {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            })
        }

        fn failing(status: u16) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(status),
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for StubLlm {
        async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(status) => Err(LlmError::Api {
                    status: *status,
                    message: "rate limited".into(),
                }),
            }
        }

        async fn list_models(&self) -> Result<Vec<String>, LlmError> {
            Ok(vec!["gpt-4o".into()])
        }
    }

    fn platform() -> PlatformProfile {
        PlatformProfile {
            id: "simap-ch".into(),
            name: "SIMAP".into(),
            url: "https://simap.ch".into(),
            region: "Schweiz".into(),
            requires_auth: true,
            it_specific: ItSpecificity::No,
            categories: vec!["official".into(), "all-sectors".into()],
            scraper_config: ScraperConfig {
                selectors: Default::default(),
                pagination: None,
                rate_limit_ms: 2000,
                max_retries: 3,
                auth_required: true,
                ai_enhanced: false,
                specialization: None,
                data_source: None,
                trial_available: false,
            },
        }
    }

    fn raw(content: &str) -> RawContent {
        RawContent {
            content: content.to_string(),
            url: "https://simap.ch".into(),
            status: ContentOrigin::DirectFetch,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn well_formed_reply_is_stamped_with_platform() {
        let llm = StubLlm::replying(
            r#"{"tenders":[{"title":"Netzwerk-Erneuerung","cpvCodes":["32420000"],"platformId":"other","contactInfo":{"email":"a@b.ch"}}]}"#,
        );
        let engine = ExtractionEngine::new(llm.clone(), ExtractionConfig::default());
        let records = engine.extract(&raw("<html>notice</html>"), &platform()).await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Netzwerk-Erneuerung");
        assert_eq!(records[0].platform_id, "simap-ch");
        assert_eq!(records[0].cpv_codes, vec!["32420000".to_string()]);
        assert_eq!(records[0].contact_info.email.as_deref(), Some("a@b.ch"));
        assert!(!records[0].is_placeholder());
        assert_eq!(engine.fallback_count(), 0);
    }

    #[tokio::test]
    async fn llm_failure_yields_single_placeholder() {
        let engine = ExtractionEngine::new(StubLlm::failing(429), ExtractionConfig::default());
        let records = engine.extract(&raw("<html>content</html>"), &platform()).await;

        assert_eq!(records.len(), 1);
        let placeholder = &records[0];
        assert!(placeholder.is_placeholder());
        assert_eq!(placeholder.title, "Scraped content from SIMAP");
        assert_eq!(placeholder.platform_id, "simap-ch");
        assert_eq!(
            placeholder.description.as_deref(),
            Some("Raw data extracted from https://simap.ch")
        );
        assert_eq!(engine.fallback_count(), 1);
    }

    #[tokio::test]
    async fn malformed_replies_fall_back() {
        for reply in ["not json", r#"{"tenders":"none"}"#, r#"{"items":[]}"#, r#"{"tenders":[{"value":"1"}]}"#] {
            let engine = ExtractionEngine::new(StubLlm::replying(reply), ExtractionConfig::default());
            let records = engine.extract(&raw("body"), &platform()).await;
            assert_eq!(records.len(), 1, "reply {reply}");
            assert!(records[0].is_placeholder(), "reply {reply}");
        }
    }

    #[tokio::test]
    async fn fenced_reply_is_accepted() {
        let llm = StubLlm::replying("```json\n{\"tenders\":[{\"title\":\"Bauleistungen\"}]}\n```");
        let engine = ExtractionEngine::new(llm, ExtractionConfig::default());
        let records = engine.extract(&raw("body"), &platform()).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Bauleistungen");
        assert_eq!(engine.fallback_count(), 0);
    }

    #[tokio::test]
    async fn empty_tenders_reply_for_content_yields_placeholder() {
        let llm = StubLlm::replying(r#"{"tenders":[]}"#);
        let engine = ExtractionEngine::new(llm.clone(), ExtractionConfig::default());

        let records = engine.extract(&raw("<html>notice</html>"), &platform()).await;
        assert_eq!(records.len(), 1);
        assert!(records[0].is_placeholder());

        let records = engine.extract(&raw("   \n"), &platform()).await;
        assert_eq!(records.len(), 1);
        assert!(records[0].is_placeholder());

        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.fallback_count(), 2);
    }

    #[tokio::test]
    async fn empty_content_skips_llm() {
        let llm = StubLlm::replying(r#"{"tenders":[]}"#);
        let engine = ExtractionEngine::new(llm.clone(), ExtractionConfig::default());
        let records = engine.extract(&raw(""), &platform()).await;
        assert!(records.is_empty());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.fallback_count(), 0);
    }

    #[tokio::test]
    async fn request_carries_schema_and_truncated_content() {
        let llm = StubLlm::replying(r#"{"tenders":[]}"#);
        let config = ExtractionConfig {
            max_input_chars: 10,
            ..ExtractionConfig::default()
        };
        let engine = ExtractionEngine::new(llm.clone(), config);
        engine.extract(&raw("0123456789ABCDEF"), &platform()).await;

        let request = llm.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.max_tokens, 4000);
        assert!(request.temperature <= 0.2);
        let prompt = &request.messages[1].content;
        assert!(prompt.contains("0123456789"));
        assert!(!prompt.contains("ABCDEF"));
        assert!(prompt.contains("Schweiz - official, all-sectors"));

        let schema = &request.response_format["json_schema"]["schema"];
        assert_eq!(request.response_format["json_schema"]["name"], "tender_extraction");
        assert_eq!(schema["properties"]["tenders"]["type"], "array");
        assert_eq!(schema["additionalProperties"], false);
    }

    #[test]
    fn placeholder_excerpt_is_truncated() {
        let long = "ä".repeat(2500);
        let record = placeholder_record(&raw(&long), &platform(), 1000);
        let excerpt = record.raw_excerpt.unwrap();
        assert_eq!(excerpt.chars().count(), 1003);
        assert!(excerpt.ends_with("..."));
    }
}
