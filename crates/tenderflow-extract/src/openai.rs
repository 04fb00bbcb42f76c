use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{LlmError, LlmProvider};

pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub response_format: JsonValue,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

pub struct OpenAiClient {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
    probe_timeout: Duration,
}

impl OpenAiClient {
    pub fn new(api_key: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building OpenAI client")?;
        Ok(Self {
            api_key: api_key.to_string(),
            http,
            base_url: OPENAI_API_URL.to_string(),
            probe_timeout: Duration::from_secs(5),
        })
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| LlmError::Config(e.to_string()))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn error_from(response: reqwest::Response) -> LlmError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        LlmError::Api { status, message }
    }
}

#[async_trait]
impl LlmProvider for OpenAiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        debug!(model = %request.model, "OpenAI structured output request");

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse)
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let response = self
            .http
            .get(format!("{}/models", self.base_url))
            .headers(self.headers()?)
            .timeout(self.probe_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let list: ModelList = response.json().await?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}
