//! Language-model client with one strategy per provider
//!
//! The provider is chosen once from [`LlmConfig`] at startup. [`LlmClient`] adds
//! the shared defaults (model, token budget, temperature) and JSON extraction on
//! top of whichever provider is active.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{LlmConfig, LlmProviderKind};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const STRUCTURED_TEMPERATURE: f64 = 0.1;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("language model provider not configured: {0}")]
    NotConfigured(String),
    #[error("language model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("language model API error: {status} {body}")]
    Api { status: u16, body: String },
    #[error("language model returned an empty response")]
    EmptyResponse,
}

/// A single completion request
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub model: String,
    pub prompt: String,
    pub system: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError>;
}

async fn read_error(response: reqwest::Response) -> LlmError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    LlmError::Api {
        status,
        body: body.chars().take(200).collect(),
    }
}

fn http_client(timeout_secs: u64) -> Result<Client, LlmError> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct AnthropicBody<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContent>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

pub struct AnthropicProvider {
    http: Client,
    base_url: String,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(base_url: &str, api_key: String, timeout_secs: u64) -> Result<Self, LlmError> {
        Ok(Self {
            http: http_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let body = AnthropicBody {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            system: request.system.as_deref(),
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(read_error(response).await);
        }

        let parsed: AnthropicResponse = response.json().await?;
        parsed
            .content
            .into_iter()
            .find(|c| c.kind == "text")
            .map(|c| c.text)
            .filter(|t| !t.is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

#[derive(Serialize)]
struct OpenAiBody<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiProvider {
    http: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(base_url: &str, api_key: String, timeout_secs: u64) -> Result<Self, LlmError> {
        Ok(Self {
            http: http_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let body = OpenAiBody {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages,
        };

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(read_error(response).await);
        }

        let parsed: OpenAiResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

/// Always fails; synthesis then uses the rule-based fallback
pub struct DisabledProvider {
    reason: String,
}

impl DisabledProvider {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for DisabledProvider {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn complete(&self, _request: &LlmRequest) -> Result<String, LlmError> {
        Err(LlmError::NotConfigured(self.reason.clone()))
    }
}

/// Remove a surrounding Markdown code fence, with or without a `json` tag
pub fn strip_code_fences(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```json") {
        body = rest;
    } else if let Some(rest) = body.strip_prefix("```") {
        body = rest;
    }
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

#[derive(Clone)]
pub struct LlmClient {
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_tokens: u32,
    temperature: f64,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn LlmProvider>, config: &LlmConfig) -> Self {
        Self {
            provider,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// Select the provider named in config. A provider without an API key is
    /// downgraded to [`DisabledProvider`].
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let provider: Arc<dyn LlmProvider> = match config.provider {
            LlmProviderKind::Anthropic => match &config.anthropic_api_key {
                Some(key) => Arc::new(AnthropicProvider::new(
                    &config.anthropic_url,
                    key.clone(),
                    config.timeout_secs,
                )?),
                None => {
                    warn!("ANTHROPIC_API_KEY not set, language model disabled");
                    Arc::new(DisabledProvider::new("anthropic api key missing"))
                }
            },
            LlmProviderKind::Openai => match &config.openai_api_key {
                Some(key) => Arc::new(OpenAiProvider::new(
                    &config.openai_url,
                    key.clone(),
                    config.timeout_secs,
                )?),
                None => {
                    warn!("OPENAI_API_KEY not set, language model disabled");
                    Arc::new(DisabledProvider::new("openai api key missing"))
                }
            },
            LlmProviderKind::Disabled => Arc::new(DisabledProvider::new("disabled in config")),
        };

        info!("Language model provider: {}", provider.name());
        Ok(Self::new(provider, config))
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        max_tokens: Option<u32>,
        temperature: Option<f64>,
    ) -> Result<String, LlmError> {
        let request = LlmRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            system: system.map(str::to_string),
            max_tokens: max_tokens.unwrap_or(self.max_tokens),
            temperature: temperature.unwrap_or(self.temperature),
        };
        self.provider.complete(&request).await
    }

    /// Generate and parse a JSON object. Unparsable output yields an empty
    /// object; provider failures are returned as errors.
    pub async fn generate_structured(
        &self,
        prompt: &str,
        system: Option<&str>,
        max_tokens: Option<u32>,
    ) -> Result<Value, LlmError> {
        let text = self
            .generate(prompt, system, max_tokens, Some(STRUCTURED_TEMPERATURE))
            .await?;

        match serde_json::from_str::<Value>(strip_code_fences(&text)) {
            Ok(value @ Value::Object(_)) => Ok(value),
            Ok(_) => {
                warn!("Language model returned JSON that is not an object");
                Ok(Value::Object(Map::new()))
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse JSON from language model response");
                debug!(raw = %text.chars().take(500).collect::<String>(), "Unparsable response");
                Ok(Value::Object(Map::new()))
            }
        }
    }
}
