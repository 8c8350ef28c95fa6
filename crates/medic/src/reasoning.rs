//! Reasoning service client.
//!
//! Sends a composed textual prompt to the external reasoning service and
//! returns its raw response text. No semantic understanding of the content
//! lives here; parsing and validation happen in the decision layer.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{MedicError, MedicResult};

/// Anthropic API endpoint
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API version
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default model
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Client for the external reasoning service.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Send a composed prompt and return the raw response text.
    async fn complete(&self, prompt: &str) -> MedicResult<String>;
}

/// Configuration for the reasoning client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningConfig {
    /// API endpoint (override for proxies or compatible gateways)
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model to use
    #[serde(default = "default_model")]
    pub model: String,
    /// Request timeout in seconds; expiry is a step failure, not a loop
    /// failure
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum tokens per response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_base_url() -> String {
    ANTHROPIC_API_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_tokens() -> u32 {
    4096
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Anthropic API request message
#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

/// Anthropic API request
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    temperature: f32,
}

/// Anthropic API response content
#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

/// Anthropic API response
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

/// Anthropic API error
#[derive(Debug, Deserialize)]
struct AnthropicError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// Anthropic API error response
#[derive(Debug, Deserialize)]
struct AnthropicErrorResponse {
    error: AnthropicError,
}

/// Anthropic Claude reasoning client.
pub struct AnthropicClient {
    client: Client,
    config: ReasoningConfig,
    api_key: Option<String>,
}

impl AnthropicClient {
    /// Create a client with an explicit API key.
    pub fn new(config: ReasoningConfig, api_key: impl Into<String>) -> MedicResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MedicError::Reasoning(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            api_key: Some(api_key.into()),
        })
    }

    /// Create a client taking the API key from `ANTHROPIC_API_KEY`.
    pub fn from_env(config: ReasoningConfig) -> MedicResult<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").ok();
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MedicError::Reasoning(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }
}

#[async_trait]
impl ReasoningClient for AnthropicClient {
    async fn complete(&self, prompt: &str) -> MedicResult<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| MedicError::Reasoning("ANTHROPIC_API_KEY not set".to_string()))?;

        let request = AnthropicRequest {
            model: self.config.model.clone(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: self.config.max_tokens,
            // Deterministic for diagnosis
            temperature: 0.0,
        };

        tracing::debug!(model = %self.config.model, prompt_len = prompt.len(), "Calling reasoning service");

        let response = self
            .client
            .post(&self.config.base_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| MedicError::Reasoning(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| MedicError::Reasoning(format!("failed to read response: {e}")))?;

            if let Ok(error_response) = serde_json::from_str::<AnthropicErrorResponse>(&body) {
                return Err(MedicError::Reasoning(format!(
                    "API error: {} - {}",
                    error_response.error.error_type, error_response.error.message
                )));
            }
            return Err(MedicError::Reasoning(format!(
                "API error ({status}): {body}"
            )));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| MedicError::Reasoning(format!("failed to parse response: {e}")))?;

        let text: String = parsed
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .collect();

        if text.is_empty() {
            return Err(MedicError::Reasoning(
                "response contained no text content".to_string(),
            ));
        }

        Ok(text)
    }
}
