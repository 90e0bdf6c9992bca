use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use haven_core::types::Role;

/// A single message in the conversation sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Tool definition in the shape the LLM API expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool call extracted from the LLM response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Request to an LLM provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    /// Tools to expose. Tool-call mode is on exactly when non-empty.
    pub tools: Vec<ToolSpec>,
}

impl ChatRequest {
    /// Request with the model parameters the support pipeline always uses.
    pub fn new(model: impl Into<String>, system: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            messages: Vec::new(),
            max_tokens: 1024,
            temperature: 0.3,
            top_p: 0.9,
            frequency_penalty: 0.1,
            presence_penalty: 0.1,
            tools: Vec::new(),
        }
    }
}

/// Response from an LLM provider.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub stop_reason: String,
    /// Tool calls requested by the model. Empty when none.
    pub tool_calls: Vec<ToolCall>,
}

/// Common interface for all LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send a chat request and wait for the full response.
    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },
}

impl From<ProviderError> for haven_core::HavenError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Timeout { ms } => haven_core::HavenError::Timeout { ms },
            ProviderError::RateLimited { retry_after_ms } => haven_core::HavenError::Upstream(
                format!("model rate limited, retry after {retry_after_ms}ms"),
            ),
            other => haven_core::HavenError::Upstream(other.to_string()),
        }
    }
}
