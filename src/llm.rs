//! Chat-completion client for OpenAI / LiteLLM-compatible endpoints
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::config::{LlmConfig, Secret};
use crate::error::QueryAgentError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

/// One chat-style completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Remote text-completion seam
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Reusable chat-completion client (connection-pooled)
pub struct ChatCompletionClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Secret,
}

impl ChatCompletionClient {
    pub fn new(config: &LlmConfig, verify_ssl: bool) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(QueryAgentError::CredentialsError(
                "completion endpoint API key not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!verify_ssl)
            .build()
            .map_err(|e| {
                QueryAgentError::ConfigError(format!("Failed to build completion HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model_name.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CompletionClient for ChatCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        info!(model = %self.model, "Calling completion endpoint");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Completion request failed: {}", e);
                QueryAgentError::CompletionError(format!("request failed: {}", e))
            })?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error.message)
                .unwrap_or_else(|_| text.clone());
            error!(%status, "Completion endpoint error response: {}", message);
            return Err(QueryAgentError::CompletionError(format!("HTTP {}: {}", status, message)));
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            QueryAgentError::CompletionError(format!("malformed completion response: {}", e))
        })?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            QueryAgentError::CompletionError("no choices in completion response".to_string())
        })?;

        debug!(finish_reason = ?choice.finish_reason, "Completion received");

        choice
            .message
            .content
            .map(|c| c.trim().to_string())
            .ok_or_else(|| QueryAgentError::CompletionError("empty completion content".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}
