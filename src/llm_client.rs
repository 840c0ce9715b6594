use crate::errors::{AppError, GenerationFailureKind};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Sampling settings sent with every completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationOptions {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 500,
            temperature: 0.5,
        }
    }
}

/// A text-generation backend.
///
/// Implementations return the raw text of the first completion choice.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        system_instruction: &str,
        options: &GenerationOptions,
    ) -> Result<String, AppError>;
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    /// Creates a new `OpenAiClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root, e.g. `https://api.openai.com/v1`.
    /// * `api_key` - Bearer token for the API.
    /// * `timeout` - Upper bound for a single completion request.
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn classify_status(status: StatusCode) -> GenerationFailureKind {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GenerationFailureKind::Unauthorized,
            StatusCode::TOO_MANY_REQUESTS => GenerationFailureKind::RateLimited,
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                GenerationFailureKind::Timeout
            }
            s if s.is_server_error() => GenerationFailureKind::Upstream,
            _ => GenerationFailureKind::Rejected,
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn generate(
        &self,
        prompt: &str,
        system_instruction: &str,
        options: &GenerationOptions,
    ) -> Result<String, AppError> {
        let url = format!("{}/chat/completions", self.base_url);
        tracing::info!("Requesting completion from {} (model {})", url, options.model);

        let body = json!({
            "model": options.model,
            "messages": [
                {"role": "system", "content": system_instruction},
                {"role": "user", "content": prompt}
            ],
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::generation(
                Self::classify_status(status),
                format!("Completion API returned {}: {}", status, error_text),
            ));
        }

        let data: ChatCompletionResponse = response.json().await.map_err(|e| {
            AppError::generation(
                GenerationFailureKind::MalformedResponse,
                format!("Failed to parse completion response: {}", e),
            )
        })?;

        let content = data
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                AppError::generation(
                    GenerationFailureKind::MalformedResponse,
                    "Completion response has no message content",
                )
            })?;

        tracing::info!("✓ Completion received ({} chars)", content.len());
        Ok(content)
    }
}
