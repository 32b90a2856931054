//! LLM (`OpenAI`) API client module
//!
//! Encapsulates the chat completion call used to group and caption collected messages.

use async_trait::async_trait;
use openai_api_rs::v1::chat_completion::{
    ChatCompletionMessage, ChatCompletionRequest, Content, MessageRole,
};
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::errors::BotError;

const CONTEXT_LENGTH_EXCEEDED: &str = "context_length_exceeded";

/// Rough token estimate used for logging only.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4 + 1
}

/// One non-streaming summarization request.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub system: String,
    /// JSON array of `{text, id}` pairs.
    pub payload: String,
    pub max_tokens: i64,
    pub temperature: f64,
    /// Caller identifier forwarded for abuse tracing.
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModelResponse {
    pub content: Option<String>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("the prompt exceeds the model context window")]
    ContextLengthExceeded,

    #[error("the model call timed out")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

impl From<BotError> for ModelError {
    fn from(error: BotError) -> Self {
        ModelError::Other(error.to_string())
    }
}

/// Text-in, text-out model transport.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;
}

/// LLM API client for generating summaries
pub struct LlmClient {
    api_key: String,
    org_id: Option<String>,
    model_name: String,
    base_url: String,
    http: Client,
}

impl LlmClient {
    #[must_use]
    pub fn new(
        api_key: String,
        org_id: Option<String>,
        model_name: String,
        base_url: String,
        timeout: Duration,
    ) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build OpenAI HTTP client with timeout: {}", e);
                Client::new()
            });
        Self {
            api_key,
            org_id,
            model_name,
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub(crate) fn headers(&self) -> Result<reqwest::header::HeaderMap, BotError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let auth_value = format!("Bearer {}", self.api_key)
            .parse()
            .map_err(|e| BotError::HttpError(format!("Invalid Authorization header: {e}")))?;
        headers.insert("Authorization", auth_value);

        if let Some(org) = &self.org_id {
            let org_value = org.parse().map_err(|e| {
                BotError::HttpError(format!("Invalid OpenAI-Organization header: {e}"))
            })?;
            headers.insert("OpenAI-Organization", org_value);
        }
        Ok(headers)
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// System instruction followed by the message payload as the single user turn.
    #[must_use]
    pub fn build_prompt(&self, system: &str, payload: &str) -> Vec<ChatCompletionMessage> {
        vec![
            ChatCompletionMessage {
                role: MessageRole::system,
                content: Content::Text(system.to_string()),
                name: None,
                tool_calls: None,
                tool_call_id: None,
            },
            ChatCompletionMessage {
                role: MessageRole::user,
                content: Content::Text(payload.to_string()),
                name: None,
                tool_calls: None,
                tool_call_id: None,
            },
        ]
    }

    #[must_use]
    pub fn build_request(&self, request: &ModelRequest) -> ChatCompletionRequest {
        ChatCompletionRequest::new(
            self.model_name.clone(),
            self.build_prompt(&request.system, &request.payload),
        )
        .temperature(request.temperature)
        .max_tokens(request.max_tokens)
        .n(1)
        .response_format(json!({ "type": "json_object" }))
        .user(request.user.clone())
    }
}

/// Pull the first choice's text and the total token count out of a chat completion body.
#[must_use]
pub fn parse_completion(body: &Value) -> ModelResponse {
    let content = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let total_tokens = body
        .get("usage")
        .and_then(|usage| usage.get("total_tokens"))
        .and_then(Value::as_u64);
    ModelResponse {
        content,
        total_tokens,
    }
}

/// Map a non-success response body onto the model failure taxonomy.
#[must_use]
pub fn classify_error_body(status: reqwest::StatusCode, body: &str) -> ModelError {
    let code = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.get("error")
            .and_then(|e| e.get("code"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    if code.as_deref() == Some(CONTEXT_LENGTH_EXCEEDED) || body.contains(CONTEXT_LENGTH_EXCEEDED)
    {
        ModelError::ContextLengthExceeded
    } else {
        ModelError::Other(format!("OpenAI API error (status {status}): {body}"))
    }
}

#[async_trait]
impl ModelClient for LlmClient {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        #[cfg(feature = "debug-logs")]
        info!("Using ChatGPT prompt:\n{}\n{}", request.system, request.payload);

        info!(
            model = %self.model_name,
            estimated_input_tokens =
                estimate_tokens(&request.system) + estimate_tokens(&request.payload),
            "Requesting grouped summary"
        );

        let body = self.build_request(&request);
        let response = self
            .http
            .post(self.endpoint("chat/completions"))
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout
                } else {
                    ModelError::Other(format!("OpenAI API request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|e| {
                format!("Failed to read error response body (status {status}): {e}")
            });
            return Err(classify_error_body(status, &error_text));
        }

        let response_json: Value = response
            .json()
            .await
            .map_err(|e| ModelError::Other(format!("Failed to parse OpenAI response: {e}")))?;
        let parsed = parse_completion(&response_json);
        debug!(
            total_tokens = ?parsed.total_tokens,
            has_content = parsed.content.is_some(),
            "OpenAI chat completion finished"
        );
        Ok(parsed)
    }
}
