//! Content-policy check run on each collected message before it reaches the prompt.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::client::LlmClient;
use crate::errors::BotError;

#[async_trait]
pub trait Moderator: Send + Sync {
    /// Whether `text` violates the content policy.
    async fn is_flagged(&self, text: &str) -> Result<bool, BotError>;
}

#[async_trait]
impl Moderator for LlmClient {
    async fn is_flagged(&self, text: &str) -> Result<bool, BotError> {
        let response = self
            .http()
            .post(self.endpoint("moderations"))
            .headers(self.headers()?)
            .json(&json!({ "input": text }))
            .send()
            .await
            .map_err(|e| BotError::OpenAIError(format!("moderation request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::OpenAIError(format!(
                "moderation failed (status {status}): {body}"
            )));
        }

        let body: Value = response.json().await?;
        body.get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
            .and_then(|result| result.get("flagged"))
            .and_then(Value::as_bool)
            .ok_or_else(|| BotError::OpenAIError("moderation response has no result".to_string()))
    }
}
