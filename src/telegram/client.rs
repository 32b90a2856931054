//! Telegram Bot API client
//!
//! Plain JSON-over-HTTP calls with retry on transient send failures.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};

use super::parser::{Chat, Message};
use crate::collect::ChannelDirectory;
use crate::core::models::ChannelInfo;
use crate::errors::BotError;
use crate::utils::escape::Dialect;

/// Seconds Telegram holds a `getUpdates` request open waiting for updates.
pub const POLL_TIMEOUT_SECS: u64 = 25;
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Must stay above [`POLL_TIMEOUT_SECS`] so long polls are not cut short.
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 40;
const SEND_MAX_RETRIES: usize = 3;

/// A failed Bot API call, with enough detail to decide on retries.
#[derive(Debug, Clone)]
pub struct TelegramApiError {
    pub method: String,
    pub status: Option<StatusCode>,
    pub error_code: Option<i64>,
    pub retry_after_secs: Option<u64>,
    pub description: String,
}

impl TelegramApiError {
    fn transport(method: &str, err: &reqwest::Error) -> Self {
        Self {
            method: method.to_string(),
            status: None,
            error_code: None,
            retry_after_secs: None,
            description: err.to_string(),
        }
    }

    /// Network failures, rate limits and server errors.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        let status_retryable = match self.status {
            Some(status) => {
                status == StatusCode::TOO_MANY_REQUESTS
                    || status == StatusCode::REQUEST_TIMEOUT
                    || status.is_server_error()
            }
            None => self.error_code.is_none(),
        };
        status_retryable || self.error_code.is_some_and(|code| code == 429 || code >= 500)
    }

    /// The bot token was rejected; retrying cannot help.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self.status,
            Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        ) || matches!(self.error_code, Some(401 | 403))
    }

    /// Another process is polling with the same token.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.status == Some(StatusCode::CONFLICT) || self.error_code == Some(409)
    }

    /// Telegram refused the text's markup; the same text may go through without
    /// `parse_mode`.
    #[must_use]
    pub fn rejects_markup(&self) -> bool {
        let bad_request =
            self.status == Some(StatusCode::BAD_REQUEST) || self.error_code == Some(400);
        if !bad_request {
            return false;
        }
        let description = self.description.to_ascii_lowercase();
        description.contains("can't parse")
            || description.contains("can't find end")
            || description.contains("wrong entity")
    }
}

impl fmt::Display for TelegramApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed", self.method)?;
        if let Some(code) = self.error_code {
            write!(f, " (code {code})")?;
        } else if let Some(status) = self.status {
            write!(f, " (status {status})")?;
        }
        write!(f, ": {}", self.description)
    }
}

impl std::error::Error for TelegramApiError {}

impl From<TelegramApiError> for BotError {
    fn from(error: TelegramApiError) -> Self {
        if error.rejects_markup() {
            BotError::MarkupRejected(error.to_string())
        } else {
            BotError::ApiError(error.to_string())
        }
    }
}

/// A reply to send; `reply_to` threads it under an earlier message when that still exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub chat_id: i64,
    pub text: String,
    pub parse_mode: Option<Dialect>,
    pub reply_to: Option<i64>,
}

impl OutgoingMessage {
    #[must_use]
    pub fn plain(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            parse_mode: None,
            reply_to: None,
        }
    }

    #[must_use]
    pub fn with_parse_mode(mut self, dialect: Dialect) -> Self {
        self.parse_mode = Some(dialect);
        self
    }

    #[must_use]
    pub fn reply_to(mut self, message_id: i64) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    fn to_body(&self) -> Value {
        let mut body = json!({
            "chat_id": self.chat_id,
            "text": self.text,
        });
        if let Some(dialect) = self.parse_mode {
            body["parse_mode"] = json!(dialect.parse_mode());
        }
        if let Some(message_id) = self.reply_to {
            body["reply_parameters"] = json!({
                "message_id": message_id,
                "allow_sending_without_reply": true,
            });
        }
        body
    }
}

/// Identifies a message the bot has sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: i64,
    pub message_id: i64,
}

/// Outbound side of the bot: send a reply, delete one.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> Result<SentMessage, BotError>;
    async fn delete(&self, chat_id: i64, message_id: i64) -> Result<(), BotError>;
}

pub struct TelegramClient {
    api_base: String,
    token: String,
    http: Client,
}

impl TelegramClient {
    #[must_use]
    pub fn new(token: String, api_base: &str) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build Telegram HTTP client with timeouts");
                Client::new()
            });
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            http,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call_once<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
    ) -> Result<T, TelegramApiError> {
        let response = self
            .http
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| TelegramApiError::transport(method, &e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TelegramApiError::transport(method, &e))?;
        let envelope: Value = serde_json::from_str(&text).map_err(|e| TelegramApiError {
            method: method.to_string(),
            status: Some(status),
            error_code: None,
            retry_after_secs: None,
            description: format!("invalid response body: {e}"),
        })?;

        let ok = envelope.get("ok").and_then(Value::as_bool).unwrap_or(false);
        if !status.is_success() || !ok {
            return Err(TelegramApiError {
                method: method.to_string(),
                status: Some(status),
                error_code: envelope.get("error_code").and_then(Value::as_i64),
                retry_after_secs: envelope
                    .get("parameters")
                    .and_then(|p| p.get("retry_after"))
                    .and_then(Value::as_u64),
                description: envelope
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown Telegram API error")
                    .to_string(),
            });
        }

        let result = envelope.get("result").cloned().unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(|e| TelegramApiError {
            method: method.to_string(),
            status: Some(status),
            error_code: None,
            retry_after_secs: None,
            description: format!("unexpected result shape: {e}"),
        })
    }

    async fn call_with_retry<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
    ) -> Result<T, TelegramApiError> {
        let strategy = ExponentialBackoff::from_millis(100)
            .map(jitter)
            .take(SEND_MAX_RETRIES);
        RetryIf::spawn(
            strategy,
            || self.call_once(method, body),
            |error: &TelegramApiError| {
                let transient = error.is_transient();
                if transient {
                    warn!(method, error = %error, "Telegram API transient failure; retrying");
                }
                transient
            },
        )
        .await
    }

    /// Fetch pending updates as raw JSON, one value per update.
    ///
    /// Updates are decoded one by one by the caller so a single unexpected payload
    /// cannot stall the offset.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Value>, TelegramApiError> {
        let body = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });
        self.call_once("getUpdates", &body).await
    }

    pub async fn send_message(
        &self,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, TelegramApiError> {
        let sent: Message = self
            .call_with_retry("sendMessage", &message.to_body())
            .await?;
        debug!(chat_id = sent.chat.id, message_id = sent.message_id, "message sent");
        Ok(SentMessage {
            chat_id: sent.chat.id,
            message_id: sent.message_id,
        })
    }

    pub async fn delete_message(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<(), TelegramApiError> {
        let body = json!({ "chat_id": chat_id, "message_id": message_id });
        let _: bool = self.call_with_retry("deleteMessage", &body).await?;
        Ok(())
    }

    pub async fn get_chat(&self, chat_id: i64) -> Result<ChannelInfo, TelegramApiError> {
        let chat: Chat = self
            .call_with_retry("getChat", &json!({ "chat_id": chat_id }))
            .await?;
        Ok(chat.into())
    }

    /// Register the command menu shown by Telegram clients.
    pub async fn set_my_commands(&self, commands: &[(&str, &str)]) -> Result<(), TelegramApiError> {
        let commands: Vec<Value> = commands
            .iter()
            .map(|(command, description)| json!({ "command": command, "description": description }))
            .collect();
        let _: bool = self
            .call_with_retry("setMyCommands", &json!({ "commands": commands }))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send(&self, message: &OutgoingMessage) -> Result<SentMessage, BotError> {
        Ok(self.send_message(message).await?)
    }

    async fn delete(&self, chat_id: i64, message_id: i64) -> Result<(), BotError> {
        Ok(self.delete_message(chat_id, message_id).await?)
    }
}

#[async_trait]
impl ChannelDirectory for TelegramClient {
    async fn channel_info(&self, chat_id: i64) -> Result<ChannelInfo, BotError> {
        Ok(self.get_chat(chat_id).await?)
    }
}
