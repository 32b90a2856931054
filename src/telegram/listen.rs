//! Long-polling loop.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use super::bot::DigestBot;
use super::client::{POLL_TIMEOUT_SECS, TelegramClient};
use super::parser::Update;
use crate::errors::BotError;

const POLL_RETRY_SECS: u64 = 5;
const POLL_CONFLICT_RETRY_SECS: u64 = 2;
const POLL_MAX_RATE_LIMIT_RETRY_SECS: u64 = 60;

/// Poll for updates forever, handling each one on its own task so one user's slow
/// `/finish` never holds up another user.
///
/// # Errors
///
/// Returns only when Telegram rejects the bot token.
pub async fn run_polling(client: Arc<TelegramClient>, bot: Arc<DigestBot>) -> Result<(), BotError> {
    let mut offset: i64 = 0;
    info!("Telegram bot listening for updates");
    loop {
        let updates = match client.get_updates(offset, POLL_TIMEOUT_SECS).await {
            Ok(updates) => updates,
            Err(e) if e.is_unauthorized() => return Err(e.into()),
            Err(e) => {
                let delay = if e.is_conflict() {
                    warn!(error = %e, "polling conflict; is another instance using this token?");
                    POLL_CONFLICT_RETRY_SECS
                } else {
                    warn!(error = %e, "Telegram poll error");
                    e.retry_after_secs
                        .unwrap_or(POLL_RETRY_SECS)
                        .clamp(1, POLL_MAX_RATE_LIMIT_RETRY_SECS)
                };
                tokio::time::sleep(Duration::from_secs(delay)).await;
                continue;
            }
        };

        for raw in updates {
            if let Some(update_id) = raw.get("update_id").and_then(Value::as_i64) {
                offset = offset.max(update_id + 1);
            }
            match serde_json::from_value::<Update>(raw) {
                Ok(update) => {
                    let bot = Arc::clone(&bot);
                    tokio::spawn(async move { bot.handle_update(update).await });
                }
                Err(e) => warn!(error = %e, "skipping undecodable update"),
            }
        }
    }
}
