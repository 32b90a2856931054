//! Sending the `/finish` result back to the user.

use tracing::{info, warn};

use crate::core::models::Digest;
use crate::errors::{BotError, DigestError};
use crate::telegram::client::{ChatTransport, OutgoingMessage, SentMessage};
use crate::utils::escape::Dialect;

/// Telegram's maximum length for one text message.
pub const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const PARAGRAPH_BREAK: &str = "\n\n";

/// Split `text` into pieces of at most `limit` characters, preferring paragraph
/// boundaries, then line boundaries.
#[must_use]
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if limit == 0 || text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for paragraph in text.split(PARAGRAPH_BREAK) {
        for piece in fit_paragraph(paragraph, limit) {
            let joined_len = if current.is_empty() {
                piece.chars().count()
            } else {
                current.chars().count() + PARAGRAPH_BREAK.len() + piece.chars().count()
            };
            if joined_len > limit && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str(PARAGRAPH_BREAK);
            }
            current.push_str(&piece);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn fit_paragraph(paragraph: &str, limit: usize) -> Vec<String> {
    if paragraph.chars().count() <= limit {
        return vec![paragraph.to_string()];
    }
    let mut pieces = Vec::new();
    let mut current = String::new();
    for line in paragraph.lines() {
        let line_len = line.chars().count();
        if line_len > limit {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = line.chars().collect();
            pieces.extend(chars.chunks(limit).map(|c| c.iter().collect::<String>()));
            continue;
        }
        let joined_len = if current.is_empty() {
            line_len
        } else {
            current.chars().count() + 1 + line_len
        };
        if joined_len > limit {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Reply to the `/finish` command with the digest or the failure text.
///
/// Only the first piece of a long digest is threaded under the command.
pub async fn deliver_outcome(
    transport: &dyn ChatTransport,
    chat_id: i64,
    reply_to: i64,
    outcome: &Result<Digest, DigestError>,
) -> Result<(), BotError> {
    match outcome {
        Ok(digest) => {
            let chunks = split_message(&digest.text, TELEGRAM_MAX_MESSAGE_LENGTH);
            info!(chat_id, chunks = chunks.len(), "delivering summary");
            for (index, chunk) in chunks.into_iter().enumerate() {
                let mut message =
                    OutgoingMessage::plain(chat_id, chunk).with_parse_mode(Dialect::Markdown);
                if index == 0 {
                    message = message.reply_to(reply_to);
                }
                send_with_plain_fallback(transport, message).await?;
            }
        }
        Err(e) => {
            let message = OutgoingMessage::plain(chat_id, e.user_message()).reply_to(reply_to);
            transport.send(&message).await?;
        }
    }
    Ok(())
}

/// Send `message`, resending it without `parse_mode` if Telegram rejects the markup.
pub async fn send_with_plain_fallback(
    transport: &dyn ChatTransport,
    mut message: OutgoingMessage,
) -> Result<SentMessage, BotError> {
    match transport.send(&message).await {
        Err(BotError::MarkupRejected(detail)) => {
            warn!(
                chat_id = message.chat_id,
                error = %detail,
                "Telegram rejected Markdown; resending as plain text"
            );
            message.parse_mode = None;
            transport.send(&message).await
        }
        other => other,
    }
}

/// Remove the "Summarizing messages..." placeholder. A failure only leaves it visible.
pub async fn retire_placeholder(transport: &dyn ChatTransport, placeholder: SentMessage) {
    if let Err(e) = transport
        .delete(placeholder.chat_id, placeholder.message_id)
        .await
    {
        warn!(
            chat_id = placeholder.chat_id,
            message_id = placeholder.message_id,
            error = %e,
            "failed to delete placeholder"
        );
    }
}
