//! Prompt construction for the grouping summarizer.

use serde::Serialize;

use crate::core::models::{ChannelInfo, CollectedMessage};

/// Upper bound on channel title/description length embedded in the system prompt.
pub const MAX_CHANNEL_FIELD_LEN: usize = 800;

/// Maximum number of tokens the model may produce for one summary.
pub const SUMMARY_MAX_TOKENS: i64 = 4096;

/// Sampling temperature; low enough to keep the JSON shape stable.
pub const SUMMARY_TEMPERATURE: f64 = 0.4;

/// One message as presented to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage<'a> {
    pub text: &'a str,
    pub id: i64,
}

impl<'a> From<&'a CollectedMessage> for PromptMessage<'a> {
    fn from(message: &'a CollectedMessage) -> Self {
        Self {
            text: &message.text,
            id: message.message_id,
        }
    }
}

/// Serialize the kept messages as the JSON array sent in the user turn.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn build_payload(messages: &[PromptMessage<'_>]) -> Result<String, serde_json::Error> {
    serde_json::to_string(messages)
}

/// Remove control characters and hard-truncate channel metadata before it enters the prompt.
#[must_use]
pub fn sanitize_channel_field(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .take(MAX_CHANNEL_FIELD_LEN)
        .collect()
}

/// System instruction describing the grouping rules and the strict response shape.
#[must_use]
pub fn build_system_prompt(channel: &ChannelInfo) -> String {
    let title = sanitize_channel_field(&channel.title);
    let description = channel
        .description
        .as_deref()
        .map(sanitize_channel_field)
        .unwrap_or_default();

    format!(
        "You are a summarizer bot. Summarize the following messages from a Telegram channel.
Instructions:
1. The messages are given as a JSON array. Each message has a `text` and an `id` field.
2. Not every message has to be summarized. Only pick messages that are important, funny or otherwise worth reading.
3. Put related messages into summary groups. A group holds one or more messages.
   Prefer fewer than 4 messages per group and return at most 6 groups. Longer messages are more likely to be worth picking.
4. Every summary group has a title: a short sentence (at most 10 words) that describes the group exactly and is as humorous as possible.
   Example: \"Elon Musk's attitude towards Dogecoin\", \"A bad day starts with the drop of a coffee cup\".
5. Every message in a group has its own title: a short sentence (at most 15 words) that describes that message exactly and is as humorous as possible.
   Example: \"How he explains the Dogecoin\", \"The Dogecoin price prediction\".
6. A message may be used ONLY ONCE across all summary groups. Never reuse a message id, neither in the same group nor in another one.
7. Group titles must be unique.
8. WRITE ALL TITLES IN THE LANGUAGE THE PROVIDED MESSAGES ARE WRITTEN IN.
9. Respond with a single JSON object of this exact shape, where every `id` is one of the ids provided:
{{
    \"result\": [{{
        \"title\": \"Elon Musk's attitude towards Dogecoin\",
        \"messages\": [
            {{ \"title\": \"How he explains the Dogecoin\", \"id\": 490 }},
            {{ \"title\": \"The Dogecoin price prediction\", \"id\": 494 }}
        ]
    }}, {{
        \"title\": \"A bad day starts with the drop of a coffee cup\",
        \"messages\": [
            {{ \"title\": \"The coffee cup drop\", \"id\": 493 }}
        ]
    }}]
}}
   Any other shape cannot be understood by the bot.
Information about the channel, use it to write better summaries:
Channel Title: {title}
Channel Description: {description}"
    )
}
