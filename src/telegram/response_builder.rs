//! Reply texts sent back to Telegram users.
//!
//! Everything that interpolates channel titles or model output makes it safe for the
//! dialect the reply is sent with.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::core::models::{AuditRecord, ChannelInfo, SummaryGroup};
use crate::utils::escape::{escape_html, markdown_bold_text, markdown_link_label};

pub const START_REPLY: &str = "Please forward messages from the channel you want to summarize. The first forwarded message should be from the channel you want to summarize.";
pub const NEXT_MESSAGE_REPLY: &str =
    "Message received. \n\nSend more messages to summarize or send /finish.";
pub const SUMMARIZING_PLACEHOLDER: &str = "Summarizing messages...";
pub const CANCEL_REPLY: &str = "Action canceled.";
pub const PRIVATE_CHAT_ONLY: &str = "Please send me a private message to use this bot.";
pub const LOG_FORBIDDEN: &str = "You do not have permission to view logs.";
pub const WHITELIST_GRANTED: &str = "User added to whitelist";

/// Commands registered with `setMyCommands`, in menu order.
pub const COMMAND_MENU: &[(&str, &str)] = &[
    ("start", "Start the bot"),
    ("finish", "Finish sending messages"),
    ("cancel", "Cancel current action"),
    ("log", "View log"),
    ("init", "Init bot"),
    ("help", "Get help"),
];

/// Number of history records shown by `/log`.
pub const LOG_HISTORY_LIMIT: usize = 5;

/// Render summary groups as a legacy-Markdown message.
///
/// Each group becomes a bold bullet header followed by one line per message linking back
/// to the original post; groups are separated by a blank line, in input order.
#[must_use]
pub fn render_summary(channel: &ChannelInfo, groups: &[SummaryGroup]) -> String {
    groups
        .iter()
        .map(|group| {
            let items = group
                .messages
                .iter()
                .map(|item| {
                    format!(
                        "- [{}]({})",
                        markdown_link_label(&item.title),
                        channel.message_link(item.id)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            format!("• *{}*\n\n{}", markdown_bold_text(&group.title), items)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Acknowledgement for the message that locked the session to its channel (Markdown).
#[must_use]
pub fn first_message_reply(channel: &ChannelInfo, message_id: i64) -> String {
    format!(
        "Message received and channel information saved. \n\nChannel: [{}]({}) \n\nSend more messages to summarize or send /finish.",
        markdown_link_label(&channel.title),
        channel.message_link(message_id)
    )
}

/// Usage and version text for `/help` and its aliases (HTML).
#[must_use]
pub fn help_text() -> String {
    let mut about = format!(
        "Version <code>{}</code>",
        escape_html(env!("CARGO_PKG_VERSION"))
    );
    let repository = env!("CARGO_PKG_REPOSITORY");
    if !repository.is_empty() {
        about.push_str(&format!(
            "\nGet code from <code>{}</code>, <code>{}</code> license",
            escape_html(repository),
            escape_html(env!("CARGO_PKG_LICENSE"))
        ));
    }
    format!(
        "👋 Hi, I can summarize some messages of a channel.

<b>Usage</b>
<blockquote>1. Send me a private message /start
2. Forward messages from a channel to me. Make sure the first message forwarded to me is from the channel you want to summarize, and not a forwarded message.
3. Send me /finish to stop sending messages and summarize the messages I have received.
</blockquote>

<b>About the bot</b>
<blockquote>{about}</blockquote>"
    )
}

/// Usage history for `/log` (Markdown). `records` are most recent first.
#[must_use]
pub fn log_text(records: &[AuditRecord], global_total: u64) -> String {
    let shown: u64 = records.iter().map(|r| r.tokens_spent).sum();
    let entries = records
        .iter()
        .map(|record| {
            let channel = ChannelInfo {
                id: record.target_channel_id,
                title: String::new(),
                description: None,
            };
            format!(
                "Channel: [{}](https://t.me/c/{})\nDate: {}\nToken spent: {}",
                record.target_channel_id,
                channel.link_id(),
                iso_date(record.timestamp_secs),
                record.tokens_spent
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("History:\n\n{entries}\nTotal token usage: {shown}/{global_total}")
}

fn iso_date(timestamp_secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp_secs, 0)
        .map(|d| d.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| timestamp_secs.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::SummaryItem;

    fn channel() -> ChannelInfo {
        ChannelInfo {
            id: -1_001_234_567_890,
            title: "My_Channel".into(),
            description: None,
        }
    }

    #[test]
    fn summary_keeps_entities_balanced() {
        let groups = vec![SummaryGroup {
            title: "2*3 my_topic".into(),
            messages: vec![SummaryItem {
                title: "see [this]".into(),
                id: 3,
            }],
        }];
        let text = render_summary(&channel(), &groups);
        assert_eq!(
            text,
            "• *2\u{2217}3 my_topic*\n\n- [see [this)](https://t.me/c/1234567890/3)"
        );
        assert!(!text.contains('\\'));
        assert_eq!(text.matches('*').count(), 2);
    }

    #[test]
    fn first_reply_links_to_the_forwarded_post() {
        let reply = first_message_reply(&channel(), 42);
        assert!(reply.contains("[My_Channel](https://t.me/c/1234567890/42)"));
    }

    #[test]
    fn help_mentions_version() {
        assert!(help_text().contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn log_lists_records_and_totals() {
        let records = vec![
            AuditRecord {
                user_id: 1,
                target_channel_id: -1_001_234_567_890,
                tokens_spent: 30,
                timestamp_secs: 0,
            },
            AuditRecord {
                user_id: 1,
                target_channel_id: -1_001_234_567_890,
                tokens_spent: 12,
                timestamp_secs: 86_400,
            },
        ];
        let text = log_text(&records, 100);
        assert!(text.starts_with("History:\n\n"));
        assert!(text.contains("Date: 1970-01-01T00:00:00.000Z"));
        assert!(text.contains("Date: 1970-01-02T00:00:00.000Z"));
        assert!(text.ends_with("Total token usage: 42/100"));
    }
}
