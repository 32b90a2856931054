//! Wire types for the subset of the Telegram Bot API updates the bot reacts to.

use serde::Deserialize;

use crate::core::models::{Candidate, ChannelInfo, ForwardOrigin};

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub forward_origin: Option<WireForwardOrigin>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Chat {
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.kind == "private"
    }
}

impl From<Chat> for ChannelInfo {
    fn from(chat: Chat) -> Self {
        ChannelInfo {
            id: chat.id,
            title: chat.title.unwrap_or_default(),
            description: chat.description,
        }
    }
}

/// `MessageOrigin` as sent by Telegram, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireForwardOrigin {
    User {},
    HiddenUser {},
    Chat {},
    Channel { chat: Chat, message_id: i64 },
    #[serde(other)]
    Unknown,
}

impl From<&WireForwardOrigin> for ForwardOrigin {
    fn from(origin: &WireForwardOrigin) -> Self {
        match origin {
            WireForwardOrigin::Channel { chat, message_id } => ForwardOrigin::Channel {
                chat_id: chat.id,
                message_id: *message_id,
            },
            WireForwardOrigin::User {} => ForwardOrigin::User,
            WireForwardOrigin::HiddenUser {} => ForwardOrigin::HiddenUser,
            WireForwardOrigin::Chat {} => ForwardOrigin::Chat,
            WireForwardOrigin::Unknown => ForwardOrigin::Other,
        }
    }
}


impl Message {
    /// Name of the command this message carries, e.g. `help` for `/Help@digest_bot now`.
    ///
    /// The name is lowercased and any `@botname` suffix and arguments are dropped.
    #[must_use]
    pub fn command(&self) -> Option<String> {
        let text = self.text.as_deref()?.trim();
        let head = text.strip_prefix('/')?.split_whitespace().next()?;
        let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
        (!name.is_empty()).then_some(name)
    }

    /// The content offered to the collector, or `None` when the message was not forwarded.
    #[must_use]
    pub fn to_candidate(&self) -> Option<Candidate> {
        let origin = self.forward_origin.as_ref()?;
        Some(Candidate {
            text: self.text.clone(),
            caption: self.caption.clone(),
            origin: ForwardOrigin::from(origin),
        })
    }
}
