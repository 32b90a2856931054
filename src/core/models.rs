use serde::{Deserialize, Serialize};

/// Telegram user id of the person collecting messages.
pub type UserId = i64;

/// Source channel a session is locked to, as returned by `getChat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ChannelInfo {
    /// Channel id in the form used by `t.me/c/` links (the `-100` marker removed).
    #[must_use]
    pub fn link_id(&self) -> String {
        let raw = self.id.to_string();
        match raw.strip_prefix("-100") {
            Some(rest) => rest.to_string(),
            None => raw.trim_start_matches('-').to_string(),
        }
    }

    /// Deep link to a message of this channel.
    #[must_use]
    pub fn message_link(&self, message_id: i64) -> String {
        format!("https://t.me/c/{}/{}", self.link_id(), message_id)
    }
}

/// A forwarded message accepted into the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedMessage {
    pub text: String,
    /// Id of the message inside the source channel.
    pub message_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Collecting,
    /// `/finish` has claimed the batch and the model is working on it.
    Summarizing,
}

impl SessionState {
    pub const COLLECTING_TAG: &'static str = "gather_messages";
    pub const SUMMARIZING_TAG: &'static str = "summarizing";

    #[must_use]
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag {
            Some(Self::COLLECTING_TAG) => SessionState::Collecting,
            Some(Self::SUMMARIZING_TAG) => SessionState::Summarizing,
            _ => SessionState::Idle,
        }
    }
}

/// One consistent view of a user's collection session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    pub state: SessionState,
    pub channel: Option<ChannelInfo>,
    pub messages: Vec<CollectedMessage>,
}

impl Session {
    #[must_use]
    pub fn is_collecting(&self) -> bool {
        self.state == SessionState::Collecting
    }
}

/// Where a forwarded message originally came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOrigin {
    Channel { chat_id: i64, message_id: i64 },
    User,
    HiddenUser,
    /// Posted anonymously on behalf of a group chat.
    Chat,
    /// An origin kind this bot does not know.
    Other,
}

/// A forwarded message offered to the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub text: Option<String>,
    pub caption: Option<String>,
    pub origin: ForwardOrigin,
}

impl Candidate {
    /// Text if present, otherwise the caption; blank strings count as absent.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.text
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| self.caption.as_deref().filter(|c| !c.is_empty()))
    }
}

/// Result of a successful `submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// Number of messages in the batch after this one was appended.
    pub count: usize,
    /// Whether this message locked the session to its channel.
    pub first: bool,
    pub channel: ChannelInfo,
    pub message_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryItem {
    pub title: String,
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryGroup {
    pub title: String,
    pub messages: Vec<SummaryItem>,
}

/// Envelope the model is instructed to answer with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub result: Vec<SummaryGroup>,
}

/// A finished summarization, ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub text: String,
    pub channel: ChannelInfo,
    pub groups: Vec<SummaryGroup>,
    pub tokens_spent: u64,
}

/// One completed summarization, kept for usage reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub user_id: UserId,
    pub target_channel_id: i64,
    pub tokens_spent: u64,
    pub timestamp_secs: i64,
}
