//! Fakes for the collaborators of the collector, the summarizer and the bot.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use channel_digest::ai::{ModelClient, ModelError, ModelRequest, ModelResponse, Moderator};
use channel_digest::audit::MemoryAuditStore;
use channel_digest::collect::{ChannelDirectory, Collector};
use channel_digest::core::models::{Candidate, ChannelInfo, ForwardOrigin};
use channel_digest::errors::BotError;
use channel_digest::session::InMemorySessionStore;
use channel_digest::telegram::{ChatTransport, OutgoingMessage, SentMessage};
use channel_digest::worker::Summarizer;

pub const CHANNEL_A: i64 = -1_001_234_567_890;
pub const CHANNEL_B: i64 = -1_009_876_543_210;
pub const USER: i64 = 42;

/// `getChat` stand-in that counts lookups.
#[derive(Default)]
pub struct FakeDirectory {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ChannelDirectory for FakeDirectory {
    async fn channel_info(&self, chat_id: i64) -> Result<ChannelInfo, BotError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ChannelInfo {
            id: chat_id,
            title: format!("Channel {chat_id}"),
            description: Some("test channel".into()),
        })
    }
}

pub enum Reply {
    Content(Option<String>, Option<u64>),
    ContextLength,
    Failure,
    Hang,
    /// Answers with the content after the delay.
    Slow(Duration, String),
}

/// Model stand-in answering every request with the same scripted reply.
pub struct FakeModel {
    reply: Reply,
    pub requests: Mutex<Vec<ModelRequest>>,
}

impl FakeModel {
    pub fn answering(content: &str) -> Self {
        Self::with(Reply::Content(Some(content.to_string()), Some(120)))
    }

    pub fn with(reply: Reply) -> Self {
        Self {
            reply,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub async fn calls(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl ModelClient for FakeModel {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        self.requests.lock().await.push(request);
        match &self.reply {
            Reply::Content(content, tokens) => Ok(ModelResponse {
                content: content.clone(),
                total_tokens: *tokens,
            }),
            Reply::ContextLength => Err(ModelError::ContextLengthExceeded),
            Reply::Failure => Err(ModelError::Other("upstream 503".into())),
            Reply::Slow(delay, content) => {
                tokio::time::sleep(*delay).await;
                Ok(ModelResponse {
                    content: Some(content.clone()),
                    total_tokens: Some(120),
                })
            }
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(ModelError::Other("should have timed out".into()))
            }
        }
    }
}

/// Flags exactly the texts it was given; fails every check when `broken`.
#[derive(Default)]
pub struct FakeModerator {
    pub flagged: HashSet<String>,
    pub broken: bool,
}

#[async_trait]
impl Moderator for FakeModerator {
    async fn is_flagged(&self, text: &str) -> Result<bool, BotError> {
        if self.broken {
            return Err(BotError::OpenAIError("moderation down".into()));
        }
        Ok(self.flagged.contains(text))
    }
}

/// Records every outgoing call; sent messages get increasing ids starting at 1000.
///
/// With `reject_markup` set, messages carrying a `parse_mode` fail the way Telegram
/// answers unbalanced entities and are not recorded.
pub struct FakeTransport {
    next_id: AtomicI64,
    pub reject_markup: bool,
    pub sent: Mutex<Vec<OutgoingMessage>>,
    pub deleted: Mutex<Vec<(i64, i64)>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            next_id: AtomicI64::new(1000),
            reject_markup: false,
            sent: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }
}

impl FakeTransport {
    pub fn rejecting_markup() -> Self {
        Self {
            reject_markup: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<SentMessage, BotError> {
        if self.reject_markup && message.parse_mode.is_some() {
            return Err(BotError::MarkupRejected(
                "sendMessage failed (code 400): Bad Request: can't parse entities".into(),
            ));
        }
        self.sent.lock().await.push(message.clone());
        Ok(SentMessage {
            chat_id: message.chat_id,
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst),
        })
    }

    async fn delete(&self, chat_id: i64, message_id: i64) -> Result<(), BotError> {
        self.deleted.lock().await.push((chat_id, message_id));
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<InMemorySessionStore>,
    pub audit: Arc<MemoryAuditStore>,
    pub directory: Arc<FakeDirectory>,
    pub model: Arc<FakeModel>,
    pub collector: Collector,
    pub summarizer: Summarizer,
}

impl Harness {
    pub fn new(model: FakeModel) -> Self {
        Self::build(model, None, Duration::from_secs(3600), false)
    }

    pub fn build(
        model: FakeModel,
        moderator: Option<FakeModerator>,
        ttl: Duration,
        has_user_limitation: bool,
    ) -> Self {
        let store = Arc::new(InMemorySessionStore::new(ttl));
        let audit = Arc::new(MemoryAuditStore::new());
        let directory = Arc::new(FakeDirectory::default());
        let model = Arc::new(model);
        let moderator = moderator.map(|m| Arc::new(m) as Arc<dyn Moderator>);
        let collector = Collector::new(
            store.clone(),
            audit.clone(),
            directory.clone(),
            has_user_limitation,
        );
        let summarizer = Summarizer::new(
            store.clone(),
            model.clone(),
            moderator,
            audit.clone(),
            Duration::from_millis(200),
        );
        Self {
            store,
            audit,
            directory,
            model,
            collector,
            summarizer,
        }
    }
}

pub fn forward(chat_id: i64, message_id: i64, text: &str) -> Candidate {
    Candidate {
        text: Some(text.to_string()),
        caption: None,
        origin: ForwardOrigin::Channel {
            chat_id,
            message_id,
        },
    }
}

pub const GROUPED_5_7: &str =
    r#"{"result":[{"title":"T","messages":[{"title":"t1","id":5},{"title":"t2","id":7}]}]}"#;
