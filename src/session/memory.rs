use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::SessionStore;
use crate::core::models::{ChannelInfo, CollectedMessage, Session, SessionState, UserId};
use crate::errors::BotError;

struct Entry {
    session: Session,
    expires_at: Instant,
}

/// Process-local session store, used when no Redis URL is configured and in tests.
///
/// Expired entries are dropped lazily on the next access for that user.
pub struct InMemorySessionStore {
    ttl: Duration,
    entries: Mutex<HashMap<UserId, Entry>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn live_entry(
        entries: &mut HashMap<UserId, Entry>,
        user: UserId,
        now: Instant,
    ) -> Option<&mut Entry> {
        if entries.get(&user).is_some_and(|e| e.expires_at <= now) {
            entries.remove(&user);
        }
        entries.get_mut(&user)
    }

    fn live_in_state(
        entries: &mut HashMap<UserId, Entry>,
        user: UserId,
        state: SessionState,
        now: Instant,
    ) -> Option<&mut Entry> {
        Self::live_entry(entries, user, now).filter(|e| e.session.state == state)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn snapshot(&self, user: UserId) -> Result<Session, BotError> {
        let mut entries = self.entries.lock().await;
        Ok(Self::live_entry(&mut entries, user, Instant::now())
            .map(|e| e.session.clone())
            .unwrap_or_default())
    }

    async fn begin(&self, user: UserId) -> Result<(), BotError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            user,
            Entry {
                session: Session {
                    state: SessionState::Collecting,
                    channel: None,
                    messages: Vec::new(),
                },
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn lock_channel(
        &self,
        user: UserId,
        channel: &ChannelInfo,
    ) -> Result<Option<ChannelInfo>, BotError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let Some(entry) = Self::live_in_state(&mut entries, user, SessionState::Collecting, now)
        else {
            return Ok(None);
        };
        let locked = entry
            .session
            .channel
            .get_or_insert_with(|| channel.clone())
            .clone();
        entry.expires_at = now + self.ttl;
        Ok(Some(locked))
    }

    async fn append(
        &self,
        user: UserId,
        message: &CollectedMessage,
    ) -> Result<Option<usize>, BotError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let Some(entry) = Self::live_in_state(&mut entries, user, SessionState::Collecting, now)
        else {
            return Ok(None);
        };
        entry.session.messages.push(message.clone());
        entry.expires_at = now + self.ttl;
        Ok(Some(entry.session.messages.len()))
    }

    async fn claim(&self, user: UserId) -> Result<Session, BotError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let Some(entry) = Self::live_entry(&mut entries, user, now) else {
            return Ok(Session::default());
        };
        let before = entry.session.clone();
        if before.is_collecting() && !before.messages.is_empty() {
            entry.session.state = SessionState::Summarizing;
            entry.expires_at = now + self.ttl;
        }
        Ok(before)
    }

    async fn release(&self, user: UserId) -> Result<(), BotError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if let Some(entry) = Self::live_in_state(&mut entries, user, SessionState::Summarizing, now)
        {
            entry.session.state = SessionState::Collecting;
            entry.expires_at = now + self.ttl;
        }
        Ok(())
    }

    async fn consume(&self, user: UserId) -> Result<(), BotError> {
        let mut entries = self.entries.lock().await;
        if Self::live_in_state(&mut entries, user, SessionState::Summarizing, Instant::now())
            .is_some()
        {
            entries.remove(&user);
        }
        Ok(())
    }

    async fn clear(&self, user: UserId) -> Result<(), BotError> {
        self.entries.lock().await.remove(&user);
        Ok(())
    }
}
