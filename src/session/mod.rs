//! Ephemeral per-user collection sessions.
//!
//! A session is three pieces of state (action tag, channel lock, message list) that
//! expire together. Callers only ever see them through [`SessionStore`], which hands
//! out a whole [`Session`] at once and performs each mutation atomically.

pub mod memory;
pub mod redis_backend;

use async_trait::async_trait;

use crate::core::models::{ChannelInfo, CollectedMessage, Session, UserId};
use crate::errors::BotError;

pub use memory::InMemorySessionStore;
pub use redis_backend::RedisSessionStore;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Current session of `user`; an absent or expired session reads as idle and empty.
    async fn snapshot(&self, user: UserId) -> Result<Session, BotError>;

    /// Open a fresh collecting session, discarding any previous lock and batch.
    async fn begin(&self, user: UserId) -> Result<(), BotError>;

    /// Lock a collecting session to `channel` unless it is already locked.
    ///
    /// Returns the lock in effect afterwards, which is the earlier one if another
    /// submit won the race, or `None` when the session is no longer collecting.
    async fn lock_channel(
        &self,
        user: UserId,
        channel: &ChannelInfo,
    ) -> Result<Option<ChannelInfo>, BotError>;

    /// Append to a collecting session's batch and return its new length, or `None`
    /// when the session is no longer collecting.
    async fn append(
        &self,
        user: UserId,
        message: &CollectedMessage,
    ) -> Result<Option<usize>, BotError>;

    /// Move a collecting session with a non-empty batch to `Summarizing`.
    ///
    /// Returns the session as it was before the call. The claim was taken only when
    /// that session is collecting with at least one message; at most one caller sees
    /// that for a given batch.
    async fn claim(&self, user: UserId) -> Result<Session, BotError>;

    /// Hand a claimed batch back to collection. No-op unless the session is summarizing.
    async fn release(&self, user: UserId) -> Result<(), BotError>;

    /// Drop a claimed batch. No-op unless the session is summarizing, so a session
    /// restarted with `/start` in the meantime survives.
    async fn consume(&self, user: UserId) -> Result<(), BotError>;

    /// Drop every piece of the session. Clearing an idle session is a no-op.
    async fn clear(&self, user: UserId) -> Result<(), BotError>;
}
