//! Usage history and whitelist.
//!
//! Both live outside the collection core: the pipeline only calls
//! [`AuditSink::record`], the bot front-end asks [`AccessControl`] before opening a
//! session and uses the history for `/log`.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::core::models::{AuditRecord, UserId};
use crate::errors::BotError;

pub use memory::MemoryAuditStore;
pub use sqlite::SqliteAuditStore;

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditRecord) -> Result<(), BotError>;

    /// Most recent first.
    async fn history(&self, user: UserId, limit: usize) -> Result<Vec<AuditRecord>, BotError>;

    async fn total_tokens(&self) -> Result<u64, BotError>;
}

#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn is_authorized(&self, user: UserId) -> Result<bool, BotError>;

    /// Whitelisted users allowed to promote others may also read usage logs.
    async fn can_view_logs(&self, user: UserId) -> Result<bool, BotError>;

    /// Seed the whitelist with `user` when it is empty. Returns whether the user was added.
    async fn grant_first_user(&self, user: UserId) -> Result<bool, BotError>;
}
