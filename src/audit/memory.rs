use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{AccessControl, AuditSink};
use crate::core::models::{AuditRecord, UserId};
use crate::errors::BotError;

/// Audit log and whitelist kept in memory; nothing survives a restart.
#[derive(Default)]
pub struct MemoryAuditStore {
    records: Mutex<Vec<AuditRecord>>,
    /// user id -> can promote others
    whitelist: Mutex<HashMap<UserId, bool>>,
}

impl MemoryAuditStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record in insertion order.
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }

    pub async fn allow(&self, user: UserId, can_promote_others: bool) {
        self.whitelist.lock().await.insert(user, can_promote_others);
    }
}

#[async_trait]
impl AuditSink for MemoryAuditStore {
    async fn record(&self, entry: AuditRecord) -> Result<(), BotError> {
        self.records.lock().await.push(entry);
        Ok(())
    }

    async fn history(&self, user: UserId, limit: usize) -> Result<Vec<AuditRecord>, BotError> {
        let records = self.records.lock().await;
        let mut mine: Vec<AuditRecord> = records
            .iter()
            .filter(|r| r.user_id == user)
            .cloned()
            .collect();
        // Stable sort keeps later insertions ahead of earlier ones with the same timestamp.
        mine.reverse();
        mine.sort_by(|a, b| b.timestamp_secs.cmp(&a.timestamp_secs));
        mine.truncate(limit);
        Ok(mine)
    }

    async fn total_tokens(&self) -> Result<u64, BotError> {
        Ok(self.records.lock().await.iter().map(|r| r.tokens_spent).sum())
    }
}

#[async_trait]
impl AccessControl for MemoryAuditStore {
    async fn is_authorized(&self, user: UserId) -> Result<bool, BotError> {
        Ok(self.whitelist.lock().await.contains_key(&user))
    }

    async fn can_view_logs(&self, user: UserId) -> Result<bool, BotError> {
        Ok(self.whitelist.lock().await.get(&user).copied().unwrap_or(false))
    }

    async fn grant_first_user(&self, user: UserId) -> Result<bool, BotError> {
        let mut whitelist = self.whitelist.lock().await;
        if !whitelist.is_empty() {
            return Ok(false);
        }
        whitelist.insert(user, true);
        Ok(true)
    }
}
