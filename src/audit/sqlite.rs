use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use super::{AccessControl, AuditSink};
use crate::core::models::{AuditRecord, UserId};
use crate::errors::BotError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    target_channel_id INTEGER NOT NULL,
    token_spent INTEGER NOT NULL,
    date INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_history_user_date ON history (user_id, date DESC);
CREATE TABLE IF NOT EXISTS user_whitelist (
    user_id INTEGER PRIMARY KEY,
    can_promote_others INTEGER NOT NULL DEFAULT 0
);
";

/// SQLite-backed audit log and whitelist.
///
/// `rusqlite` is blocking, so every call runs on the blocking pool with the
/// connection behind a mutex.
#[derive(Clone)]
pub struct SqliteAuditStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditStore {
    /// Open (or create) the database file and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BotError> {
        let conn = Connection::open(path.as_ref())?;
        Self::with_connection(conn)
    }

    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, BotError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, BotError> {
        conn.execute_batch(SCHEMA)?;
        info!("audit database ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, BotError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            op(&*guard).map_err(BotError::from)
        })
        .await
        .map_err(|e| BotError::DatabaseError(format!("database task failed: {e}")))?
    }
}

fn to_sql_tokens(tokens: u64) -> i64 {
    i64::try_from(tokens).unwrap_or(i64::MAX)
}

fn from_sql_tokens(tokens: i64) -> u64 {
    u64::try_from(tokens).unwrap_or(0)
}

#[async_trait]
impl AuditSink for SqliteAuditStore {
    async fn record(&self, entry: AuditRecord) -> Result<(), BotError> {
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO history (user_id, target_channel_id, token_spent, date)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    entry.user_id,
                    entry.target_channel_id,
                    to_sql_tokens(entry.tokens_spent),
                    entry.timestamp_secs
                ],
            )
            .map(|_| ())
        })
        .await
    }

    async fn history(&self, user: UserId, limit: usize) -> Result<Vec<AuditRecord>, BotError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, target_channel_id, token_spent, date FROM history
                 WHERE user_id = ?1 ORDER BY date DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![user, limit], |row| {
                Ok(AuditRecord {
                    user_id: row.get(0)?,
                    target_channel_id: row.get(1)?,
                    tokens_spent: from_sql_tokens(row.get(2)?),
                    timestamp_secs: row.get(3)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
    }

    async fn total_tokens(&self) -> Result<u64, BotError> {
        self.blocking(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(token_spent), 0) FROM history",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(from_sql_tokens)
        })
        .await
    }
}

#[async_trait]
impl AccessControl for SqliteAuditStore {
    async fn is_authorized(&self, user: UserId) -> Result<bool, BotError> {
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT 1 FROM user_whitelist WHERE user_id = ?1",
                params![user],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
        })
        .await
    }

    async fn can_view_logs(&self, user: UserId) -> Result<bool, BotError> {
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT can_promote_others FROM user_whitelist WHERE user_id = ?1",
                params![user],
                |row| row.get::<_, bool>(0),
            )
            .optional()
            .map(|found| found.unwrap_or(false))
        })
        .await
    }

    async fn grant_first_user(&self, user: UserId) -> Result<bool, BotError> {
        self.blocking(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO user_whitelist (user_id, can_promote_others)
                 SELECT ?1, 1 WHERE NOT EXISTS (SELECT 1 FROM user_whitelist)",
                params![user],
            )?;
            Ok(inserted == 1)
        })
        .await
    }
}
