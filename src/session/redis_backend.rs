//! Redis/Valkey-backed session store.
//!
//! Keys, all sharing the session TTL:
//! - `<prefix>:action:<user>` holds the collecting tag
//! - `<prefix>:channel:<user>` holds the JSON channel lock
//! - `<prefix>:messages:<user>` is a list of JSON collected messages
//!
//! Unconditional mutations are a single `MULTI/EXEC` pipeline so readers never see a
//! half-updated session. Mutations that depend on the current action tag (claiming a
//! batch, appending to it) are Lua scripts run with `EVAL`, which Redis executes
//! atomically.
//!
//! Idempotent requests are retried once on a fresh connection. `claim` and `append` are
//! not: after an ambiguous failure the script may already have run, and replaying it
//! would push the message twice or report a claim the caller never got.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::FromRedisValue;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::SessionStore;
use crate::core::models::{ChannelInfo, CollectedMessage, Session, SessionState, UserId};
use crate::errors::BotError;

pub struct RedisSessionStore {
    client: redis::Client,
    key_prefix: String,
    ttl_secs: u64,
    connection: Arc<Mutex<Option<redis::aio::MultiplexedConnection>>>,
}

impl RedisSessionStore {
    /// # Errors
    ///
    /// Returns an error if the URL is not a valid Redis connection string.
    pub fn new(url: &str, key_prefix: &str, ttl: Duration) -> Result<Self, BotError> {
        let client = redis::Client::open(url)
            .map_err(|e| BotError::StoreError(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client,
            key_prefix: key_prefix.to_string(),
            ttl_secs: ttl.as_secs().max(1),
            connection: Arc::new(Mutex::new(None)),
        })
    }

    fn action_key(&self, user: UserId) -> String {
        format!("{}:action:{}", self.key_prefix, user)
    }

    fn channel_key(&self, user: UserId) -> String {
        format!("{}:channel:{}", self.key_prefix, user)
    }

    fn messages_key(&self, user: UserId) -> String {
        format!("{}:messages:{}", self.key_prefix, user)
    }

    async fn ensure_connection(
        &self,
        connection: &mut Option<redis::aio::MultiplexedConnection>,
    ) -> Result<(), BotError> {
        if connection.is_some() {
            return Ok(());
        }
        *connection = Some(self.client.get_multiplexed_async_connection().await?);
        debug!(key_prefix = %self.key_prefix, "redis session store connected");
        Ok(())
    }

    /// Run a request, reconnecting and retrying once if `replay` allows it.
    async fn run<T, F>(
        &self,
        operation: &'static str,
        replay: Replay,
        build: F,
    ) -> Result<T, BotError>
    where
        T: FromRedisValue + Send,
        F: Fn() -> Request,
    {
        let attempts = match replay {
            Replay::Retry => 2,
            Replay::Once => 1,
        };
        let mut last_err: Option<redis::RedisError> = None;
        for attempt in 0..attempts {
            let mut conn_guard = self.connection.lock().await;
            self.ensure_connection(&mut conn_guard).await?;
            let conn = conn_guard
                .as_mut()
                .ok_or_else(|| BotError::StoreError("redis connection unavailable".to_string()))?;
            let result: redis::RedisResult<T> = match build() {
                Request::Pipeline(pipe) => pipe.query_async(conn).await,
                Request::Script(cmd) => cmd.query_async(conn).await,
            };
            match result {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        error = %err,
                        "redis request failed; reconnecting"
                    );
                    *conn_guard = None;
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.map_or_else(
            || BotError::StoreError(format!("{operation} failed for unknown reason")),
            |e| BotError::StoreError(format!("{operation}: {e}")),
        ))
    }

    /// `EVAL` of `script` over the three session keys of `user`.
    fn script(&self, script: &str, user: UserId) -> redis::Cmd {
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(script)
            .arg(3)
            .arg(self.action_key(user))
            .arg(self.channel_key(user))
            .arg(self.messages_key(user));
        cmd
    }
}

enum Request {
    Pipeline(redis::Pipeline),
    Script(redis::Cmd),
}

#[derive(Clone, Copy)]
enum Replay {
    Retry,
    Once,
}

// KEYS: action, channel, messages. ARGV[1]: collecting tag, ARGV[2]: encoded channel,
// ARGV[3]: ttl. Returns the lock in effect, or nil when not collecting.
const LOCK_CHANNEL_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) ~= ARGV[1] then
  return false
end
local current = redis.call("GET", KEYS[2])
if not current then
  redis.call("SET", KEYS[2], ARGV[2], "EX", ARGV[3])
  current = ARGV[2]
end
redis.call("EXPIRE", KEYS[1], ARGV[3])
redis.call("EXPIRE", KEYS[2], ARGV[3])
return current
"#;

// ARGV[1]: collecting tag, ARGV[2]: encoded message, ARGV[3]: ttl.
// Returns the new batch length, or -1 when not collecting.
const APPEND_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) ~= ARGV[1] then
  return -1
end
local len = redis.call("RPUSH", KEYS[3], ARGV[2])
redis.call("EXPIRE", KEYS[1], ARGV[3])
redis.call("EXPIRE", KEYS[2], ARGV[3])
redis.call("EXPIRE", KEYS[3], ARGV[3])
return len
"#;

// ARGV[1]: collecting tag, ARGV[2]: summarizing tag, ARGV[3]: ttl.
// Returns {action, channel, messages} as they were before the call.
const CLAIM_SCRIPT: &str = r#"
local action = redis.call("GET", KEYS[1])
local channel = redis.call("GET", KEYS[2])
local messages = redis.call("LRANGE", KEYS[3], 0, -1)
if action == ARGV[1] and #messages > 0 then
  redis.call("SET", KEYS[1], ARGV[2], "EX", ARGV[3])
  redis.call("EXPIRE", KEYS[2], ARGV[3])
  redis.call("EXPIRE", KEYS[3], ARGV[3])
end
return {action, channel, messages}
"#;

// ARGV[1]: summarizing tag, ARGV[2]: collecting tag, ARGV[3]: ttl.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) ~= ARGV[1] then
  return 0
end
redis.call("SET", KEYS[1], ARGV[2], "EX", ARGV[3])
redis.call("EXPIRE", KEYS[2], ARGV[3])
redis.call("EXPIRE", KEYS[3], ARGV[3])
return 1
"#;

// ARGV[1]: summarizing tag.
const CONSUME_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) ~= ARGV[1] then
  return 0
end
redis.call("DEL", KEYS[1], KEYS[2], KEYS[3])
return 1
"#;

fn decode_session(
    action: Option<String>,
    channel: Option<String>,
    messages: &[String],
) -> Result<Session, BotError> {
    let channel = channel
        .map(|raw| serde_json::from_str::<ChannelInfo>(&raw))
        .transpose()?;
    let messages = messages
        .iter()
        .map(|raw| serde_json::from_str::<CollectedMessage>(raw))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Session {
        state: SessionState::from_tag(action.as_deref()),
        channel,
        messages,
    })
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn snapshot(&self, user: UserId) -> Result<Session, BotError> {
        let action_key = self.action_key(user);
        let channel_key = self.channel_key(user);
        let messages_key = self.messages_key(user);

        let (action, channel, messages): (Option<String>, Option<String>, Vec<String>) = self
            .run("snapshot", Replay::Retry, || {
                let mut pipe = redis::pipe();
                pipe.atomic();
                pipe.cmd("GET").arg(&action_key);
                pipe.cmd("GET").arg(&channel_key);
                pipe.cmd("LRANGE").arg(&messages_key).arg(0).arg(-1);
                Request::Pipeline(pipe)
            })
            .await?;
        decode_session(action, channel, &messages)
    }

    async fn begin(&self, user: UserId) -> Result<(), BotError> {
        let action_key = self.action_key(user);
        let channel_key = self.channel_key(user);
        let messages_key = self.messages_key(user);
        let ttl = self.ttl_secs;

        self.run::<(), _>("begin", Replay::Retry, || {
            let mut pipe = redis::pipe();
            pipe.atomic();
            pipe.cmd("SET")
                .arg(&action_key)
                .arg(SessionState::COLLECTING_TAG)
                .arg("EX")
                .arg(ttl)
                .ignore();
            pipe.cmd("DEL").arg(&channel_key).arg(&messages_key).ignore();
            Request::Pipeline(pipe)
        })
        .await
    }

    async fn lock_channel(
        &self,
        user: UserId,
        channel: &ChannelInfo,
    ) -> Result<Option<ChannelInfo>, BotError> {
        let encoded = serde_json::to_string(channel)?;
        let locked: Option<String> = self
            .run("lock_channel", Replay::Retry, || {
                let mut cmd = self.script(LOCK_CHANNEL_SCRIPT, user);
                cmd.arg(SessionState::COLLECTING_TAG)
                    .arg(&encoded)
                    .arg(self.ttl_secs);
                Request::Script(cmd)
            })
            .await?;
        locked
            .map(|raw| serde_json::from_str(&raw).map_err(BotError::from))
            .transpose()
    }

    async fn append(
        &self,
        user: UserId,
        message: &CollectedMessage,
    ) -> Result<Option<usize>, BotError> {
        let encoded = serde_json::to_string(message)?;
        let len: i64 = self
            .run("append", Replay::Once, || {
                let mut cmd = self.script(APPEND_SCRIPT, user);
                cmd.arg(SessionState::COLLECTING_TAG)
                    .arg(&encoded)
                    .arg(self.ttl_secs);
                Request::Script(cmd)
            })
            .await?;
        let Ok(len) = usize::try_from(len) else {
            debug!(user, "append skipped: session is not collecting");
            return Ok(None);
        };
        debug!(user, batch_len = len, "collected message appended");
        Ok(Some(len))
    }

    async fn claim(&self, user: UserId) -> Result<Session, BotError> {
        let (action, channel, messages): (Option<String>, Option<String>, Vec<String>) = self
            .run("claim", Replay::Once, || {
                let mut cmd = self.script(CLAIM_SCRIPT, user);
                cmd.arg(SessionState::COLLECTING_TAG)
                    .arg(SessionState::SUMMARIZING_TAG)
                    .arg(self.ttl_secs);
                Request::Script(cmd)
            })
            .await?;
        decode_session(action, channel, &messages)
    }

    async fn release(&self, user: UserId) -> Result<(), BotError> {
        let released: i64 = self
            .run("release", Replay::Retry, || {
                let mut cmd = self.script(RELEASE_SCRIPT, user);
                cmd.arg(SessionState::SUMMARIZING_TAG)
                    .arg(SessionState::COLLECTING_TAG)
                    .arg(self.ttl_secs);
                Request::Script(cmd)
            })
            .await?;
        debug!(user, released = released == 1, "summary claim released");
        Ok(())
    }

    async fn consume(&self, user: UserId) -> Result<(), BotError> {
        let consumed: i64 = self
            .run("consume", Replay::Retry, || {
                let mut cmd = self.script(CONSUME_SCRIPT, user);
                cmd.arg(SessionState::SUMMARIZING_TAG);
                Request::Script(cmd)
            })
            .await?;
        debug!(user, consumed = consumed == 1, "summarized batch dropped");
        Ok(())
    }

    async fn clear(&self, user: UserId) -> Result<(), BotError> {
        let action_key = self.action_key(user);
        let channel_key = self.channel_key(user);
        let messages_key = self.messages_key(user);

        self.run::<(), _>("clear", Replay::Retry, || {
            let mut pipe = redis::pipe();
            pipe.atomic();
            pipe.cmd("DEL")
                .arg(&messages_key)
                .arg(&channel_key)
                .arg(&action_key)
                .ignore();
            Request::Pipeline(pipe)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_by_purpose_and_user() {
        let store =
            RedisSessionStore::new("redis://127.0.0.1/", "digest", Duration::from_secs(60))
                .unwrap();
        assert_eq!(store.action_key(42), "digest:action:42");
        assert_eq!(store.channel_key(42), "digest:channel:42");
        assert_eq!(store.messages_key(42), "digest:messages:42");
    }

    #[test]
    fn rejects_invalid_url() {
        assert!(RedisSessionStore::new("not a url", "digest", Duration::from_secs(60)).is_err());
    }

    fn live_store() -> RedisSessionStore {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string());
        let prefix = format!("digest-test-{}", uuid::Uuid::new_v4());
        RedisSessionStore::new(&url, &prefix, Duration::from_secs(60)).unwrap()
    }

    fn message(id: i64) -> CollectedMessage {
        CollectedMessage {
            text: format!("post {id}"),
            message_id: id,
        }
    }

    #[tokio::test]
    #[ignore = "needs a running Redis server (REDIS_URL)"]
    async fn session_lifecycle_against_live_server() {
        let store = live_store();
        let channel = ChannelInfo {
            id: -1_001_234_567_890,
            title: "News".to_string(),
            description: None,
        };

        assert_eq!(store.append(1, &message(1)).await.unwrap(), None);
        assert_eq!(store.lock_channel(1, &channel).await.unwrap(), None);
        assert_eq!(store.snapshot(1).await.unwrap(), Session::default());

        store.begin(1).await.unwrap();
        assert_eq!(store.claim(1).await.unwrap().messages.len(), 0);
        assert_eq!(
            store.lock_channel(1, &channel).await.unwrap().map(|c| c.id),
            Some(channel.id)
        );
        assert_eq!(store.append(1, &message(5)).await.unwrap(), Some(1));

        let claimed = store.claim(1).await.unwrap();
        assert!(claimed.is_collecting());
        assert_eq!(claimed.messages, vec![message(5)]);
        assert_eq!(
            store.claim(1).await.unwrap().state,
            SessionState::Summarizing
        );
        assert_eq!(store.append(1, &message(6)).await.unwrap(), None);

        store.release(1).await.unwrap();
        assert!(store.snapshot(1).await.unwrap().is_collecting());

        store.claim(1).await.unwrap();
        store.consume(1).await.unwrap();
        assert_eq!(store.snapshot(1).await.unwrap(), Session::default());
    }
}
