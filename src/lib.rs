//! channel-digest - a Telegram bot that summarizes a batch of forwarded channel messages
//! with ChatGPT.
//!
//! A user opens a collection session with `/start`, forwards posts from one channel and
//! sends `/finish`. The bot asks the model to group the posts and caption each of them,
//! validates the JSON answer and replies with a list of links back to the original posts.
//!
//! # Architecture
//!
//! - [`collect::Collector`]: the per-user state machine (`start`, `submit`, `cancel`)
//! - [`worker::Summarizer`]: moderation, prompt, model call, validation, rendering
//! - [`session`]: TTL-bound session storage in Redis or in memory
//! - [`audit`]: usage history and whitelist in SQLite
//! - [`telegram`]: Bot API client, long polling and command dispatch
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use channel_digest::audit::MemoryAuditStore;
//! use channel_digest::collect::Collector;
//! use channel_digest::session::InMemorySessionStore;
//! use channel_digest::telegram::TelegramClient;
//!
//! # async fn demo() -> Result<(), channel_digest::errors::DigestError> {
//! channel_digest::setup_logging();
//!
//! let store = Arc::new(InMemorySessionStore::new(Duration::from_secs(3600)));
//! let audit = Arc::new(MemoryAuditStore::default());
//! let telegram = Arc::new(TelegramClient::new("123:abc".into(), "https://api.telegram.org"));
//! let collector = Collector::new(store, audit, telegram, false);
//!
//! collector.start(42).await?;
//! # Ok(())
//! # }
//! ```

pub mod ai;
pub mod audit;
pub mod collect;
pub mod core;
pub mod errors;
pub mod session;
pub mod telegram;
pub mod utils;
pub mod worker;

pub use errors::{BotError, DigestError};

/// Install the JSON `tracing` subscriber, filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls leave the first subscriber in place.
///
/// # Example
///
/// ```
/// channel_digest::setup_logging();
/// ```
pub fn setup_logging() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().json().with_target(true);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
