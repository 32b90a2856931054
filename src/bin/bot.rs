use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use channel_digest::ai::{LlmClient, Moderator};
use channel_digest::audit::SqliteAuditStore;
use channel_digest::collect::Collector;
use channel_digest::core::config::AppConfig;
use channel_digest::session::{InMemorySessionStore, RedisSessionStore, SessionStore};
use channel_digest::telegram::response_builder::COMMAND_MENU;
use channel_digest::telegram::{DigestBot, TelegramClient, run_polling};
use channel_digest::worker::Summarizer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    channel_digest::setup_logging();

    let config = AppConfig::from_env().map_err(|e| {
        error!("Config error: {}", e);
        anyhow::anyhow!(e)
    })?;

    let store: Arc<dyn SessionStore> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisSessionStore::new(url, &config.session_key_prefix, config.session_ttl)
                .context("configuring Redis session store")?,
        ),
        None => {
            info!("REDIS_URL not set; sessions are kept in memory");
            Arc::new(InMemorySessionStore::new(config.session_ttl))
        }
    };

    let audit = Arc::new(
        SqliteAuditStore::open(&config.database_path)
            .with_context(|| format!("opening database {}", config.database_path))?,
    );

    let llm = Arc::new(LlmClient::new(
        config.openai_api_key.clone(),
        config.openai_org_id.clone(),
        config.openai_model.clone(),
        config.openai_base_url.clone(),
        config.model_timeout,
    ));
    let moderator: Option<Arc<dyn Moderator>> = if config.moderation {
        Some(llm.clone())
    } else {
        None
    };

    let telegram = Arc::new(TelegramClient::new(
        config.telegram_bot_token.clone(),
        &config.telegram_api_base,
    ));

    let collector = Collector::new(
        store.clone(),
        audit.clone(),
        telegram.clone(),
        config.has_user_limitation,
    );
    let summarizer = Summarizer::new(
        store,
        llm.clone(),
        moderator,
        audit.clone(),
        config.model_timeout,
    );
    let bot = Arc::new(DigestBot::new(
        telegram.clone(),
        collector,
        summarizer,
        audit.clone(),
        audit,
        config.has_user_limitation,
    ));

    if let Err(e) = telegram.set_my_commands(COMMAND_MENU).await {
        error!(error = %e, "failed to register bot commands");
    }
    info!(
        model = llm.model_name(),
        moderation = config.moderation,
        user_limitation = config.has_user_limitation,
        "channel-digest bot starting"
    );

    run_polling(telegram, bot).await?;
    Ok(())
}
