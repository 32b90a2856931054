use std::env;
use std::time::Duration;

/// Seven days, matching how long a forgotten collection is kept around.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60 * 24 * 7;
pub const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
pub const DEFAULT_DATABASE_PATH: &str = "digest.db";
pub const DEFAULT_SESSION_KEY_PREFIX: &str = "digest";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub telegram_bot_token: String,
    pub telegram_api_base: String,
    pub redis_url: Option<String>,
    pub session_key_prefix: String,
    pub session_ttl: Duration,
    pub openai_api_key: String,
    pub openai_org_id: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub model_timeout: Duration,
    pub database_path: String,
    pub has_user_limitation: bool,
    pub moderation: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        let telegram_bot_token = env::var("TELEGRAM_BOT_TOKEN")
            .or_else(|_| env::var("BOT_TOKEN"))
            .map_err(|e| format!("TELEGRAM_BOT_TOKEN: {}", e))?;

        Ok(Self {
            telegram_bot_token,
            telegram_api_base: non_empty_var("TELEGRAM_API_BASE")
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE.to_string()),
            redis_url: non_empty_var("REDIS_URL"),
            session_key_prefix: non_empty_var("SESSION_KEY_PREFIX")
                .unwrap_or_else(|| DEFAULT_SESSION_KEY_PREFIX.to_string()),
            session_ttl: Duration::from_secs(positive_secs(
                "SESSION_TTL_SECS",
                DEFAULT_SESSION_TTL_SECS,
            )?),
            openai_api_key: env::var("OPENAI_API_KEY")
                .map_err(|e| format!("OPENAI_API_KEY: {}", e))?,
            openai_org_id: non_empty_var("OPENAI_ORG_ID"),
            openai_model: non_empty_var("OPENAI_MODEL")
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            openai_base_url: non_empty_var("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            model_timeout: Duration::from_secs(positive_secs(
                "MODEL_TIMEOUT_SECS",
                DEFAULT_MODEL_TIMEOUT_SECS,
            )?),
            database_path: non_empty_var("DATABASE_PATH")
                .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string()),
            has_user_limitation: env::var("HAS_USER_LIMITATION")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            moderation: env::var("MODERATION")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
        })
    }
}

/// Accepts the `True` spelling used by existing deployments as well as `true`/`1`/`yes`.
#[must_use]
pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn positive_secs(name: &str, default: u64) -> Result<u64, String> {
    match non_empty_var(name) {
        None => Ok(default),
        Some(raw) => match raw.parse::<u64>() {
            Ok(v) if v > 0 => Ok(v),
            _ => Err(format!("{}: expected a positive number of seconds, got {:?}", name, raw)),
        },
    }
}
