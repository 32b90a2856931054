use thiserror::Error;

/// Infrastructure failures raised by the collaborators (Telegram, Redis, SQLite, `OpenAI`).
#[derive(Debug, Error)]
pub enum BotError {
    #[error("Failed to parse Telegram update: {0}")]
    ParseError(String),

    #[error("Failed to access Telegram API: {0}")]
    ApiError(String),

    #[error("Telegram rejected the message markup: {0}")]
    MarkupRejected(String),

    #[error("Failed to access OpenAI API: {0}")]
    OpenAIError(String),

    #[error("Failed to send HTTP request: {0}")]
    HttpError(String),

    #[error("Failed to access session store: {0}")]
    StoreError(String),

    #[error("Failed to access database: {0}")]
    DatabaseError(String),

    #[error("{0}")]
    GeneralError(String),
}

impl From<reqwest::Error> for BotError {
    fn from(error: reqwest::Error) -> Self {
        BotError::HttpError(error.to_string())
    }
}

impl From<anyhow::Error> for BotError {
    fn from(error: anyhow::Error) -> Self {
        BotError::GeneralError(error.to_string())
    }
}

impl From<redis::RedisError> for BotError {
    fn from(error: redis::RedisError) -> Self {
        BotError::StoreError(error.to_string())
    }
}

impl From<rusqlite::Error> for BotError {
    fn from(error: rusqlite::Error) -> Self {
        BotError::DatabaseError(error.to_string())
    }
}

impl From<serde_json::Error> for BotError {
    fn from(error: serde_json::Error) -> Self {
        BotError::ParseError(error.to_string())
    }
}

/// Outcome of a collection or summarization command that did not succeed.
///
/// Every variant is recovered at the command boundary and turned into exactly one reply
/// through [`DigestError::user_message`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DigestError {
    #[error("user is not on the whitelist")]
    Unauthorized,

    #[error("no active collection session")]
    NoActiveSession,

    #[error("a summary of this batch is already being produced")]
    SummaryInProgress,

    #[error("message has no text or caption")]
    UnsupportedContent,

    #[error("message was not forwarded from a channel")]
    InvalidOrigin,

    #[error("message was forwarded from a different channel")]
    ChannelMismatch,

    #[error("no messages collected")]
    EmptyBatch,

    #[error("collected messages exceed the model context window")]
    BatchTooLarge,

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("model response is malformed: {0}")]
    MalformedResponse(String),

    #[error("model produced no summary groups")]
    EmptySummary,

    #[error("unexpected failure: {0}")]
    UnexpectedFailure(String),
}

impl DigestError {
    /// Text shown to the user for this failure.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            DigestError::Unauthorized => "Sorry, you are not allowed to use this bot.",
            DigestError::NoActiveSession => "Please send me /start to start sending messages.",
            DigestError::SummaryInProgress => {
                "I'm still summarizing your messages. Please wait for the summary before sending more."
            }
            DigestError::UnsupportedContent => {
                "Currently only text messages or messages with captions are supported."
            }
            DigestError::InvalidOrigin => "The message should be from a channel.",
            DigestError::ChannelMismatch => "The message should be from the same channel.",
            DigestError::EmptyBatch => {
                "No messages received. Please forward messages from the channel you want to summarize."
            }
            DigestError::BatchTooLarge => {
                "Error: The messages are too long. Please remove some messages and try again."
            }
            DigestError::ModelUnavailable(_) => {
                "Sorry, I couldn't generate a summary at this time. Your messages are kept, please try /finish again later."
            }
            DigestError::MalformedResponse(_) => "Error: Response format is incorrect.",
            DigestError::EmptySummary => "AI have not generate any summary.",
            DigestError::UnexpectedFailure(_) => "Unexpected error. Please try again later.",
        }
    }

    /// Whether the session must be cleared after a `/finish` attempt ending in this error.
    ///
    /// Failures after the model answered end the attempt; everything earlier keeps the
    /// batch so nothing the user forwarded is lost.
    #[must_use]
    pub fn clears_session(&self) -> bool {
        matches!(
            self,
            DigestError::BatchTooLarge | DigestError::MalformedResponse(_) | DigestError::EmptySummary
        )
    }
}

impl From<BotError> for DigestError {
    fn from(error: BotError) -> Self {
        DigestError::UnexpectedFailure(error.to_string())
    }
}
