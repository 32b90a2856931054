//! Telegram front-end: Bot API client, update types, replies and dispatch.

pub mod bot;
pub mod client;
pub mod listen;
pub mod parser;
pub mod response_builder;

pub use bot::DigestBot;
pub use client::{ChatTransport, OutgoingMessage, SentMessage, TelegramClient};
pub use listen::run_polling;
