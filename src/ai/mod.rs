//! All AI/LLM functionality

pub mod client;
pub mod moderation;
pub mod prompt_builder;

// Re-export main types for convenience
pub use client::{LlmClient, ModelClient, ModelError, ModelRequest, ModelResponse, estimate_tokens};
pub use moderation::Moderator;
