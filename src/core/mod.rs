//! Configuration and domain types shared by the collector, the pipeline and the bot.

pub mod config;
pub mod models;
