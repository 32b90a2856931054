//! `/finish` processing: the summarization pipeline and delivery of its result.

pub mod deliver;
pub mod summarize;

pub use summarize::{PreparedBatch, Summarizer};
