//! Small helpers shared across modules

pub mod escape;

pub use escape::{Dialect, escape_html};
