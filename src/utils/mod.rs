//! Utility modules shared across the pipeline
//!
//! Retry logic and number formatting helpers used by several stages.

pub mod format;
pub mod retry;

pub use format::{format_fdv, format_thousands};
pub use retry::{call_with_policy, call_with_retry, RetryPolicy};
