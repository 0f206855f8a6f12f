//! Reliability patterns for the completion path
//!
//! - [`RetryPolicy`] - exponential backoff with jitter for store writes

mod retry;

pub use retry::RetryPolicy;
