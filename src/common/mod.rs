//! Shared utilities for the session client.

pub mod retry;

pub use retry::{with_retry_if, RetryPolicy};
