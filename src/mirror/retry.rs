//! Retry policy for failed fetches.
//!
//! Fixed (non-exponential) backoff between attempts, bounded by
//! `max_retries`. The wait is cancellation-aware so a shutdown signal can
//! interrupt the loop between attempts.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::mirror::models::FetchError;

/// Retry policy with a fixed backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Fixed pause between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Whether a failed attempt should be retried. `attempt` is zero-based,
    /// so attempts run `0..=max_retries` (max_retries + 1 in total).
    pub fn should_retry(&self, error: &FetchError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_retries
    }

    /// Sleep the fixed backoff, returning false if cancelled mid-wait.
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.backoff) => true,
            _ = cancel.cancelled() => false,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(2),
        }
    }
}
