//! Retry logic for idempotent NATS operations.
//!
//! Only operations that can be repeated without changing the outcome (reads,
//! purges, key listings, stream lookups) go through a [`RetryConfig`]. Inserts
//! are never retried: a lost acknowledgement would turn into a spurious
//! duplicate-key failure on the second attempt.

use std::future::Future;
use std::time::Duration;

use crate::{Error, Result, TRACING_TARGET_CONNECTION};

/// Configuration for retry behavior on failed operations.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 means no retries)
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration.
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            ..Self::default()
        }
    }

    /// Create a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Set the maximum backoff duration.
    #[must_use]
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculate the backoff duration for a given attempt number.
    fn calculate_backoff(&self, attempt: u32) -> Duration {
        let backoff_millis = (self.initial_backoff.as_millis() as f64)
            * self.backoff_multiplier.powi(attempt as i32);
        let backoff = Duration::from_millis(backoff_millis as u64);
        backoff.min(self.max_backoff)
    }

    /// Retries an operation while it fails with a retryable error.
    ///
    /// See [`Error::is_retryable`].
    pub async fn retry<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.retry_if(operation, Error::is_retryable).await
    }

    /// Retries an operation while `should_retry` accepts its error.
    pub async fn retry_if<F, Fut, T, P>(&self, mut operation: F, mut should_retry: P) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: FnMut(&Error) -> bool,
    {
        let mut attempt = 0;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !should_retry(&err) {
                tracing::debug!(
                    target: TRACING_TARGET_CONNECTION,
                    error = %err,
                    "Non-retryable error, failing immediately"
                );
                return Err(err);
            }
            if attempt >= self.max_attempts {
                tracing::debug!(
                    target: TRACING_TARGET_CONNECTION,
                    error = %err,
                    attempts = attempt + 1,
                    "Retry attempts exhausted"
                );
                return Err(err);
            }

            let backoff = self.calculate_backoff(attempt);
            tracing::debug!(
                target: TRACING_TARGET_CONNECTION,
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                backoff_ms = backoff.as_millis(),
                error = %err,
                "Retrying operation after backoff"
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}
