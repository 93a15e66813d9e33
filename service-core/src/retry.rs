//! Retry for operations that fail on contention.
//!
//! Built on `backoff`'s exponential policy. Only errors for which
//! [`AppError::is_retryable`] holds are treated as transient; every other
//! failure ends the loop on the attempt that produced it.

use crate::error::AppError;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Configuration for retry behavior.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Backoff policy for one call. The attempt budget bounds the loop, so
    /// there is no elapsed-time limit.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: self.multiplier,
            randomization_factor: 0.25,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Run `f` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent.
///
/// # Example
/// ```ignore
/// let item = retry_on_conflict(&RetryConfig::default(), "adjust_stock", || async {
///     service.try_adjust_stock(business_id, item_id, &request).await
/// })
/// .await?;
/// ```
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    f: F,
) -> Result<T, AppError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let max_retries = config.max_retries;
    let mut attempts = 0u32;

    let operation = || {
        attempts += 1;
        let attempt = attempts;
        let call = f();
        async move {
            call.await.map_err(|err| {
                if err.is_retryable() && attempt <= max_retries {
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })
        }
    };

    let notify = |err: AppError, wait: Duration| {
        warn!(
            operation = operation_name,
            error = %err,
            backoff_ms = wait.as_millis() as u64,
            "Operation conflicted, retrying after backoff"
        );
    };

    let result = backoff::future::retry_notify(config.backoff(), operation, notify).await;

    match &result {
        Ok(_) if attempts > 1 => {
            info!(operation = operation_name, attempt = attempts, "Operation succeeded after retry");
        }
        Err(err) if err.is_retryable() => {
            warn!(
                operation = operation_name,
                attempt = attempts,
                error = %err,
                "Operation failed after max retries"
            );
        }
        _ => {}
    }
    result
}
