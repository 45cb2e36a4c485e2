// src/retry.rs
//
// Exponential-backoff retry over transient provider errors. Only the
// `Unavailable` class is retried; classified errors pass through unchanged so
// the client never double-retries.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;
use crate::types::RetryConfig;

/// Run `op` until it succeeds, fails with a non-transient error, or exhausts
/// the configured attempts. The delay doubles per attempt.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &'static str, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = config.delay;
    let mut last_err = None;

    for attempt in 1..=config.attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < config.attempts => {
                warn!(
                    operation,
                    attempt,
                    attempts = config.attempts,
                    error = %err,
                    "transient failure, retrying after {delay:.1}s"
                );
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                delay *= 2.0;
                last_err = Some(err);
            }
            Err(err) => return Err(err.with_operation(operation)),
        }
    }

    // Unreachable unless attempts == 0 was smuggled past RetryConfig::new.
    Err(last_err
        .unwrap_or_else(|| crate::error::MscError::unavailable("retry attempts exhausted"))
        .with_operation(operation))
}
