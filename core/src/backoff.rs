use crate::error::Error;
use backoff::backoff::Backoff;
use backoff::exponential::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64, multiplier: f64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            multiplier,
        }
    }
}

/// Deterministic schedule: the n-th retry waits `base * multiplier^n`.
pub fn create_backoff(policy: &RetryPolicy) -> ExponentialBackoff<backoff::SystemClock> {
    let base = Duration::from_millis(policy.base_delay_ms);
    ExponentialBackoff {
        current_interval: base,
        initial_interval: base,
        randomization_factor: 0.0,
        multiplier: policy.multiplier,
        max_interval: Duration::from_secs(3600),
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    }
}

/// Retries `operation` while `is_transient` accepts the error, up to
/// `policy.max_retries` extra attempts. The last error is returned as-is.
pub async fn retry_if<F, Fut, T, E, P>(
    operation: F,
    policy: &RetryPolicy,
    operation_name: &str,
    is_transient: P,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut backoff = create_backoff(policy);
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts,
                        "Operation succeeded after retries"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if !is_transient(&e) {
                    debug!(
                        operation = operation_name,
                        attempts,
                        error = %e,
                        "Non-transient error, not retrying"
                    );
                    return Err(e);
                }

                if attempts > policy.max_retries {
                    warn!(
                        operation = operation_name,
                        attempts,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                match backoff.next_backoff() {
                    Some(duration) => {
                        warn!(
                            operation = operation_name,
                            attempt = attempts,
                            retry_after_ms = duration.as_millis() as u64,
                            error = %e,
                            "Operation failed, retrying"
                        );
                        tokio::time::sleep(duration).await;
                    }
                    None => {
                        warn!(
                            operation = operation_name,
                            attempts,
                            error = %e,
                            "Backoff exhausted"
                        );
                        return Err(e);
                    }
                }
            }
        }
    }
}

pub async fn retry_with_backoff<F, Fut, T>(
    operation: F,
    policy: &RetryPolicy,
    operation_name: &str,
) -> Result<T, Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    retry_if(operation, policy, operation_name, Error::is_retryable).await
}
