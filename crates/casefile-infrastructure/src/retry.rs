//! Bounded retry with exponential backoff for transient store failures.

use casefile_core::config::RetryConfig;
use casefile_core::error::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Runs `f`, retrying transient errors up to the configured attempt count.
///
/// Backoff doubles per attempt from `base_delay_ms`, capped at
/// `max_delay_ms`, with up to 50% random jitter added. Terminal errors
/// (anything that is not `TransientStore`) propagate immediately; exhausting
/// the attempts escalates the last transient error.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryConfig, op_name: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let backoff = backoff_delay(policy, attempt);
                tracing::warn!(
                    target: "session_store",
                    operation = op_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "transient store failure, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => {
                if err.is_transient() {
                    tracing::error!(
                        target: "session_store",
                        operation = op_name,
                        attempts = attempt,
                        error = %err,
                        "transient store failure, retries exhausted"
                    );
                }
                return Err(err);
            }
        }
    }
}

fn backoff_delay(policy: &RetryConfig, attempt: u32) -> Duration {
    let exp = policy
        .base_delay_ms
        .saturating_mul(1u64 << (attempt - 1).min(16));
    let capped = exp.min(policy.max_delay_ms);
    let jitter = rand::thread_rng().gen_range(0..=capped / 2);
    Duration::from_millis(capped + jitter)
}
