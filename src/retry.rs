//! Bounded retry with exponential backoff for network fetches.

use crate::config::RetrySettings;
use rand::Rng;
use std::{future::Future, time::Duration};
use tokio::time::sleep;
use tracing::warn;

/// Errors that know whether another attempt could succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

pub async fn with_backoff<T, E, F, Fut>(
    policy: &RetrySettings,
    operation: &'static str,
    mut attempt_fn: F,
) -> Result<T, E>
where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts && err.is_transient() => {
                let delay = backoff_delay(policy, attempt);
                warn!(
                    target = "propfeed.retry",
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient_failure_retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// `base * 2^(attempt-1)` capped at `max_delay`, plus up to 25% jitter.
pub fn backoff_delay(policy: &RetrySettings, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let raw = policy.base_delay.saturating_mul(1u32 << exp);
    let capped = raw.min(policy.max_delay);
    let jitter_ceiling = (capped.as_millis() as u64) / 4;
    let jitter = if jitter_ceiling == 0 {
        0
    } else {
        rand::rng().random_range(0..=jitter_ceiling)
    };
    capped + Duration::from_millis(jitter)
}
