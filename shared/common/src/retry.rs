use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Linear-backoff retry for store mutations that the client must confirm itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    /// One attempt plus three retries, waiting 500 ms x attempt number in between.
    fn default() -> Self {
        Self::linear(4, 500)
    }
}

impl RetryPolicy {
    pub fn linear(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms: 5000,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt: `base_delay_ms * attempt`, capped.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let raw = self.base_delay_ms.saturating_mul(u64::from(attempt.max(1)));
        Duration::from_millis(raw.min(self.max_delay_ms))
    }
}

/// Runs `operation` until it succeeds or `policy.max_attempts` is reached.
/// The closure receives the 1-based attempt number. The last error is returned.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if attempt >= max_attempts {
                    tracing::warn!("{} failed after {} attempts: {}", label, attempt, error);
                    return Err(error);
                }

                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    "{} failed on attempt {}/{}: {}; retrying in {:?}",
                    label, attempt, max_attempts, error, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
