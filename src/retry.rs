use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{TrackerError, TrackerResult};

/// Shared retry policy for upstream calls: bounded attempts, exponential
/// backoff with jitter, and a typed exhaustion failure.
///
/// The delay after failed attempt `a` (counting from 0) is
/// `base * 2^a + jitter` with jitter drawn from `0..=base`, capped at
/// `max_delay` before jitter. A server `Retry-After` hint overrides the
/// computed delay when it is longer.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> TrackerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TrackerResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt + 1 >= self.max_attempts {
                        tracing::warn!(
                            target: "retry",
                            label,
                            attempts = self.max_attempts,
                            error = %err,
                            "retries exhausted"
                        );
                        return Err(TrackerError::Exhausted {
                            attempts: self.max_attempts,
                            last: Box::new(err),
                        });
                    }

                    let delay = self.delay_after(attempt, err.retry_after());
                    tracing::warn!(
                        target: "retry",
                        label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn delay_after(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let cap_ms = self.max_delay.as_millis() as u64;
        let shift = attempt.min(20);
        let exp_ms = base_ms
            .saturating_mul(1u64 << shift)
            .min(cap_ms.max(base_ms));
        // Jitter is bounded by the base delay so consecutive delays never
        // shrink while the exponential term is still growing.
        let jitter_ms = rand::thread_rng().gen_range(0..=base_ms);
        let delay = Duration::from_millis(exp_ms.saturating_add(jitter_ms));
        match hint {
            Some(hint) if hint > delay => hint,
            _ => delay,
        }
    }
}
