//! Retry for optimistic-concurrency conflicts.
//!
//! The API server rejects an update whose resourceVersion is stale with a
//! 409. The fix is always the same: re-read, re-apply the change, resubmit.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub steps: u32,
    pub initial_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            steps: 5,
            initial_delay: Duration::from_millis(10),
            factor: 2,
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = self.factor.max(1).saturating_pow(attempt);
        self.initial_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails with a non-conflict error, or
/// the policy runs out of attempts
///
/// `operation` must do the whole read-modify-write each time it is called.
/// The last error is returned once attempts are exhausted.
pub async fn retry_on_conflict<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    is_conflict: C,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if is_conflict(&e) && attempt + 1 < policy.steps => {
                let delay = policy.delay_for(attempt);
                attempt += 1;
                debug!(
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Update conflicted, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
