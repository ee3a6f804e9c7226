// Shared retry/backoff policy for external processor calls.
//
// Both the settlement executor and the repair workflow go through this
// instead of rolling their own loops. The caller supplies the classifier
// that decides which errors are worth retrying; the idempotency key of the
// underlying request must stay constant across retries.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff: base * 2^retries, capped.
    pub fn delay_for(&self, retries_so_far: u32) -> Duration {
        let factor = 2u32.saturating_pow(retries_so_far);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, the error is classified as non-retryable, or
/// the attempt budget is exhausted.
///
/// Returns the value or terminal error together with the number of retries
/// consumed (0 = first attempt resolved it).
pub async fn run_retrying<T, E, Op, Fut, Cls>(
    policy: &RetryPolicy,
    classify: Cls,
    mut op: Op,
) -> Result<(T, u32), (E, u32)>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    Cls: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut retries = 0u32;

    loop {
        match op(retries).await {
            Ok(value) => return Ok((value, retries)),
            Err(e) => {
                let attempt = retries + 1;
                if !classify(&e) {
                    return Err((e, retries));
                }
                if attempt >= max_attempts {
                    warn!(
                        "Giving up after {} attempts, last error: {}",
                        attempt, e
                    );
                    return Err((e, retries));
                }

                let delay = policy.delay_for(retries);
                warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}...",
                    attempt, max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                retries += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = run_retrying(&fast_policy(), |_: &&str| true, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("rate limited")
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        let (value, retries) = result.expect("should succeed on third attempt");
        assert_eq!(value, "done");
        assert_eq!(retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<((), u32), _> =
            run_retrying(&fast_policy(), |_: &&str| false, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("insufficient funds") }
            })
            .await;

        let (err, retries) = result.expect_err("should fail");
        assert_eq!(err, "insufficient funds");
        assert_eq!(retries, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempt_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<((), u32), _> =
            run_retrying(&fast_policy(), |_: &&str| true, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("still down") }
            })
            .await;

        let (_, retries) = result.expect_err("should exhaust retries");
        assert_eq!(retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
