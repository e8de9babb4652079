// src/retry.rs
//! Bounded exponential backoff shared by the source and store clients.
//!
//! The delay starts at `initial_delay` and doubles after every failed attempt.
//! Retrying stops once `max_elapsed` has passed since the first attempt; the last
//! sleep is shortened so the budget is never overshot.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_elapsed: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(initial_delay: Duration, max_elapsed: Duration) -> Self {
        Self {
            initial_delay,
            max_elapsed,
        }
    }

    /// Delay before retry number `attempt` (1-based), before clamping to the budget.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        self.initial_delay.saturating_mul(1u32 << shift)
    }
}

/// How a single attempt failed.
#[derive(Debug)]
pub enum Attempt<E> {
    /// Connectivity problem; worth retrying.
    Transient(E),
    /// Retrying will not help.
    Fatal(E),
}

#[derive(Debug)]
pub enum RetryError<E> {
    Exhausted { attempts: u32, last: E },
    Fatal(E),
}

/// Run `op` until it succeeds, fails fatally, or the elapsed budget is spent.
pub async fn with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Attempt<E>>>,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => {
                if attempt > 1 {
                    tracing::debug!(what, attempt, "succeeded after retry");
                }
                return Ok(v);
            }
            Err(Attempt::Fatal(e)) => return Err(RetryError::Fatal(e)),
            Err(Attempt::Transient(e)) => {
                let elapsed = started.elapsed();
                if elapsed >= policy.max_elapsed {
                    tracing::warn!(
                        what,
                        attempts = attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        error = %e,
                        "giving up after retry budget"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    });
                }
                let delay = policy
                    .delay_for(attempt)
                    .min(policy.max_elapsed - elapsed);
                tracing::debug!(
                    what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(40))
    }

    #[test]
    fn delay_doubles_each_attempt() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(4), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let out: Result<u32, RetryError<String>> = with_backoff(&fast(), "test", || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(Attempt::Transient(format!("down {n}")))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(out.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let out: Result<(), RetryError<&str>> = with_backoff(&fast(), "test", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Attempt::Fatal("bad request"))
        })
        .await;
        assert!(matches!(out, Err(RetryError::Fatal("bad request"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_within_budget() {
        let policy = RetryPolicy::default();
        let started = tokio::time::Instant::now();
        let out: Result<(), RetryError<&str>> = with_backoff(&policy, "test", || async {
            Err(Attempt::Transient("refused"))
        })
        .await;
        match out {
            // 1 + 2 + 4 + 3 (clamped) = 10s, then a final attempt
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 5);
                assert_eq!(last, "refused");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(started.elapsed() <= Duration::from_secs(11));
    }
}
