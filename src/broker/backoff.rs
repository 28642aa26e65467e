//! Exponential backoff around fallible async operations.
//!
//! Both the provider script bootstrap and challenge execution go through the
//! same runner so they share one retry policy.

use std::future::Future;
use std::time::Duration;

/// Retry policy with strictly geometric delay growth and no jitter.
///
/// An operation is attempted once, then retried up to `retries` more times.
/// Before each retry the observer is told how many retries remain, then the
/// runner sleeps; the delay doubles after every retry.
///
/// # Example
///
/// ```rust
/// use turnstile_broker::ExponentialBackoff;
/// use std::time::Duration;
///
/// # async fn example() {
/// let backoff = ExponentialBackoff::new(3, Duration::from_millis(10));
/// let mut calls = 0;
/// let result: Result<u32, &str> = backoff
///     .run(
///         || {
///             calls += 1;
///             let attempt = calls;
///             async move { if attempt < 3 { Err("flaky") } else { Ok(attempt) } }
///         },
///         |remaining, error| println!("retrying ({remaining} left): {error}"),
///     )
///     .await;
/// assert_eq!(result, Ok(3));
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    retries: u32,
    initial_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(retries: u32, initial_delay: Duration) -> Self {
        Self {
            retries,
            initial_delay,
        }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Upper bound on the time spent sleeping between attempts.
    pub fn total_delay(&self) -> Duration {
        (0..self.retries).fold(Duration::ZERO, |total, retry| {
            total.saturating_add(self.delay_for(retry))
        })
    }

    /// Delay slept before retry number `retry` (zero based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(retry.min(31)))
    }

    /// Runs `operation`, retrying every failure.
    pub async fn run<T, E, F, Fut, O>(&self, operation: F, on_retry: O) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        O: FnMut(u32, &E),
    {
        self.run_if(operation, |_| true, on_retry).await
    }

    /// Runs `operation`, retrying only failures accepted by `should_retry`.
    ///
    /// A rejected error, or any error once the budget is spent, is returned
    /// unchanged.
    pub async fn run_if<T, E, F, Fut, R, O>(
        &self,
        mut operation: F,
        mut should_retry: R,
        mut on_retry: O,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(&E) -> bool,
        O: FnMut(u32, &E),
    {
        let mut remaining = self.retries;
        let mut delay = self.initial_delay;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if remaining == 0 || !should_retry(&error) => return Err(error),
                Err(error) => {
                    on_retry(remaining, &error);
                    tokio::time::sleep(delay).await;
                    remaining -= 1;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }
}
