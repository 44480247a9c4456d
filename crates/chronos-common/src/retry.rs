//! The single shared retry policy used by every component that talks to
//! the store, the cache, or the delayed-delivery queue. Validation and
//! `Notifier` calls deliberately do not go through this: the broker owns
//! redelivery for the latter, and retrying a validation failure makes no
//! sense.

use std::time::Duration;

/// `{attempts, baseDelay, backoffFactor}` as named in the design: a fixed
/// attempt budget with exponential backoff between tries.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
            backoff_factor,
        }
    }

    /// Delay before the given zero-indexed attempt (0 = no delay, the
    /// first try is never delayed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.backoff_factor.powi(attempt as i32 - 1);
        self.base_delay.mul_f64(factor)
    }

    /// Run `op` up to `self.attempts` times, sleeping between tries
    /// according to the backoff schedule. Returns the last error if every
    /// attempt fails.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                tokio::time::sleep(self.delay_for(attempt)).await;
            }
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.attempts {
                        return Err(e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_exponentially() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), 2.0);
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn run_retries_until_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), 1.0);
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient")
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_gives_up_after_attempts_exhausted() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), 1.0);
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err("always fails") }
            })
            .await;
        assert_eq!(result, Err("always fails"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
