//! Retry with constant or exponential backoff.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::FetchError;
use crate::types::RateLimits;

/// Upper bound on a single backoff sleep.
const MAX_DELAY: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub exponential: bool,
}

impl RetryPolicy {
    pub fn from_limits(limits: &RateLimits) -> Self {
        Self {
            max_retries: limits.max_retries,
            base_delay: limits.retry_delay(),
            exponential: limits.exponential_backoff,
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, or
    /// `base` when backoff is constant. Never more than five minutes.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if !self.exponential {
            return self.base_delay.min(MAX_DELAY);
        }
        let factor = 2u32.saturating_pow(retry.min(16));
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. `op` receives the 0-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        repository = e.repository(),
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after error: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::time::Instant;

    use super::*;

    fn status(code: u16) -> FetchError {
        FetchError::Status {
            repository: "pypi".to_string(),
            url: "https://pypi.org/pypi/x/json".to_string(),
            status: code,
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            exponential: true,
        }
    }

    #[test]
    fn test_delays() {
        let p = policy();
        assert_eq!(p.delay_for(0), Duration::from_secs(1));
        assert_eq!(p.delay_for(1), Duration::from_secs(2));
        assert_eq!(p.delay_for(2), Duration::from_secs(4));
        assert_eq!(p.delay_for(40), MAX_DELAY);

        let constant = RetryPolicy {
            exponential: false,
            ..p
        };
        assert_eq!(constant.delay_for(2), Duration::from_secs(1));

        let saturated = RetryPolicy {
            base_delay: Duration::MAX,
            ..constant
        };
        assert_eq!(saturated.delay_for(0), MAX_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_three_times_then_success() {
        let calls: Arc<Mutex<Vec<Instant>>> = Arc::default();

        let result = policy()
            .run(|attempt| {
                let calls = calls.clone();
                async move {
                    calls.lock().unwrap().push(Instant::now());
                    if attempt < 3 { Err(status(429)) } else { Ok("body") }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "body");

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.windows(2).all(|g| g[1] > g[0]), "{gaps:?}");
        assert!(gaps[0] >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausted() {
        let mut calls = 0;
        let result: Result<(), _> = policy()
            .run(|_| {
                calls += 1;
                async { Err(status(503)) }
            })
            .await;

        assert_eq!(result.unwrap_err().status(), Some(503));
        assert_eq!(calls, 4);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = policy()
            .run(|_| {
                calls += 1;
                async { Err(status(404)) }
            })
            .await;

        assert_eq!(result.unwrap_err().status(), Some(404));
        assert_eq!(calls, 1);
    }
}
