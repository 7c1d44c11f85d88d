//! Per-repository request admission: a sliding one-minute window of request
//! starts plus a cap on requests in flight.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use crate::types::RateLimits;

const WINDOW: Duration = Duration::from_secs(60);

/// The window is full; the oldest start leaves it after `retry_after`.
#[derive(Debug, Error)]
#[error("rate limit exceeded, retry after {retry_after:?}")]
pub(crate) struct RateLimitExceeded {
    pub retry_after: Duration,
}

#[derive(Debug)]
pub struct RateLimiter {
    /// 0 disables the window.
    requests_per_minute: usize,
    starts: Mutex<VecDeque<Instant>>,
    in_flight: Arc<Semaphore>,
}

/// Held for the duration of one request.
#[derive(Debug)]
pub struct RatePermit {
    _slot: Option<OwnedSemaphorePermit>,
}

impl RateLimiter {
    pub fn new(limits: &RateLimits) -> Self {
        Self {
            requests_per_minute: limits.requests_per_minute as usize,
            starts: Mutex::new(VecDeque::new()),
            in_flight: Arc::new(Semaphore::new(limits.concurrent_requests.max(1) as usize)),
        }
    }

    /// Wait until a request may start, then record its start.
    pub async fn acquire(&self) -> RatePermit {
        // The semaphore is never closed, so this only fails in theory.
        let slot = self.in_flight.clone().acquire_owned().await.ok();

        loop {
            let wait = {
                let mut starts = self.starts.lock().await;
                match self.try_admit(&mut starts, Instant::now()) {
                    Ok(()) => break,
                    Err(exceeded) => exceeded.retry_after,
                }
            };
            debug!(wait_ms = wait.as_millis() as u64, "rate limited, waiting");
            tokio::time::sleep(wait).await;
        }

        RatePermit { _slot: slot }
    }

    fn try_admit(&self, starts: &mut VecDeque<Instant>, now: Instant) -> Result<(), RateLimitExceeded> {
        if self.requests_per_minute == 0 {
            return Ok(());
        }

        while let Some(oldest) = starts.front() {
            if now.duration_since(*oldest) >= WINDOW {
                starts.pop_front();
            } else {
                break;
            }
        }

        if starts.len() < self.requests_per_minute {
            starts.push_back(now);
            return Ok(());
        }

        let oldest = starts.front().copied().unwrap_or(now);
        Err(RateLimitExceeded {
            retry_after: WINDOW.saturating_sub(now.duration_since(oldest)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(requests_per_minute: u32, concurrent_requests: u32) -> RateLimits {
        RateLimits {
            requests_per_minute,
            concurrent_requests,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_never_exceeded() {
        let limiter = Arc::new(RateLimiter::new(&limits(2, 1)));
        let starts = Arc::new(Mutex::new(Vec::new()));

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let limiter = limiter.clone();
                let starts = starts.clone();
                tokio::spawn(async move {
                    let _permit = limiter.acquire().await;
                    starts.lock().await.push(Instant::now());
                    tokio::time::sleep(Duration::from_millis(100)).await;
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let mut starts = starts.lock().await.clone();
        starts.sort();
        assert_eq!(starts.len(), 5);
        for i in 0..starts.len() - 2 {
            assert!(
                starts[i + 2].duration_since(starts[i]) >= WINDOW,
                "three starts within one window: {:?}",
                &starts[i..=i + 2]
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap() {
        let limiter = Arc::new(RateLimiter::new(&limits(0, 2)));
        let active = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let peak = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let (limiter, active, peak) = (limiter.clone(), active.clone(), peak.clone());
                tokio::spawn(async move {
                    use std::sync::atomic::Ordering;
                    let _permit = limiter.acquire().await;
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_admits_immediately() {
        let limiter = RateLimiter::new(&limits(0, 5));
        let begin = Instant::now();
        for _ in 0..100 {
            drop(limiter.acquire().await);
        }
        assert_eq!(Instant::now(), begin);
    }

    #[test]
    fn test_retry_after() {
        let limiter = RateLimiter::new(&limits(1, 1));
        let mut starts = VecDeque::new();
        let t0 = Instant::now();
        limiter.try_admit(&mut starts, t0).unwrap();

        let err = limiter.try_admit(&mut starts, t0 + Duration::from_secs(20)).unwrap_err();
        assert_eq!(err.retry_after, Duration::from_secs(40));

        limiter.try_admit(&mut starts, t0 + WINDOW).unwrap();
    }
}
