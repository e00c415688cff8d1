use crate::error::{Error, Result};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Single-token interval gate shared by every request an adapter makes.
///
/// Burst is fixed at one, so `acquire` waits until `1 / requests_per_second`
/// has passed since the previous grant. Clones share the same state.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64) -> Result<Self> {
        if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
            return Err(Error::Validation(format!(
                "requests_per_second must be positive, got {requests_per_second}"
            )));
        }

        let min_interval = Duration::from_secs_f64(1.0 / requests_per_second);
        let quota = Quota::with_period(min_interval)
            .ok_or_else(|| Error::Validation("rate limiter interval must be non-zero".into()))?
            .allow_burst(NonZeroU32::MIN);

        Ok(Self {
            inner: Arc::new(GovernorLimiter::direct(quota)),
            min_interval,
        })
    }

    pub async fn acquire(&self) {
        self.inner.until_ready().await;
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_interval", &self.min_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn consecutive_acquires_are_paced() {
        let limiter = RateLimiter::new(10.0).unwrap();
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire().await;
        }

        // (5 - 1) / 10 seconds
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test]
    async fn clones_share_pacing() {
        let limiter = RateLimiter::new(20.0).unwrap();
        let start = Instant::now();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn rejects_non_positive_rates() {
        assert!(RateLimiter::new(0.0).is_err());
        assert!(RateLimiter::new(-1.0).is_err());
        assert!(RateLimiter::new(f64::NAN).is_err());
    }
}
