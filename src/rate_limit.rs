//! Minimum-interval rate limiter shared by every call to one external service.

use crate::error::{HarvestError, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// NCBI asks for at most three requests per second without an API key.
pub const NCBI_MIN_INTERVAL: Duration = Duration::from_millis(340);

/// Clock gate that spaces out grants by at least `min_interval`.
///
/// Clones share the same gate, so one instance handed to several workers
/// serializes all of their outbound calls. Waiters hold the lock while they
/// sleep, which gives roughly FIFO ordering.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<RateLimiterInner>>,
}

#[derive(Debug)]
struct RateLimiterInner {
    min_interval: Duration,
    /// Time of the last grant.
    last_grant: Option<Instant>,
    /// Number of grants handed out so far.
    granted: u64,
}

impl RateLimiter {
    /// Create a limiter that allows one grant per `min_interval`.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RateLimiterInner {
                min_interval,
                last_grant: None,
                granted: 0,
            })),
        }
    }

    /// Create a limiter from a maximum request rate.
    ///
    /// The rate must be a finite number above zero.
    pub fn per_second(max_per_second: f64) -> Result<Self> {
        let invalid = || HarvestError::Config(format!("Invalid request rate: {}", max_per_second));
        if !(max_per_second.is_finite() && max_per_second > 0.0) {
            return Err(invalid());
        }
        // Subnormal rates overflow the interval.
        let interval = Duration::try_from_secs_f64(1.0 / max_per_second).map_err(|_| invalid())?;
        Ok(Self::new(interval))
    }

    /// Wait until a request is allowed, then mark it as sent.
    pub async fn acquire(&self) {
        let mut inner = self.inner.lock().await;

        if let Some(last) = inner.last_grant {
            let elapsed = last.elapsed();
            if elapsed < inner.min_interval {
                tokio::time::sleep(inner.min_interval - elapsed).await;
            }
        }

        inner.last_grant = Some(Instant::now());
        inner.granted += 1;
    }

    /// Total number of grants issued by this gate (shared across clones).
    pub async fn granted(&self) -> u64 {
        self.inner.lock().await.granted
    }

    /// The configured spacing between grants.
    pub async fn min_interval(&self) -> Duration {
        self.inner.lock().await.min_interval
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(NCBI_MIN_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_basic() {
        let limiter = RateLimiter::new(Duration::from_millis(10));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        // 3 grants at 10ms spacing take at least 20ms
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(limiter.granted().await, 3);
    }

    #[tokio::test]
    async fn test_rate_limiter_first_request_immediate() {
        let limiter = RateLimiter::per_second(1.0).unwrap();
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_rate_limiter_serializes_concurrent_callers() {
        let limiter = RateLimiter::new(Duration::from_millis(25));
        let start = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(start.elapsed() >= Duration::from_millis(75));
        assert_eq!(limiter.granted().await, 4);
    }

    #[test]
    fn test_per_second_rejects_unusable_rates() {
        for rate in [0.0, -3.0, f64::NAN, f64::INFINITY, f64::MIN_POSITIVE / 4.0] {
            assert!(matches!(
                RateLimiter::per_second(rate),
                Err(HarvestError::Config(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_per_second_spacing() {
        let limiter = RateLimiter::per_second(4.0).unwrap();
        assert_eq!(limiter.min_interval().await, Duration::from_millis(250));
    }
}
