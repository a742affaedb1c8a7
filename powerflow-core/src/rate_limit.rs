use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Token bucket shared by every request of one API client.
///
/// Built once by the caller and handed to each client that talks to the same
/// service, so bursts (for example per-recording detail fetches) are
/// serialized against a single budget.
#[derive(Debug)]
pub struct RateLimiter {
    calls_per_second: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(calls_per_second: f64) -> Self {
        let burst = calls_per_second.floor().max(1.0) as u32;
        Self::with_burst(calls_per_second, burst)
    }

    pub fn with_burst(calls_per_second: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            calls_per_second: calls_per_second.max(0.01),
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Pocket tolerates more, five per second is conservative.
    pub fn pocket() -> Self {
        Self::new(5.0)
    }

    /// Notion documents an average of three requests per second.
    pub fn notion() -> Self {
        Self::new(3.0)
    }

    pub fn calls_per_second(&self) -> f64 {
        self.calls_per_second
    }

    /// Takes a token without waiting.
    pub fn try_acquire(&self) -> bool {
        self.take_or_wait_time().is_none()
    }

    /// Waits until a token is available and takes it.
    pub async fn acquire(&self) {
        while let Some(wait) = self.take_or_wait_time() {
            tokio::time::sleep(wait).await;
        }
    }

    fn take_or_wait_time(&self) -> Option<Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.calls_per_second).min(self.burst);
        bucket.last_refill = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            Some(Duration::from_secs_f64(
                (1.0 - bucket.tokens) / self.calls_per_second,
            ))
        }
    }
}
