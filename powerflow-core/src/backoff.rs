use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;

/// Statuses worth another attempt; everything else surfaces immediately.
pub const RETRIABLE_STATUSES: [StatusCode; 5] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Doubling delay between request attempts, capped at `cap`. With full
/// jitter the actual wait is drawn uniformly from zero up to that value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    first: Duration,
    cap: Duration,
    full_jitter: bool,
}

impl Backoff {
    pub fn exponential(first: Duration, cap: Duration) -> Self {
        Self {
            first,
            cap,
            full_jitter: false,
        }
    }

    pub fn with_full_jitter(mut self) -> Self {
        self.full_jitter = true;
        self
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Upper bound of the wait before retry number `retry` (0-based).
    pub fn ceiling(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.first
            .checked_mul(factor)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    pub fn delay(&self, retry: u32) -> Duration {
        self.delay_from(retry, &mut rand::thread_rng())
    }

    pub fn delay_from<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let ceiling = self.ceiling(retry);
        if !self.full_jitter || ceiling.is_zero() {
            return ceiling;
        }
        ceiling.mul_f64(rng.gen_range(0.0..=1.0))
    }
}

/// Bounded retry with exponential backoff, applied to every request a client
/// issues (pagination continuations included).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn pocket() -> Self {
        let backoff = Backoff::exponential(Duration::from_secs(1), Duration::from_secs(30));
        Self::new(3, backoff.with_full_jitter())
    }

    pub fn notion() -> Self {
        let backoff = Backoff::exponential(Duration::from_secs(1), Duration::from_secs(60));
        Self::new(3, backoff.with_full_jitter())
    }

    /// No waiting between attempts. Meant for tests against local mock servers.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Backoff::exponential(Duration::ZERO, Duration::ZERO))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt.saturating_sub(1))
    }

    pub fn is_retriable_status(status: StatusCode) -> bool {
        RETRIABLE_STATUSES.contains(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn ceiling_doubles_until_the_cap() {
        let backoff = Backoff::exponential(secs(1), secs(60));
        let ceilings: Vec<_> = (0..8).map(|retry| backoff.ceiling(retry)).collect();
        assert_eq!(
            ceilings,
            [secs(1), secs(2), secs(4), secs(8), secs(16), secs(32), secs(60), secs(60)]
        );
        assert_eq!(backoff.ceiling(40), secs(60));
        assert_eq!(backoff.cap(), secs(60));
    }

    #[test]
    fn jittered_delays_stay_under_the_ceiling() {
        let backoff = Backoff::exponential(Duration::from_millis(250), secs(5)).with_full_jitter();
        let mut rng = StdRng::seed_from_u64(7);
        for retry in 0..6 {
            assert!(backoff.delay_from(retry, &mut rng) <= backoff.ceiling(retry));
        }
        let plain = Backoff::exponential(Duration::from_millis(250), secs(5));
        assert_eq!(plain.delay_from(2, &mut rng), secs(1));
    }

    #[test]
    fn immediate_policy_never_waits() {
        let policy = RetryPolicy::immediate(4);
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.delay_after(3), Duration::ZERO);
        assert_eq!(RetryPolicy::immediate(0).max_attempts(), 1);
    }

    #[test]
    fn first_retry_waits_the_base_delay() {
        let policy = RetryPolicy::new(3, Backoff::exponential(secs(1), secs(30)));
        assert_eq!(policy.delay_after(1), secs(1));
        assert_eq!(policy.delay_after(2), secs(2));
    }

    #[test]
    fn only_allowlisted_statuses_retry() {
        for status in RETRIABLE_STATUSES {
            assert!(RetryPolicy::is_retriable_status(status));
        }
        assert!(!RetryPolicy::is_retriable_status(StatusCode::NOT_FOUND));
        assert!(!RetryPolicy::is_retriable_status(StatusCode::BAD_REQUEST));
        assert!(!RetryPolicy::is_retriable_status(StatusCode::NOT_IMPLEMENTED));
    }
}
