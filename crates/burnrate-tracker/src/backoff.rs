//! Exponential backoff with jitter for failed deliveries.

use rand::Rng;
use std::time::Duration;

/// Backoff schedule: `base * 2^(failures - 1)`, capped, with ±25% jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let exponent = (failures - 1).min(30) as i32;
        let max = self.max.as_secs_f64();
        let capped = (self.base.as_secs_f64() * 2f64.powi(exponent)).min(max);

        let jitter_range = capped * 0.25;
        let jitter = if jitter_range > 0.0 {
            rand::rng().random_range(-jitter_range..jitter_range)
        } else {
            0.0
        };

        Duration::from_secs_f64((capped + jitter).clamp(0.0, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_failures_no_delay() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(backoff.delay(0), Duration::ZERO);
    }

    #[test]
    fn test_delay_grows_within_jitter() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        for (failures, nominal) in [(1, 1.0), (2, 2.0), (3, 4.0), (4, 8.0)] {
            let d = backoff.delay(failures).as_secs_f64();
            assert!(d >= nominal * 0.75 && d <= nominal * 1.25, "{failures}: {d}");
        }
    }

    #[test]
    fn test_delay_is_capped() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        for failures in [7, 20, 1000] {
            assert!(backoff.delay(failures) <= Duration::from_secs(60));
            assert!(backoff.delay(failures) >= Duration::from_secs(45));
        }
    }
}
