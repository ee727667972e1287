use std::time::Duration;

use rand::Rng;

use crate::retry_topic::DEFAULT_MAX_ATTEMPTS;

pub trait BackOff: Send + Sync {
    /// Delay before redelivering a record that has failed `failures` times
    /// (1 after the first failure), or `None` once retries are exhausted.
    fn next_backoff(&self, failures: u32) -> Option<Duration>;
}

/// The same delay between a bounded number of retries. `max_retries` of 2
/// means three deliveries in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackOff {
    interval: Duration,
    max_retries: u32,
}

impl FixedBackOff {
    pub fn new(interval: Duration, max_retries: u32) -> Self {
        Self {
            interval,
            max_retries,
        }
    }
}

impl Default for FixedBackOff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), DEFAULT_MAX_ATTEMPTS - 1)
    }
}

impl BackOff for FixedBackOff {
    fn next_backoff(&self, failures: u32) -> Option<Duration> {
        (failures <= self.max_retries).then_some(self.interval)
    }
}

/// Delays growing by `multiplier` per failure, capped at `max_interval`, with
/// optional proportional jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackOff {
    initial_interval: Duration,
    multiplier: f64,
    max_interval: Duration,
    max_retries: u32,
    jitter: f64,
}

impl ExponentialBackOff {
    pub fn new(
        initial_interval: Duration,
        multiplier: f64,
        max_interval: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            initial_interval,
            multiplier: multiplier.max(1.0),
            max_interval,
            max_retries,
            jitter: 0.0,
        }
    }

    /// Spread each delay by up to `fraction` of itself in either direction.
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = fraction.clamp(0.0, 1.0);
        self
    }

    fn base_interval(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        if self.initial_interval.as_secs_f64() * factor >= self.max_interval.as_secs_f64() {
            return self.max_interval;
        }
        self.initial_interval.mul_f64(factor)
    }
}

impl BackOff for ExponentialBackOff {
    fn next_backoff(&self, failures: u32) -> Option<Duration> {
        if failures > self.max_retries {
            return None;
        }
        let base = self.base_interval(failures);
        if self.jitter == 0.0 {
            return Some(base);
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Some(base.mul_f64(factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_backoff_allows_max_retries() {
        let backoff = FixedBackOff::new(Duration::from_millis(100), 2);
        assert_eq!(backoff.next_backoff(1), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(2), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(3), None);
    }

    #[test]
    fn fixed_backoff_default_matches_default_attempts() {
        let backoff = FixedBackOff::default();
        assert!(backoff.next_backoff(DEFAULT_MAX_ATTEMPTS - 1).is_some());
        assert!(backoff.next_backoff(DEFAULT_MAX_ATTEMPTS).is_none());
    }

    #[test]
    fn exponential_backoff_grows_and_caps() {
        let backoff = ExponentialBackOff::new(
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(350),
            5,
        );
        assert_eq!(backoff.next_backoff(1), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(2), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_backoff(3), Some(Duration::from_millis(350)));
        assert_eq!(backoff.next_backoff(5), Some(Duration::from_millis(350)));
        assert_eq!(backoff.next_backoff(6), None);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let backoff =
            ExponentialBackOff::new(Duration::from_secs(1), 1.0, Duration::from_secs(1), 100)
                .with_jitter(0.25);
        for failures in 1..=100 {
            let delay = backoff.next_backoff(failures).unwrap();
            assert!(delay >= Duration::from_millis(750), "{delay:?}");
            assert!(delay <= Duration::from_millis(1250), "{delay:?}");
        }
    }
}
