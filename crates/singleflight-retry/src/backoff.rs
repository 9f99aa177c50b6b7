//! Backoff policies deciding how long to wait before the next attempt.

use std::time::Duration;

/// Computes the wait before the next attempt of a failing operation.
///
/// The controller calls this after a failed attempt, with the number of
/// failures recorded so far (always at least 1).
///
/// # Returns
/// - `Some(Duration)`: wait this long, then attempt again
/// - `None`: give up now; the cycle fails with
///   [`RetryError::Aborted`](crate::RetryError::Aborted)
///
/// Any `Fn(u32) -> Option<Duration>` closure is a policy:
///
/// ```rust
/// use singleflight_retry::backoff::RetryDelay;
/// use std::time::Duration;
///
/// let policy = |failures: u32| (failures < 5).then(|| Duration::from_millis(10));
/// assert_eq!(policy.next_delay(1), Some(Duration::from_millis(10)));
/// assert_eq!(policy.next_delay(5), None);
/// ```
pub trait RetryDelay: Send + Sync {
    /// Delay before the attempt following `failures` consecutive failures.
    fn next_delay(&self, failures: u32) -> Option<Duration>;
}

impl<F> RetryDelay for F
where
    F: Fn(u32) -> Option<Duration> + Send + Sync,
{
    fn next_delay(&self, failures: u32) -> Option<Duration> {
        self(failures)
    }
}

/// Randomized exponential backoff.
///
/// # Mathematical Formula
///
/// For `n` recorded failures:
/// ```text
/// ceiling = 1000ms * base ^ min(exponent, n)
/// delay   = min + floor(ceiling * random[0, 1))
/// ```
///
/// The whole range below the ceiling is randomized ("full jitter"), so
/// controllers restarted together spread their retries out. With the defaults
/// the ceiling grows from 1.2s to roughly 6.8 minutes after 33 failures and
/// stays there.
///
/// # Examples
///
/// ```rust
/// use singleflight_retry::backoff::{ExponentialBackoff, RetryDelay};
/// use std::time::Duration;
///
/// let backoff = ExponentialBackoff::builder()
///     .min(Duration::from_millis(50))
///     .base(2.0)
///     .exponent(6)
///     .build();
///
/// let delay = backoff.next_delay(1).unwrap();
/// assert!(delay >= Duration::from_millis(50));
/// assert!(delay < Duration::from_millis(2050));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    min: Duration,
    base: f64,
    exponent: u32,
}

impl ExponentialBackoff {
    /// Create a new builder for configuring exponential backoff.
    pub fn builder() -> ExponentialBackoffBuilder {
        ExponentialBackoffBuilder::default()
    }

    /// Upper bound (exclusive) of the randomized part for `failures` failures.
    pub fn ceiling(&self, failures: u32) -> Duration {
        let power = failures.min(self.exponent).min(i32::MAX as u32) as i32;
        Duration::try_from_secs_f64(self.base.powi(power).max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Minimum delay added to every wait.
    pub fn min(&self) -> Duration {
        self.min
    }

    /// Growth factor per failure.
    pub fn base(&self) -> f64 {
        self.base
    }

    /// Failure count after which the delay stops growing.
    pub fn exponent(&self) -> u32 {
        self.exponent
    }

    fn delay_with(&self, failures: u32, random: f64) -> Duration {
        let ceiling_ms = self.ceiling(failures).as_secs_f64() * 1000.0;
        let jittered_ms = (ceiling_ms * random).floor() as u64;
        self.min.saturating_add(Duration::from_millis(jittered_ms))
    }
}

impl Default for ExponentialBackoff {
    /// Defaults:
    /// - `min`: 0ms
    /// - `base`: 1.2
    /// - `exponent`: 33
    fn default() -> Self {
        Self {
            min: Duration::ZERO,
            base: 1.2,
            exponent: 33,
        }
    }
}

impl RetryDelay for ExponentialBackoff {
    fn next_delay(&self, failures: u32) -> Option<Duration> {
        Some(self.delay_with(failures, rand::random::<f64>()))
    }
}

/// Builder for configuring `ExponentialBackoff`.
#[derive(Debug, Default)]
pub struct ExponentialBackoffBuilder {
    min: Option<Duration>,
    base: Option<f64>,
    exponent: Option<u32>,
}

impl ExponentialBackoffBuilder {
    /// Set the minimum delay added to every wait.
    ///
    /// Default: 0ms
    pub fn min(mut self, min: Duration) -> Self {
        self.min = Some(min);
        self
    }

    /// Set the growth factor applied per failure.
    ///
    /// Default: 1.2
    pub fn base(mut self, base: f64) -> Self {
        self.base = Some(base);
        self
    }

    /// Set the failure count after which delays stop growing.
    ///
    /// Default: 33
    pub fn exponent(mut self, exponent: u32) -> Self {
        self.exponent = Some(exponent);
        self
    }

    /// Build the `ExponentialBackoff` instance.
    ///
    /// Uses default values for any unset parameters.
    pub fn build(self) -> ExponentialBackoff {
        let defaults = ExponentialBackoff::default();
        ExponentialBackoff {
            min: self.min.unwrap_or(defaults.min),
            base: self.base.unwrap_or(defaults.base),
            exponent: self.exponent.unwrap_or(defaults.exponent),
        }
    }
}

/// Constant delay, optionally giving up after a number of failures.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedDelay {
    delay: Duration,
    give_up_after: Option<u32>,
}

impl FixedDelay {
    /// Wait `delay` before every retry.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            give_up_after: None,
        }
    }

    /// Abort once `failures` failures have been recorded.
    pub fn give_up_after(mut self, failures: u32) -> Self {
        self.give_up_after = Some(failures);
        self
    }
}

impl RetryDelay for FixedDelay {
    fn next_delay(&self, failures: u32) -> Option<Duration> {
        match self.give_up_after {
            Some(limit) if failures >= limit => None,
            _ => Some(self.delay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ceiling_growth() {
        let backoff = ExponentialBackoff::builder()
            .base(2.0)
            .exponent(10)
            .build();

        assert_eq!(backoff.ceiling(0), Duration::from_secs(1));
        assert_eq!(backoff.ceiling(1), Duration::from_secs(2));
        assert_eq!(backoff.ceiling(3), Duration::from_secs(8));
    }

    #[test]
    fn test_ceiling_capped_by_exponent() {
        let backoff = ExponentialBackoff::builder()
            .base(2.0)
            .exponent(4)
            .build();

        for failures in 4..40 {
            assert_eq!(backoff.ceiling(failures), Duration::from_secs(16));
        }
    }

    #[test]
    fn test_delay_with_fixed_randomness() {
        let backoff = ExponentialBackoff::builder()
            .min(Duration::from_millis(100))
            .base(2.0)
            .exponent(10)
            .build();

        assert_eq!(backoff.delay_with(1, 0.0), Duration::from_millis(100));
        assert_eq!(backoff.delay_with(1, 0.5), Duration::from_millis(1100));
        // floor(2000 * 0.9999) = 1999
        assert_eq!(backoff.delay_with(1, 0.9999), Duration::from_millis(2099));
    }

    #[test]
    fn test_builder_defaults() {
        let backoff = ExponentialBackoff::builder().build();

        assert_eq!(backoff.min(), Duration::ZERO);
        assert_eq!(backoff.base(), 1.2);
        assert_eq!(backoff.exponent(), 33);
        assert_eq!(backoff, ExponentialBackoff::default());
    }

    #[test]
    fn test_default_backoff_never_aborts() {
        let backoff = ExponentialBackoff::default();
        for failures in [1, 10, 33, 100, u32::MAX] {
            assert!(backoff.next_delay(failures).is_some());
        }
    }

    #[test]
    fn test_fixed_delay() {
        let policy = FixedDelay::new(Duration::from_millis(5)).give_up_after(3);

        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(5)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(5)));
        assert_eq!(policy.next_delay(3), None);
    }

    #[test]
    fn test_closure_policy() {
        let policy = |failures: u32| {
            if failures == 1 {
                Some(Duration::from_millis(1))
            } else {
                None
            }
        };

        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(1)));
        assert_eq!(policy.next_delay(2), None);
    }

    proptest! {
        #[test]
        fn prop_delay_within_bounds(
            failures in 1u32..200,
            min_ms in 0u64..10_000,
            base in 1.0f64..3.0,
            exponent in 0u32..20,
        ) {
            let backoff = ExponentialBackoff::builder()
                .min(Duration::from_millis(min_ms))
                .base(base)
                .exponent(exponent)
                .build();

            let delay = backoff.next_delay(failures).unwrap();
            let ceiling = backoff.ceiling(failures);

            prop_assert!(delay >= Duration::from_millis(min_ms));
            prop_assert!(delay <= Duration::from_millis(min_ms) + ceiling);
        }
    }
}
