//! Capped exponential backoff for automatic reconnects.

use std::time::Duration;

use serde::Deserialize;

use crate::config::duration_ms;

/// Default delay before the first automatic reconnect.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default multiplier applied per failed attempt.
pub const DEFAULT_GROWTH: f64 = 2.0;

/// Default upper bound on any single reconnect delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default number of automatic reconnects before the manager gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Reconnect policy: `delay(n) = min(base * growth^n, cap)` for at most
/// `max_attempts` reconnects.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tiergate::backoff::BackoffPolicy;
///
/// let policy = BackoffPolicy::default();
/// assert_eq!(policy.delay_for(0), Duration::from_secs(1));
/// assert_eq!(policy.delay_for(1), Duration::from_secs(2));
/// assert_eq!(policy.delay_for(10), Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay before the first reconnect.
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    /// Growth factor per attempt. Values below 1.0 (or non-finite) are treated as 1.0.
    pub growth: f64,
    /// Upper bound on any delay.
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    /// Reconnects allowed before entering the terminal error state.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            growth: DEFAULT_GROWTH,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    /// Set the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the growth factor.
    #[must_use]
    pub fn with_growth(mut self, growth: f64) -> Self {
        self.growth = growth;
        self
    }

    /// Set the delay cap.
    #[must_use]
    pub fn with_max_delay(mut self, cap: Duration) -> Self {
        self.max_delay = cap;
        self
    }

    /// Set the number of automatic reconnects.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    fn effective_growth(&self) -> f64 {
        if self.growth.is_finite() && self.growth >= 1.0 {
            self.growth
        } else {
            1.0
        }
    }

    /// Delay before reconnect number `attempt + 1`, where `attempt` is the
    /// number of reconnects already made.
    ///
    /// Non-decreasing in `attempt` and never above `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.effective_growth().powi(exponent);
        match Duration::try_from_secs_f64(secs) {
            Ok(delay) => delay.min(self.max_delay),
            Err(_) => self.max_delay,
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn default_sequence_doubles_until_cap() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (0..7).map(|n| policy.delay_for(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[test]
    fn delays_are_monotonic_and_capped_for_many_policies() {
        let policies = [
            BackoffPolicy::default(),
            BackoffPolicy::default().with_growth(1.5),
            BackoffPolicy::default()
                .with_base_delay(Duration::from_millis(3000))
                .with_max_delay(Duration::from_millis(5000)),
            BackoffPolicy::default().with_growth(0.5),
            BackoffPolicy::default().with_growth(f64::NAN),
            BackoffPolicy::default().with_growth(f64::INFINITY),
        ];
        for policy in policies {
            let mut previous = Duration::ZERO;
            for attempt in 0..200 {
                let delay = policy.delay_for(attempt);
                assert!(delay >= previous, "{policy:?} decreased at attempt {attempt}");
                assert!(delay <= policy.max_delay, "{policy:?} exceeded cap");
                previous = delay;
            }
        }
    }

    #[test]
    fn growth_below_one_is_constant() {
        let policy = BackoffPolicy::default().with_growth(0.1);
        assert_eq!(policy.delay_for(0), policy.delay_for(5));
    }

    #[test]
    fn huge_attempt_counts_saturate_to_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(u32::MAX), DEFAULT_MAX_DELAY);
    }
}
