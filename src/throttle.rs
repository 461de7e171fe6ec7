//! Per-table throttle for cache invalidations.
//!
//! A burst of row changes on one table must not turn into a burst of refetches:
//! an invalidation fires at most once per `interval` for each table. The first
//! change always fires; changes inside the window are dropped, not deferred.
//!
//! Dropping has a cost: when a burst ends inside the window, the cache keeps
//! the state from the first change of the burst until another change on the
//! same table arrives after the window, or the channel resubscribes and
//! invalidates every table. Callers that cannot tolerate that should refetch
//! on their own schedule or set the interval to zero.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Tracks the last invalidation time of each table.
#[derive(Debug, Clone)]
pub struct InvalidationThrottle {
    interval: Duration,
    last_fired: HashMap<String, Instant>,
}

impl InvalidationThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fired: HashMap::new(),
        }
    }

    /// Returns `true` (and records `now`) if `table` may be invalidated.
    pub fn should_fire(&mut self, table: &str, now: Instant) -> bool {
        match self.last_fired.get_mut(table) {
            Some(last) if now.saturating_duration_since(*last) < self.interval => false,
            Some(last) => {
                *last = now;
                true
            }
            None => {
                self.last_fired.insert(table.to_string(), now);
                true
            }
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
    fn first_change_fires() {
        let mut throttle = InvalidationThrottle::new(Duration::from_secs(3));
        assert!(throttle.should_fire("newsletters", Instant::now()));
    }

    #[test]
    fn changes_inside_window_are_dropped() {
        let mut throttle = InvalidationThrottle::new(Duration::from_secs(3));
        let start = Instant::now();
        assert!(throttle.should_fire("newsletters", start));
        assert!(!throttle.should_fire("newsletters", start + Duration::from_millis(10)));
        assert!(!throttle.should_fire("newsletters", start + Duration::from_millis(2999)));
        assert!(throttle.should_fire("newsletters", start + Duration::from_secs(3)));
    }

    #[test]
    fn tables_are_throttled_independently() {
        let mut throttle = InvalidationThrottle::new(Duration::from_secs(3));
        let start = Instant::now();
        assert!(throttle.should_fire("newsletters", start));
        assert!(throttle.should_fire("telegram_messages", start));
        assert!(!throttle.should_fire("newsletters", start + Duration::from_secs(1)));
    }

    #[test]
    fn zero_interval_never_throttles() {
        let mut throttle = InvalidationThrottle::new(Duration::ZERO);
        let now = Instant::now();
        assert!(throttle.should_fire("newsletters", now));
        assert!(throttle.should_fire("newsletters", now));
    }

    #[test]
    fn trailing_change_of_a_burst_is_not_replayed() {
        let mut throttle = InvalidationThrottle::new(Duration::from_secs(3));
        let start = Instant::now();
        assert!(throttle.should_fire("newsletters", start));
        // Last change of the burst lands inside the window and is dropped.
        assert!(!throttle.should_fire("newsletters", start + Duration::from_secs(2)));
        // Nothing fires on its own; only the next change after the window does,
        // and the window restarts from that change.
        let later = start + Duration::from_secs(60);
        assert!(throttle.should_fire("newsletters", later));
        assert!(!throttle.should_fire("newsletters", later + Duration::from_secs(1)));
    }
}
