//! Monotonic clock abstraction
//!
//! Author: arkSong <arksong2018@gmail.com>
//!
//! The bridge selection core leans on monotonic timestamps in three places:
//! the sticky `operational` flag (spec §4.2), the rampup bucket used for
//! corrected-stress correction (§4.2, §9), and the health-check scheduler's
//! timeout/retry bookkeeping (§4.5). All three need to be exercised in tests
//! without sleeping wall-clock time, so every timestamp in this crate flows
//! through a small `Clock` trait rather than calling `Instant::now()`
//! directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A source of monotonic time, in milliseconds since some unspecified epoch.
///
/// Implementors only need to guarantee monotonicity, not wall-clock
/// accuracy - the core never compares timestamps across process restarts.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time, in milliseconds since the clock's epoch.
    fn now_millis(&self) -> u64;
}

/// Production clock backed by `std::time::Instant`.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// A manually-advanced clock for deterministic tests.
///
/// Scenario 3 of spec §8 ("sticky operational") and the health-check retry
/// scenario both require advancing time by an exact amount and observing
/// that sticky state hasn't changed - a wall-clock `sleep` would make those
/// tests slow and flaky, so tests share a `ManualClock` with the component
/// under test instead.
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advance the clock by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.millis
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_millis(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_monotonically() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_millis(), 0);
        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now_millis(), 500);
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now_millis(), 1500);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_millis();
        std::thread::sleep(Duration::from_millis(5));
        let b = clock.now_millis();
        assert!(b >= a);
    }
}
