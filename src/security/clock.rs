//! Wall-clock time source for shared rate-limit records.
//!
//! Records in the shared store are compared across instances, so they carry
//! unix timestamps rather than monotonic instants.

use parking_lot::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Seconds since the unix epoch, fractional.
    fn now(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by.as_secs_f64();
    }

    pub fn set(&self, now: f64) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000.0);
        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now(), 1_001.5);
        clock.set(5.0);
        assert_eq!(clock.now(), 5.0);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01
        assert!(SystemClock.now() > 1_577_836_800.0);
    }
}
