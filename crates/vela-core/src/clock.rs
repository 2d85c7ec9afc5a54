//! Wall-clock abstraction.
//!
//! Everything that compares against cron boundaries reads time through a
//! [`Clock`] so tests can pin or step it.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Source of the current UTC time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually driven clock.
///
/// Every call to [`Clock::now`] returns the current reading and then moves
/// it forward by `step` (zero unless built with [`FakeClock::stepping`]).
#[derive(Debug)]
pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
    step: Duration,
}

impl FakeClock {
    /// A clock frozen at `at`.
    pub fn new(at: DateTime<Utc>) -> Self {
        Self::stepping(at, Duration::zero())
    }

    /// A clock that advances by `step` after every reading.
    pub fn stepping(at: DateTime<Utc>, step: Duration) -> Self {
        Self {
            now: Mutex::new(at),
            step,
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    /// Current reading without advancing.
    pub fn peek(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        let mut now = self.now.lock();
        let current = *now;
        *now += self.step;
        current
    }
}
