// src/clock.rs
//! Injectable time source.
//!
//! The janitor's retention math and cadence alignment depend on wall-clock
//! time; the teacher repo reads system time directly in equivalent spots
//! (e.g. `PeerScore` timestamps), but this is the one place the spec calls
//! out the global time dependency as something that must be testable, so
//! it is injected rather than read from `Utc::now()` inline.

use chrono::{DateTime, Utc};

/// A source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A fixed, manually-advanced clock for deterministic tests.
#[derive(Debug)]
pub struct FakeClock(std::sync::Mutex<DateTime<Utc>>);

impl FakeClock {
    pub fn new(initial: DateTime<Utc>) -> Self {
        Self(std::sync::Mutex::new(initial))
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.0.lock().unwrap();
        *guard += delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.0.lock().unwrap() = at;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances() {
        let start = Utc::now();
        let clock = FakeClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(chrono::Duration::days(1));
        assert_eq!(clock.now(), start + chrono::Duration::days(1));
    }
}
