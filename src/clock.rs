// src/clock.rs

//! Time sources. Everything that reads "now" goes through a [`Clock`] so the
//! gateway can be driven by a [`VirtualClock`] in replay and tests.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

pub type SharedClock = Arc<dyn Clock>;

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock
#[derive(Debug)]
pub struct VirtualClock {
    now: RwLock<DateTime<Utc>>,
}

impl VirtualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Moves the clock forward by `delta`
    pub fn advance(&self, delta: Duration) {
        let delta = chrono::Duration::from_std(delta).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.write();
        *now = now.checked_add_signed(delta).unwrap_or(*now);
    }

    /// Moves the clock to `target` unless that would move it backwards.
    /// Returns the time after the call.
    pub fn advance_to(&self, target: DateTime<Utc>) -> DateTime<Utc> {
        let mut now = self.now.write();
        if target > *now {
            *now = target;
        }
        *now
    }

    /// Sets the clock unconditionally
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.write() = at;
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 8, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_virtual_clock_advances() {
        let clock = VirtualClock::new(start());
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), start() + chrono::Duration::seconds(90));
    }

    #[test]
    fn test_advance_to_never_moves_backwards() {
        let clock = VirtualClock::new(start());
        let later = start() + chrono::Duration::seconds(5);

        assert_eq!(clock.advance_to(later), later);
        assert_eq!(clock.advance_to(start()), later, "clock must stay monotonic");

        clock.set(start());
        assert_eq!(clock.now(), start(), "set is unconditional");
    }
}
