//! Injectable time source for every wait in the system.
//!
//! The tick scheduler and the kit handshake never call
//! [`std::thread::sleep`] directly; they go through a [`Clock`].  Production
//! code uses [`SystemClock`].  Tests use [`SimClock`], whose `sleep` advances
//! virtual time instantly, so a stalled peer can be simulated for hours in
//! microseconds.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

pub trait Clock {
    fn now(&self) -> Instant;

    /// Cooperative yield.  Callers keep these short.
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time and real thread sleeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock. Clones share the same timeline.
#[derive(Debug, Clone)]
pub struct SimClock {
    origin: Instant,
    offset: Rc<Cell<Duration>>,
    sleeps: Rc<Cell<u64>>,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Rc::new(Cell::new(Duration::ZERO)),
            sleeps: Rc::new(Cell::new(0)),
        }
    }

    /// Virtual time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        self.offset.get()
    }

    /// Number of `sleep` calls made so far.
    pub fn sleep_count(&self) -> u64 {
        self.sleeps.get()
    }

    /// Move time forward without counting a sleep.
    pub fn advance(&self, duration: Duration) {
        self.offset.set(self.offset.get() + duration);
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    fn now(&self) -> Instant {
        self.origin + self.offset.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
        self.sleeps.set(self.sleeps.get() + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_clock_sleep_advances_shared_timeline() {
        let clock = SimClock::new();
        let view = clock.clone();
        let start = view.now();
        clock.sleep(Duration::from_millis(100));
        clock.sleep(Duration::from_millis(50));
        assert_eq!(view.now() - start, Duration::from_millis(150));
        assert_eq!(view.sleep_count(), 2);
    }

    #[test]
    fn advance_does_not_count_as_sleep() {
        let clock = SimClock::new();
        clock.advance(Duration::from_secs(3600));
        assert_eq!(clock.elapsed(), Duration::from_secs(3600));
        assert_eq!(clock.sleep_count(), 0);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock;
        let a = clock.now();
        clock.sleep(Duration::from_millis(1));
        assert!(clock.now() > a);
    }
}
