//! Monotonic time source.
//!
//! The scheduler core never reads a clock itself; it takes `now` in
//! milliseconds from its driver.  The driver reads it from a [`Clock`],
//! which on the host is backed by `std::time::Instant`.

use std::time::Instant;

/// Millisecond monotonic clock.
pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin (monotonic).
    fn now_ms(&self) -> u64;
}

/// Clock anchored at construction time.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
