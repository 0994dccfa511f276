//! Simulation Clock
//!
//! Monotonic simulated clock with one-minute resolution.
//! Single source of truth for the "current minute" - NEVER call system time.
//!
//! The clock holds an absolute minute offset: a global, strictly increasing
//! integer address of a trading minute across all sessions (session index
//! times minutes-per-session, plus the slot within the session). The calendar
//! maps offsets to wall-clock timestamps; the clock itself never does.

use std::fmt;

/// Absolute minute offset since the first session of the calendar.
pub type Minute = u64;

/// Monotonic simulation clock.
///
/// # Determinism Contract
/// - `now()` returns the current simulation minute, never system time
/// - `advance_to()` only moves forward, panics on backward movement
/// - All accessor queries take the current minute from this clock (or an
///   explicit minute parameter); components never consult wall time
#[derive(Debug, Clone)]
pub struct SimClock {
    current: Minute,
}

impl SimClock {
    /// Create a new clock starting at the given absolute minute.
    #[inline]
    pub fn new(start_minute: Minute) -> Self {
        Self {
            current: start_minute,
        }
    }

    /// Current simulation minute.
    #[inline]
    pub fn now(&self) -> Minute {
        self.current
    }

    /// Advance clock to a new minute. Panics if time would go backward.
    #[inline]
    pub fn advance_to(&mut self, new_minute: Minute) {
        debug_assert!(
            new_minute >= self.current,
            "SimClock: cannot go backward from {} to {}",
            self.current,
            new_minute
        );
        self.current = new_minute;
    }

    /// Advance clock by one minute.
    #[inline]
    pub fn tick(&mut self) {
        self.current += 1;
    }

    /// Advance clock by a number of minutes.
    #[inline]
    pub fn advance_by(&mut self, minutes: u64) {
        self.current += minutes;
    }

    /// Check if a minute is in the past relative to current clock.
    #[inline]
    pub fn is_past(&self, minute: Minute) -> bool {
        minute < self.current
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Display for SimClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "minute {}", self.current)
    }
}
