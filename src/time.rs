//! Monotonic time types used by the timer and the session state machine.
//!
//! `tapip-rs`'s `phy::sys` module expects a `crate::time::{Instant, Duration}`
//! pair (it calls `duration.secs()` / `duration.millis()`) but never ships
//! that module in this tree; this fills the gap with a thin wrapper over
//! `std::time::Instant` rather than reaching for an async runtime, since the
//! event loop this crate drives is synchronous.

use std::ops::{Add, Sub};
use std::time::{Duration as StdDuration, Instant as StdInstant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant(StdInstant);

impl Instant {
    pub fn now() -> Instant {
        Instant(StdInstant::now())
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant(self.0 + rhs.0)
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        Duration(self.0.saturating_duration_since(rhs.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Duration(StdDuration);

impl Duration {
    pub const fn from_secs(secs: u64) -> Duration {
        Duration(StdDuration::from_secs(secs))
    }

    pub fn secs(&self) -> u64 {
        self.0.as_secs()
    }

    pub fn millis(&self) -> u64 {
        self.0.subsec_millis() as u64
    }

    pub fn as_std(&self) -> StdDuration {
        self.0
    }
}

impl From<StdDuration> for Duration {
    fn from(d: StdDuration) -> Duration {
        Duration(d)
    }
}
