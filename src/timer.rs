//! A single outstanding interval timer, as used by the session state
//! machine to drive retransmission.
//!
//! Grounded on `tapip-rs::time`'s `Instant`/`Duration` pair (see
//! [`crate::time`]) plus the `TimerSlot` shape from `spec.md` §3:
//! `start` always implies a prior `stop`, and completion is observed by
//! polling rather than by a callback, matching how the rest of the event
//! loop (`Pool::poll`) is driven.

use crate::time::{Duration, Instant};

/// One second: the timer's granularity never needs to be finer than this.
const GRANULARITY: Duration = Duration::from_secs(1);

/// A single outstanding timeout.
#[derive(Debug, Default)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub fn new() -> Timer {
        Timer { deadline: None }
    }

    /// Arm the timer to fire `seconds` after `now`, cancelling whatever
    /// request was previously outstanding. `now` is supplied by the caller
    /// (as `tapip_rs::iface::Interface::poll` takes an explicit `Instant`)
    /// rather than read internally, so the session's retransmission logic
    /// can be driven by synthetic clocks in tests.
    pub fn start(&mut self, now: Instant, seconds: u64) {
        self.deadline = Some(now + Duration::from_secs(seconds));
    }

    /// Disarm the timer. Idempotent.
    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    /// Whether the timer has reached its deadline. Does not by itself
    /// clear the outstanding request — callers must `stop` (or `start`
    /// again) once they have consumed the expiry, matching the spec's
    /// "clear the wakeup bit before consuming a completion" rule.
    pub fn has_expired(&self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    /// How long until the deadline, rounded up to the timer's granularity,
    /// for use as a blocking-wait timeout. `None` if the timer isn't armed.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let deadline = self.deadline?;
        if now >= deadline {
            return Some(Duration::from_secs(0));
        }
        let remaining = deadline - now;
        Some(if remaining < GRANULARITY {
            GRANULARITY
        } else {
            remaining
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_timer_never_expires() {
        let timer = Timer::new();
        assert!(!timer.has_expired(Instant::now()));
        assert_eq!(timer.remaining(Instant::now()), None);
    }

    #[test]
    fn stop_disarms() {
        let mut timer = Timer::new();
        timer.start(Instant::now(), 1);
        assert!(timer.is_running());
        timer.stop();
        assert!(!timer.is_running());
    }

    #[test]
    fn restart_replaces_deadline() {
        let mut timer = Timer::new();
        let now = Instant::now();
        timer.start(now, 5);
        let first = timer.deadline;
        timer.start(now, 1);
        assert_ne!(timer.deadline, first);
    }
}
