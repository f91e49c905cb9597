#[cfg(test)]
#[path = "throttle_test.rs"]
mod tests;

use std::time::{Duration, Instant};

/// Leading-edge rate limiter: the first call in a window passes, every
/// later call inside the window is suppressed.
///
/// Time is passed in by the caller so the limiter stays deterministic
/// under test.
#[derive(Clone, Debug)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// Whether an emission at `now` is allowed. Allowing one opens a
    /// new suppression window.
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Instant at which the current window closes, if one is open.
    #[must_use]
    pub fn window_reopens_at(&self) -> Option<Instant> {
        self.last.map(|last| last + self.interval)
    }

    /// Forget the current window; the next `allow` passes.
    pub fn reset(&mut self) {
        self.last = None;
    }
}
