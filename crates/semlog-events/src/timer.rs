//! One-shot deadline timer driven by simulation time.
//!
//! Detectors never poll on every frame. They arm a [`DelayTimer`] when they
//! have delayed work and the host fires it by calling the detector's
//! `fire_timers(now)` each tick; a timer without a deadline costs a single
//! branch.

/// A cooperative, single-threaded delay timer.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DelayTimer {
    deadline: Option<f64>,
}

impl DelayTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the timer to fire `delay` seconds after `now`.
    pub fn set(&mut self, now: f64, delay: f64) {
        self.deadline = Some(now + delay);
    }

    pub fn clear(&mut self) {
        self.deadline = None;
    }

    pub fn is_active(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<f64> {
        self.deadline
    }

    /// `true` if armed and `now` has reached the deadline.
    #[inline]
    pub fn is_due(&self, now: f64) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_timer_is_never_due() {
        let t = DelayTimer::new();
        assert!(!t.is_active());
        assert!(!t.is_due(1.0e9));
    }

    #[test]
    fn fires_at_deadline() {
        let mut t = DelayTimer::new();
        t.set(1.0, 0.5);
        assert!(!t.is_due(1.49));
        assert!(t.is_due(1.5));
        t.clear();
        assert!(!t.is_due(2.0));
    }
}
