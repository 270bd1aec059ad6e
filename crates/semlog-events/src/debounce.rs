//! Event debouncer: raw begin/end signals in, discrete events out.
//!
//! Physics overlap signals jitter: a body resting against a sensor may leave
//! and re-enter it several times a second. The [`Debouncer`] turns such a
//! stream into clean begin/end pairs:
//!
//! - A raw end is not emitted right away. It is parked in a pending queue and
//!   a flush timer is armed for `gap * 1.2`.
//! - A raw begin for the same key arriving less than `gap` after the end
//!   cancels the pending end; neither the end nor the new begin is emitted.
//! - When the flush timer fires, every pending end older than `gap` is
//!   emitted carrying the time of the *raw* end, not the flush time.
//!
//! Emitted events are queued in an outbox and drained by the owning detector
//! with [`take_events`](Debouncer::take_events), so no consumer code runs
//! while the debouncer's sets are being mutated.
//!
//! # Example
//!
//! ```
//! use semlog_events::debounce::{BeginOutcome, Debounced, Debouncer};
//!
//! let mut d = Debouncer::new(0.12);
//! assert_eq!(d.raw_begin("cup", 0.0), BeginOutcome::Started);
//! d.raw_end(&"cup", 1.0);
//! assert_eq!(d.raw_begin("cup", 1.05), BeginOutcome::Resumed);
//! d.raw_end(&"cup", 3.0);
//! d.flush_due(3.2);
//!
//! let events = d.take_events();
//! assert_eq!(events, vec![
//!     Debounced::Begin { key: "cup", time: 0.0 },
//!     Debounced::End { key: "cup", time: 3.0 },
//! ]);
//! ```

use crate::timer::DelayTimer;

/// Flush delay as a multiple of the debounce gap.
pub const FLUSH_DELAY_FACTOR: f64 = 1.2;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A raw end waiting for its debounce window to elapse.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEnd<K> {
    pub key: K,
    /// Time of the raw end signal.
    pub time: f64,
}

/// A debounced event ready for broadcast.
#[derive(Debug, Clone, PartialEq)]
pub enum Debounced<K> {
    Begin { key: K, time: f64 },
    End { key: K, time: f64 },
}

impl<K> Debounced<K> {
    pub fn key(&self) -> &K {
        match self {
            Debounced::Begin { key, .. } | Debounced::End { key, .. } => key,
        }
    }

    pub fn time(&self) -> f64 {
        match self {
            Debounced::Begin { time, .. } | Debounced::End { time, .. } => *time,
        }
    }

    pub fn is_begin(&self) -> bool {
        matches!(self, Debounced::Begin { .. })
    }
}

/// Result of a raw begin signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    /// New relation; a begin event was queued.
    Started,
    /// A recent pending end was cancelled; the relation continues silently.
    Resumed,
    /// The key was already active; nothing happened.
    AlreadyActive,
}

// ---------------------------------------------------------------------------
// Debouncer
// ---------------------------------------------------------------------------

/// Keyed begin/end debouncer.
///
/// Active keys and pending ends are kept in insertion order so that event
/// order is deterministic for a given signal sequence. The sets are tiny in
/// practice (a handful of objects per sensor), so linear scans beat hashing.
#[derive(Debug, Clone)]
pub struct Debouncer<K> {
    gap: f64,
    active: Vec<K>,
    pending: Vec<PendingEnd<K>>,
    timer: DelayTimer,
    outbox: Vec<Debounced<K>>,
}

impl<K: Clone + PartialEq + std::fmt::Debug> Debouncer<K> {
    /// Create a debouncer with window `gap` seconds.
    ///
    /// # Panics
    ///
    /// Panics if `gap` is not a positive finite number.
    pub fn new(gap: f64) -> Self {
        assert!(
            gap.is_finite() && gap > 0.0,
            "debounce gap must be positive and finite, got {gap}"
        );
        Self {
            gap,
            active: Vec::new(),
            pending: Vec::new(),
            timer: DelayTimer::new(),
            outbox: Vec::new(),
        }
    }

    pub fn gap(&self) -> f64 {
        self.gap
    }

    /// Raw begin signal for `key` at time `now`. Idempotent.
    ///
    /// A pending end for `key` younger than the gap is cancelled first, which
    /// suppresses the begin event. A pending end for `key` that is already
    /// older than the gap but not yet flushed is emitted before the new begin
    /// so the per-key stream stays ordered.
    pub fn raw_begin(&mut self, key: K, now: f64) -> BeginOutcome {
        if self.is_active(&key) {
            return BeginOutcome::AlreadyActive;
        }
        if self.cancel_if_recent(&key, now) {
            self.active.push(key);
            return BeginOutcome::Resumed;
        }
        if let Some(pos) = self.pending.iter().position(|p| p.key == key) {
            let stale = self.pending.remove(pos);
            self.outbox.push(Debounced::End {
                key: stale.key,
                time: stale.time,
            });
            if self.pending.is_empty() {
                self.timer.clear();
            }
        }
        self.active.push(key.clone());
        self.outbox.push(Debounced::Begin { key, time: now });
        BeginOutcome::Started
    }

    /// Raw end signal for `key` at time `now`.
    ///
    /// Returns `false` (and logs) if `key` was not active; physics backends
    /// occasionally report an end without a begin and that is not fatal.
    pub fn raw_end(&mut self, key: &K, now: f64) -> bool {
        let Some(pos) = self.active.iter().position(|k| k == key) else {
            tracing::error!(key = ?key, time = now, "end signal without a matching begin");
            return false;
        };
        let key = self.active.remove(pos);
        self.pending.push(PendingEnd { key, time: now });
        if !self.timer.is_active() {
            self.timer.set(now, self.gap * FLUSH_DELAY_FACTOR);
        }
        true
    }

    /// Remove a pending end for `key` younger than the gap.
    ///
    /// Returns `true` if one was cancelled. Stops the flush timer when the
    /// queue drains.
    pub fn cancel_if_recent(&mut self, key: &K, now: f64) -> bool {
        let Some(pos) = self
            .pending
            .iter()
            .position(|p| p.key == *key && now - p.time < self.gap)
        else {
            return false;
        };
        self.pending.remove(pos);
        if self.pending.is_empty() {
            self.timer.clear();
        }
        true
    }

    /// Fire the flush timer if due. Returns the number of end events queued.
    ///
    /// Entries older than the gap are emitted; the timer re-arms while the
    /// queue is non-empty and stops otherwise.
    pub fn flush_due(&mut self, now: f64) -> usize {
        if !self.timer.is_due(now) {
            return 0;
        }
        let gap = self.gap;
        let mut emitted = 0;
        let mut kept = Vec::with_capacity(self.pending.len());
        for p in self.pending.drain(..) {
            if now - p.time > gap {
                self.outbox.push(Debounced::End {
                    key: p.key,
                    time: p.time,
                });
                emitted += 1;
            } else {
                kept.push(p);
            }
        }
        self.pending = kept;
        if self.pending.is_empty() {
            self.timer.clear();
        } else {
            self.timer.set(now, gap * FLUSH_DELAY_FACTOR);
        }
        emitted
    }

    /// Emit every pending end immediately, oldest first, bypassing the
    /// window. Returns the number of end events queued.
    pub fn flush_all(&mut self) -> usize {
        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_by(|a, b| a.time.total_cmp(&b.time));
        let n = pending.len();
        self.outbox.extend(pending.into_iter().map(|p| Debounced::End {
            key: p.key,
            time: p.time,
        }));
        self.timer.clear();
        n
    }

    /// End every active relation at `now` without debouncing.
    pub fn drain_active(&mut self, now: f64) -> usize {
        let n = self.active.len();
        for key in self.active.drain(..) {
            self.outbox.push(Debounced::End { key, time: now });
        }
        n
    }

    pub fn is_active(&self, key: &K) -> bool {
        self.active.iter().any(|k| k == key)
    }

    pub fn active(&self) -> &[K] {
        &self.active
    }

    pub fn pending(&self) -> &[PendingEnd<K>] {
        &self.pending
    }

    pub fn has_pending(&self, key: &K) -> bool {
        self.pending.iter().any(|p| p.key == *key)
    }

    /// Deadline of the flush timer, `None` when idle.
    pub fn next_deadline(&self) -> Option<f64> {
        self.timer.deadline()
    }

    /// Drain queued events in emission order.
    pub fn take_events(&mut self) -> Vec<Debounced<K>> {
        std::mem::take(&mut self.outbox)
    }

    /// Forget all state, including queued events.
    pub fn clear(&mut self) {
        self.active.clear();
        self.pending.clear();
        self.outbox.clear();
        self.timer.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn begin(key: &'static str, time: f64) -> Debounced<&'static str> {
        Debounced::Begin { key, time }
    }

    fn end(key: &'static str, time: f64) -> Debounced<&'static str> {
        Debounced::End { key, time }
    }

    #[test]
    fn jitter_between_begin_and_end_is_swallowed() {
        let mut d = Debouncer::new(0.12);
        d.raw_begin("a", 0.0);
        d.raw_end(&"a", 1.0);
        assert_eq!(d.raw_begin("a", 1.05), BeginOutcome::Resumed);
        // Nothing pending, so the timer stopped.
        assert!(d.next_deadline().is_none());
        d.raw_end(&"a", 3.0);

        d.flush_due(3.1);
        assert_eq!(d.take_events(), vec![begin("a", 0.0)]);

        d.flush_due(3.2);
        assert_eq!(d.take_events(), vec![end("a", 3.0)]);
        assert!(d.pending().is_empty());
        assert!(d.next_deadline().is_none());
    }

    #[test]
    fn end_carries_raw_time_not_flush_time() {
        let mut d = Debouncer::new(0.5);
        d.raw_begin("a", 0.0);
        d.raw_end(&"a", 2.0);
        d.take_events();
        assert_eq!(d.next_deadline(), Some(2.0 + 0.5 * FLUSH_DELAY_FACTOR));
        d.flush_due(10.0);
        assert_eq!(d.take_events(), vec![end("a", 2.0)]);
    }

    #[test]
    fn begin_is_idempotent() {
        let mut d = Debouncer::new(0.12);
        assert_eq!(d.raw_begin("a", 0.0), BeginOutcome::Started);
        assert_eq!(d.raw_begin("a", 0.01), BeginOutcome::AlreadyActive);
        assert_eq!(d.take_events(), vec![begin("a", 0.0)]);
    }

    #[test]
    fn end_without_begin_is_a_noop() {
        let mut d: Debouncer<&str> = Debouncer::new(0.12);
        assert!(!d.raw_end(&"ghost", 1.0));
        assert!(d.pending().is_empty());
        assert!(d.next_deadline().is_none());
    }

    #[test]
    fn late_begin_emits_stale_end_first() {
        let mut d = Debouncer::new(0.12);
        d.raw_begin("a", 0.0);
        d.raw_end(&"a", 1.0);
        // Past the window but before the flush timer fired.
        assert_eq!(d.raw_begin("a", 1.13), BeginOutcome::Started);
        assert_eq!(
            d.take_events(),
            vec![begin("a", 0.0), end("a", 1.0), begin("a", 1.13)]
        );
        assert!(d.next_deadline().is_none());
    }

    #[test]
    fn young_entries_survive_a_flush_and_rearm() {
        let mut d = Debouncer::new(0.1);
        d.raw_begin("a", 0.0);
        d.raw_begin("b", 0.0);
        d.raw_end(&"a", 1.0);
        d.raw_end(&"b", 1.1);
        d.take_events();

        assert_eq!(d.flush_due(1.125), 1);
        assert_eq!(d.take_events(), vec![end("a", 1.0)]);
        assert_eq!(d.pending().len(), 1);
        let rearmed = d.next_deadline().unwrap();
        assert!((rearmed - (1.125 + 0.12)).abs() < 1e-9);

        assert_eq!(d.flush_due(rearmed), 1);
        assert_eq!(d.take_events(), vec![end("b", 1.1)]);
        assert!(d.next_deadline().is_none());
    }

    #[test]
    fn flush_all_orders_by_original_time() {
        let mut d = Debouncer::new(10.0);
        for k in ["x", "y", "z"] {
            d.raw_begin(k, 0.0);
        }
        d.raw_end(&"y", 3.0);
        d.raw_end(&"z", 1.0);
        d.raw_end(&"x", 2.0);
        d.take_events();

        assert_eq!(d.flush_all(), 3);
        assert_eq!(
            d.take_events(),
            vec![end("z", 1.0), end("x", 2.0), end("y", 3.0)]
        );
        assert!(d.pending().is_empty());
        assert!(d.next_deadline().is_none());
    }

    #[test]
    fn drain_active_ends_everything_now() {
        let mut d = Debouncer::new(0.12);
        d.raw_begin("a", 0.0);
        d.raw_begin("b", 0.5);
        d.take_events();
        assert_eq!(d.drain_active(2.0), 2);
        assert_eq!(d.take_events(), vec![end("a", 2.0), end("b", 2.0)]);
        assert!(d.active().is_empty());
    }

    #[test]
    #[should_panic(expected = "debounce gap")]
    fn zero_gap_is_rejected() {
        let _ = Debouncer::<u32>::new(0.0);
    }
}
