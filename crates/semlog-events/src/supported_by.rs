//! Supported-by detection: which contact partners carry an object's weight.
//!
//! "Supporting" is a physical judgment that needs sustained observation, so
//! the detector polls instead of reacting to every contact signal. Contact
//! partners start as candidates; on each poll a candidate that has been in
//! contact for a full poll interval, is vertically still relative to the
//! owner, and lies below the owner, is promoted to a support and a
//! begin-supported-by event is queued. A support whose contact ends, whose
//! partner disappears, or whose relative vertical speed exceeds the limit is
//! ended.

use semlog_core::handle::ObjectHandle;
use semlog_core::identity::{PairId, SemanticEntity};
use semlog_core::math::Vec3;

use crate::event::SemanticEvent;
use crate::timer::DelayTimer;

/// Tolerance for the contact-duration check against the poll interval.
const DURATION_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// BodyMotion
// ---------------------------------------------------------------------------

/// Kinematic queries the detector needs from the host.
///
/// `None` means the object no longer exists.
pub trait BodyMotion {
    fn location(&self, handle: ObjectHandle) -> Option<Vec3>;
    fn linear_velocity(&self, handle: ObjectHandle) -> Option<Vec3>;
}

// ---------------------------------------------------------------------------
// Config / candidate
// ---------------------------------------------------------------------------

/// Polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SupportedByConfig {
    /// Seconds between polls.
    pub poll_interval: f64,
    /// Maximum relative vertical speed of a support.
    pub max_vertical_speed: f64,
}

impl Default for SupportedByConfig {
    fn default() -> Self {
        Self {
            poll_interval: 0.11,
            max_vertical_speed: 0.5,
        }
    }
}

/// A contact partner being observed, or already confirmed as a support.
#[derive(Debug, Clone, PartialEq)]
pub struct SupportCandidate {
    pub pair_id: PairId,
    pub entity: SemanticEntity,
    pub first_contact_time: f64,
}

// ---------------------------------------------------------------------------
// SupportedByDetector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SupportedByDetector {
    owner: SemanticEntity,
    config: SupportedByConfig,
    candidates: Vec<SupportCandidate>,
    supports: Vec<SupportCandidate>,
    timer: DelayTimer,
    last_end_time: Option<f64>,
    outbox: Vec<SemanticEvent>,
}

impl SupportedByDetector {
    pub fn new(owner: SemanticEntity, config: SupportedByConfig) -> Self {
        Self {
            owner,
            config,
            candidates: Vec::new(),
            supports: Vec::new(),
            timer: DelayTimer::new(),
            last_end_time: None,
            outbox: Vec::new(),
        }
    }

    /// `other` came into contact with the owner.
    pub fn on_contact_begin(&mut self, other: SemanticEntity, now: f64) {
        if other == self.owner || self.is_tracked(&other) {
            return;
        }
        self.candidates.push(SupportCandidate {
            pair_id: PairId::of(&self.owner, &other),
            entity: other,
            first_contact_time: now,
        });
        if !self.timer.is_active() {
            self.timer.set(now, self.config.poll_interval);
        }
    }

    /// `other` left contact (or was destroyed).
    pub fn on_contact_end(&mut self, other: &SemanticEntity, now: f64) {
        if let Some(pos) = self.candidates.iter().position(|c| c.entity == *other) {
            self.candidates.remove(pos);
        } else if let Some(pos) = self.supports.iter().position(|c| c.entity == *other) {
            let support = self.supports.remove(pos);
            self.end_support(support.pair_id, now);
        }
        if !self.is_tracking() {
            self.timer.clear();
        }
    }

    /// Run one poll if the poll timer is due.
    pub fn poll(&mut self, now: f64, motion: &dyn BodyMotion) {
        if !self.timer.is_due(now) {
            return;
        }
        let owner_state = motion
            .location(self.owner.handle)
            .zip(motion.linear_velocity(self.owner.handle));
        let Some((owner_loc, owner_vel)) = owner_state else {
            // Owner destroyed: everything it was resting on ends now.
            self.finish(now);
            return;
        };

        let max_speed = self.config.max_vertical_speed;

        let mut kept = Vec::with_capacity(self.supports.len());
        let mut demoted = Vec::new();
        for support in std::mem::take(&mut self.supports) {
            match motion.linear_velocity(support.entity.handle) {
                None => self.end_support(support.pair_id, now),
                Some(v) if (owner_vel.z - v.z).abs() > max_speed => {
                    self.end_support(support.pair_id, now);
                    demoted.push(SupportCandidate {
                        first_contact_time: now,
                        ..support
                    });
                }
                Some(_) => kept.push(support),
            }
        }
        self.supports = kept;

        let mut remaining = Vec::with_capacity(self.candidates.len());
        for candidate in std::mem::take(&mut self.candidates) {
            let partner = motion
                .location(candidate.entity.handle)
                .zip(motion.linear_velocity(candidate.entity.handle));
            let Some((loc, vel)) = partner else {
                continue;
            };
            let persisted =
                now - candidate.first_contact_time + DURATION_EPSILON >= self.config.poll_interval;
            let still = (owner_vel.z - vel.z).abs() < max_speed;
            if !persisted || !still {
                remaining.push(candidate);
            } else if owner_loc.z > loc.z {
                self.outbox.push(SemanticEvent::BeginSupportedBy {
                    supported: self.owner.clone(),
                    supporting: candidate.entity.clone(),
                    time: now,
                    pair_id: candidate.pair_id,
                });
                self.supports.push(candidate);
            }
            // Still but not below the owner: side contact, dropped.
        }
        remaining.extend(demoted);
        self.candidates = remaining;

        if self.is_tracking() {
            self.timer.set(now, self.config.poll_interval);
        } else {
            self.timer.clear();
        }
    }

    /// End every active support at `now` and forget all candidates.
    pub fn finish(&mut self, now: f64) {
        for support in std::mem::take(&mut self.supports) {
            self.end_support(support.pair_id, now);
        }
        self.candidates.clear();
        self.timer.clear();
    }

    fn end_support(&mut self, pair_id: PairId, now: f64) {
        self.last_end_time = Some(now);
        self.outbox.push(SemanticEvent::EndSupportedBy {
            pair_id1: pair_id,
            pair_id2: pair_id,
            time: now,
        });
    }

    fn is_tracked(&self, other: &SemanticEntity) -> bool {
        self.candidates.iter().any(|c| c.entity == *other)
            || self.supports.iter().any(|c| c.entity == *other)
    }

    fn is_tracking(&self) -> bool {
        !self.candidates.is_empty() || !self.supports.is_empty()
    }

    /// `true` while at least one partner is a confirmed support.
    pub fn is_supported(&self) -> bool {
        !self.supports.is_empty()
    }

    pub fn supports(&self) -> &[SupportCandidate] {
        &self.supports
    }

    pub fn candidates(&self) -> &[SupportCandidate] {
        &self.candidates
    }

    /// Time the most recent support ended, if any has.
    pub fn last_supported_by_end_time(&self) -> Option<f64> {
        self.last_end_time
    }

    pub fn next_poll(&self) -> Option<f64> {
        self.timer.deadline()
    }

    pub fn take_events(&mut self) -> Vec<SemanticEvent> {
        std::mem::take(&mut self.outbox)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeMotion {
        bodies: HashMap<ObjectHandle, (Vec3, Vec3)>,
    }

    impl FakeMotion {
        fn set(&mut self, e: &SemanticEntity, z: f64, vz: f64) {
            self.bodies
                .insert(e.handle, (Vec3::new(0.0, 0.0, z), Vec3::new(0.0, 0.0, vz)));
        }
    }

    impl BodyMotion for FakeMotion {
        fn location(&self, handle: ObjectHandle) -> Option<Vec3> {
            self.bodies.get(&handle).map(|b| b.0)
        }
        fn linear_velocity(&self, handle: ObjectHandle) -> Option<Vec3> {
            self.bodies.get(&handle).map(|b| b.1)
        }
    }

    fn entity(index: u32, id: &str) -> SemanticEntity {
        SemanticEntity::new(ObjectHandle::new(index, 0), id, "Thing")
    }

    fn setup() -> (SupportedByDetector, FakeMotion, SemanticEntity, SemanticEntity) {
        let cup = entity(1, "cup");
        let table = entity(2, "table");
        let mut motion = FakeMotion::default();
        motion.set(&cup, 80.0, 0.0);
        motion.set(&table, 40.0, 0.0);
        let det = SupportedByDetector::new(cup.clone(), SupportedByConfig::default());
        (det, motion, cup, table)
    }

    #[test]
    fn resting_contact_is_promoted_after_one_poll() {
        let (mut det, motion, cup, table) = setup();
        det.on_contact_begin(table.clone(), 1.0);
        det.poll(1.05, &motion);
        assert!(det.take_events().is_empty());

        let due = det.next_poll().unwrap();
        det.poll(due, &motion);
        let events = det.take_events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            SemanticEvent::BeginSupportedBy {
                supported,
                supporting,
                pair_id,
                ..
            } => {
                assert_eq!(supported, &cup);
                assert_eq!(supporting, &table);
                assert_eq!(*pair_id, PairId::new("cup", "table"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(det.is_supported());
    }

    #[test]
    fn candidate_losing_contact_is_dropped_silently() {
        let (mut det, _motion, _cup, table) = setup();
        det.on_contact_begin(table.clone(), 1.0);
        det.on_contact_end(&table, 1.05);
        assert!(det.take_events().is_empty());
        assert!(det.candidates().is_empty());
        assert!(det.next_poll().is_none());
    }

    #[test]
    fn support_contact_end_emits_end_with_pair_id() {
        let (mut det, motion, _cup, table) = setup();
        det.on_contact_begin(table.clone(), 0.0);
        det.poll(0.2, &motion);
        det.take_events();

        det.on_contact_end(&table, 3.0);
        let pid = PairId::new("cup", "table");
        assert_eq!(
            det.take_events(),
            vec![SemanticEvent::EndSupportedBy {
                pair_id1: pid,
                pair_id2: pid,
                time: 3.0
            }]
        );
        assert_eq!(det.last_supported_by_end_time(), Some(3.0));
        assert!(!det.is_supported());
    }

    #[test]
    fn lifting_ends_support_and_demotes() {
        let (mut det, mut motion, cup, table) = setup();
        det.on_contact_begin(table.clone(), 0.0);
        det.poll(0.2, &motion);
        det.take_events();

        motion.set(&cup, 81.0, 5.0);
        let due = det.next_poll().unwrap();
        det.poll(due, &motion);
        assert!(matches!(
            det.take_events().as_slice(),
            [SemanticEvent::EndSupportedBy { .. }]
        ));
        assert_eq!(det.candidates().len(), 1);

        // Put down again: re-promoted one interval after the demotion.
        motion.set(&cup, 80.0, 0.0);
        let due = det.next_poll().unwrap();
        det.poll(due, &motion);
        assert!(matches!(
            det.take_events().as_slice(),
            [SemanticEvent::BeginSupportedBy { .. }]
        ));
    }

    #[test]
    fn side_contact_is_not_a_support() {
        let (mut det, mut motion, _cup, _table) = setup();
        let wall = entity(3, "wall");
        motion.set(&wall, 120.0, 0.0);
        det.on_contact_begin(wall, 0.0);
        det.poll(0.2, &motion);
        assert!(det.take_events().is_empty());
        assert!(det.candidates().is_empty());
        assert!(det.next_poll().is_none());
    }

    #[test]
    fn destroyed_support_ends_relation() {
        let (mut det, mut motion, _cup, table) = setup();
        det.on_contact_begin(table.clone(), 0.0);
        det.poll(0.2, &motion);
        det.take_events();

        motion.bodies.remove(&table.handle);
        let due = det.next_poll().unwrap();
        det.poll(due, &motion);
        assert!(matches!(
            det.take_events().as_slice(),
            [SemanticEvent::EndSupportedBy { .. }]
        ));
        assert!(det.candidates().is_empty());
    }

    #[test]
    fn finish_ends_active_supports() {
        let (mut det, motion, _cup, table) = setup();
        det.on_contact_begin(table, 0.0);
        det.poll(0.2, &motion);
        det.take_events();
        det.finish(9.0);
        assert!(matches!(
            det.take_events().as_slice(),
            [SemanticEvent::EndSupportedBy { time, .. }] if *time == 9.0
        ));
        assert!(det.next_poll().is_none());
    }
}
