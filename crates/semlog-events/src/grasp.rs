//! Grasp detection from two opposing finger groups.
//!
//! A manipulator carries two sensor groups (e.g. thumb and the other
//! fingers). An object counts as grasped while it overlaps both groups at
//! once. Grasp begin/end go through a [`Debouncer`] with the grasp gap, so a
//! finger briefly slipping off does not split one grasp into two.
//!
//! Each group counts overlaps per object: a group with several sensors keeps
//! an object while any of its sensors still touches it.

use semlog_core::identity::SemanticEntity;

use crate::debounce::{Debounced, Debouncer};
use crate::event::SemanticEvent;

/// Default grasp debounce gap in seconds.
pub const DEFAULT_GRASP_GAP: f64 = 0.55;

/// Default input value at or above which detection resumes.
pub const DEFAULT_UNPAUSE_TRIGGER: f64 = 0.5;

/// Grasp type reported when none was set.
pub const DEFAULT_GRASP_TYPE: &str = "Default";

// ---------------------------------------------------------------------------
// OverlapGroup / GroupSet
// ---------------------------------------------------------------------------

/// Which finger group a sensor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum OverlapGroup {
    A,
    B,
}

impl OverlapGroup {
    pub fn other(self) -> Self {
        match self {
            OverlapGroup::A => OverlapGroup::B,
            OverlapGroup::B => OverlapGroup::A,
        }
    }
}

/// Objects overlapping one group, with per-object sensor counts.
#[derive(Debug, Clone, Default)]
pub struct GroupSet {
    members: Vec<(SemanticEntity, u32)>,
}

impl GroupSet {
    /// Count one more overlap; `true` if `entity` just entered the set.
    fn enter(&mut self, entity: &SemanticEntity) -> bool {
        if let Some((_, n)) = self.members.iter_mut().find(|(e, _)| e == entity) {
            *n += 1;
            return false;
        }
        self.members.push((entity.clone(), 1));
        true
    }

    /// Count one less overlap; `Some(true)` if `entity` just left the set,
    /// `None` if it was not a member.
    fn leave(&mut self, entity: &SemanticEntity) -> Option<bool> {
        let pos = self.members.iter().position(|(e, _)| e == entity)?;
        let n = &mut self.members[pos].1;
        *n -= 1;
        if *n == 0 {
            self.members.remove(pos);
            Some(true)
        } else {
            Some(false)
        }
    }

    /// Drop `entity` regardless of its count; `true` if it was a member.
    fn remove(&mut self, entity: &SemanticEntity) -> bool {
        let before = self.members.len();
        self.members.retain(|(e, _)| e != entity);
        self.members.len() != before
    }

    pub fn contains(&self, entity: &SemanticEntity) -> bool {
        self.members.iter().any(|(e, _)| e == entity)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SemanticEntity> {
        self.members.iter().map(|(e, _)| e)
    }

    fn clear(&mut self) {
        self.members.clear();
    }
}

// ---------------------------------------------------------------------------
// GraspDetector
// ---------------------------------------------------------------------------

/// Set-intersection grasp detector for one manipulator.
#[derive(Debug, Clone)]
pub struct GraspDetector {
    owner: SemanticEntity,
    set_a: GroupSet,
    set_b: GroupSet,
    grasps: Debouncer<SemanticEntity>,
    grasp_type: String,
    paused: bool,
    unpause_trigger: f64,
    outbox: Vec<SemanticEvent>,
}

impl GraspDetector {
    pub fn new(owner: SemanticEntity, gap: f64) -> Self {
        Self {
            owner,
            set_a: GroupSet::default(),
            set_b: GroupSet::default(),
            grasps: Debouncer::new(gap),
            grasp_type: DEFAULT_GRASP_TYPE.to_owned(),
            paused: false,
            unpause_trigger: DEFAULT_UNPAUSE_TRIGGER,
            outbox: Vec::new(),
        }
    }

    pub fn with_unpause_trigger(mut self, trigger: f64) -> Self {
        self.unpause_trigger = trigger;
        self
    }

    pub fn owner(&self) -> &SemanticEntity {
        &self.owner
    }

    /// A sensor of `group` started overlapping `other`.
    pub fn on_group_begin(&mut self, group: OverlapGroup, other: SemanticEntity, now: f64) {
        if self.paused || other == self.owner {
            return;
        }
        let newly_entered = self.set_mut(group).enter(&other);
        if !newly_entered
            || self.set(group.other()).is_empty()
            || self.grasps.is_active(&other)
        {
            return;
        }
        let candidates: Vec<SemanticEntity> = self
            .set(group)
            .iter()
            .filter(|e| self.set(group.other()).contains(e) && !self.grasps.is_active(e))
            .cloned()
            .collect();
        for object in candidates {
            self.begin_grasp(object, now);
        }
    }

    /// A sensor of `group` stopped overlapping `other`.
    pub fn on_group_end(&mut self, group: OverlapGroup, other: &SemanticEntity, now: f64) {
        if self.paused || *other == self.owner {
            return;
        }
        match self.set_mut(group).leave(other) {
            None => {
                tracing::error!(
                    owner = %self.owner,
                    other = %other,
                    ?group,
                    "group overlap ended for an object that never entered it"
                );
            }
            Some(true) if self.grasps.is_active(other) => self.end_grasp(other, now),
            Some(_) => {}
        }
    }

    /// `other` was destroyed: drop it from both groups and end its grasp.
    pub fn forget(&mut self, other: &SemanticEntity, now: f64) {
        let in_a = self.set_a.remove(other);
        let in_b = self.set_b.remove(other);
        if (in_a || in_b) && self.grasps.is_active(other) {
            self.end_grasp(other, now);
        }
    }

    fn begin_grasp(&mut self, object: SemanticEntity, now: f64) {
        // A recent pending end for the object is cancelled and the begin is
        // swallowed; otherwise a begin event is queued.
        self.grasps.raw_begin(object, now);
        self.pump();
    }

    fn end_grasp(&mut self, object: &SemanticEntity, now: f64) {
        self.grasps.raw_end(object, now);
        self.pump();
    }

    /// Fire the delayed grasp-end flush if due.
    pub fn fire_timers(&mut self, now: f64) {
        if self.grasps.flush_due(now) > 0 {
            self.pump();
        }
    }

    /// Emit every pending grasp end immediately.
    pub fn finish(&mut self) {
        self.grasps.flush_all();
        self.pump();
    }

    /// Pause or resume detection.
    ///
    /// Pausing ends every active grasp at `now` without debouncing and
    /// clears both group sets; detection resumes with empty state.
    pub fn set_paused(&mut self, paused: bool, now: f64) {
        if paused == self.paused {
            return;
        }
        if paused {
            self.grasps.drain_active(now);
            self.pump();
            self.set_a.clear();
            self.set_b.clear();
            tracing::debug!(owner = %self.owner, time = now, "grasp detection paused");
        } else {
            tracing::debug!(owner = %self.owner, time = now, "grasp detection resumed");
        }
        self.paused = paused;
    }

    /// Input axis feed: at or above the trigger value detection runs,
    /// below it detection is paused.
    pub fn on_input_axis(&mut self, value: f64, now: f64) {
        self.set_paused(value < self.unpause_trigger, now);
    }

    /// Set the grasp type reported by subsequent begin events.
    ///
    /// `"GA_Pinch_Left"` becomes `"PinchGrasp"`.
    pub fn set_grasp_type(&mut self, raw: &str) {
        self.grasp_type = normalize_grasp_type(raw);
    }

    pub fn grasp_type(&self) -> &str {
        &self.grasp_type
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_grasped(&self, object: &SemanticEntity) -> bool {
        self.grasps.is_active(object)
    }

    /// Currently grasped objects.
    pub fn grasped(&self) -> &[SemanticEntity] {
        self.grasps.active()
    }

    pub fn pending_ends(&self) -> usize {
        self.grasps.pending().len()
    }

    pub fn next_deadline(&self) -> Option<f64> {
        self.grasps.next_deadline()
    }

    pub fn set(&self, group: OverlapGroup) -> &GroupSet {
        match group {
            OverlapGroup::A => &self.set_a,
            OverlapGroup::B => &self.set_b,
        }
    }

    fn set_mut(&mut self, group: OverlapGroup) -> &mut GroupSet {
        match group {
            OverlapGroup::A => &mut self.set_a,
            OverlapGroup::B => &mut self.set_b,
        }
    }

    /// Drain queued events in emission order.
    pub fn take_events(&mut self) -> Vec<SemanticEvent> {
        std::mem::take(&mut self.outbox)
    }

    fn pump(&mut self) {
        for ev in self.grasps.take_events() {
            let event = match ev {
                Debounced::Begin { key, time } => SemanticEvent::BeginGrasp {
                    owner: self.owner.clone(),
                    object: key,
                    time,
                    grasp_type: self.grasp_type.clone(),
                },
                Debounced::End { key, time } => SemanticEvent::EndGrasp {
                    owner: self.owner.clone(),
                    object: key,
                    time,
                },
            };
            self.outbox.push(event);
        }
    }
}

/// Strip the `GA_` prefix and a `_Left`/`_Right` suffix, then append `Grasp`.
pub fn normalize_grasp_type(raw: &str) -> String {
    let trimmed = raw.strip_prefix("GA_").unwrap_or(raw);
    let trimmed = trimmed
        .strip_suffix("_Left")
        .or_else(|| trimmed.strip_suffix("_Right"))
        .unwrap_or(trimmed);
    format!("{trimmed}Grasp")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use semlog_core::handle::ObjectHandle;

    fn entity(index: u32, id: &str) -> SemanticEntity {
        SemanticEntity::new(ObjectHandle::new(index, 0), id, "Thing")
    }

    fn detector() -> GraspDetector {
        GraspDetector::new(entity(0, "hand"), 0.55)
    }

    fn kinds(events: &[SemanticEvent]) -> Vec<(&'static str, String, f64)> {
        events
            .iter()
            .map(|e| match e {
                SemanticEvent::BeginGrasp { object, time, .. } => ("begin", object.id.clone(), *time),
                SemanticEvent::EndGrasp { object, time, .. } => ("end", object.id.clone(), *time),
                other => panic!("unexpected event {other:?}"),
            })
            .collect()
    }

    #[test]
    fn both_groups_make_a_single_grasp() {
        let mut d = detector();
        let cup = entity(1, "cup");
        d.on_group_begin(OverlapGroup::A, cup.clone(), 0.0);
        assert!(d.take_events().is_empty());
        d.on_group_begin(OverlapGroup::B, cup.clone(), 0.02);
        assert_eq!(kinds(&d.take_events()), vec![("begin", "cup".into(), 0.02)]);
        assert!(d.is_grasped(&cup));
    }

    #[test]
    fn release_is_debounced_and_regrasp_concatenates() {
        let mut d = detector();
        let cup = entity(1, "cup");
        d.on_group_begin(OverlapGroup::A, cup.clone(), 0.0);
        d.on_group_begin(OverlapGroup::B, cup.clone(), 0.0);
        d.take_events();

        d.on_group_end(OverlapGroup::A, &cup, 1.0);
        assert!(!d.is_grasped(&cup));
        assert_eq!(d.pending_ends(), 1);
        d.on_group_begin(OverlapGroup::A, cup.clone(), 1.3);
        assert!(d.take_events().is_empty());
        assert!(d.is_grasped(&cup));
        assert_eq!(d.pending_ends(), 0);
        assert!(d.next_deadline().is_none());
    }

    #[test]
    fn release_flushes_with_raw_time() {
        let mut d = detector();
        let cup = entity(1, "cup");
        d.on_group_begin(OverlapGroup::A, cup.clone(), 0.0);
        d.on_group_begin(OverlapGroup::B, cup.clone(), 0.0);
        d.on_group_end(OverlapGroup::B, &cup, 2.0);
        d.take_events();

        d.fire_timers(2.5);
        assert!(d.take_events().is_empty());
        d.fire_timers(2.7);
        assert_eq!(kinds(&d.take_events()), vec![("end", "cup".into(), 2.0)]);
    }

    #[test]
    fn group_keeps_object_while_any_sensor_touches() {
        let mut d = detector();
        let cup = entity(1, "cup");
        d.on_group_begin(OverlapGroup::A, cup.clone(), 0.0);
        d.on_group_begin(OverlapGroup::A, cup.clone(), 0.0);
        d.on_group_begin(OverlapGroup::B, cup.clone(), 0.1);
        d.on_group_end(OverlapGroup::A, &cup, 0.5);
        assert!(d.is_grasped(&cup));
        d.on_group_end(OverlapGroup::A, &cup, 0.6);
        assert!(!d.is_grasped(&cup));
    }

    #[test]
    fn pause_force_ends_and_clears() {
        let mut d = detector();
        let cup = entity(1, "cup");
        d.on_group_begin(OverlapGroup::A, cup.clone(), 0.0);
        d.on_group_begin(OverlapGroup::B, cup.clone(), 0.0);
        d.take_events();

        d.on_input_axis(0.1, 4.0);
        assert!(d.is_paused());
        assert_eq!(kinds(&d.take_events()), vec![("end", "cup".into(), 4.0)]);
        assert!(d.set(OverlapGroup::A).is_empty());
        assert!(d.set(OverlapGroup::B).is_empty());

        // Signals while paused are ignored.
        d.on_group_begin(OverlapGroup::A, cup.clone(), 4.1);
        assert!(d.set(OverlapGroup::A).is_empty());

        d.on_input_axis(0.5, 5.0);
        assert!(!d.is_paused());
        d.on_group_begin(OverlapGroup::A, cup.clone(), 5.1);
        d.on_group_begin(OverlapGroup::B, cup.clone(), 5.2);
        assert_eq!(kinds(&d.take_events()), vec![("begin", "cup".into(), 5.2)]);
    }

    #[test]
    fn finish_flushes_pending_ends() {
        let mut d = detector();
        let cup = entity(1, "cup");
        let pan = entity(2, "pan");
        for (o, t) in [(&cup, 0.0), (&pan, 0.0)] {
            d.on_group_begin(OverlapGroup::A, o.clone(), t);
            d.on_group_begin(OverlapGroup::B, o.clone(), t);
        }
        d.on_group_end(OverlapGroup::A, &pan, 1.1);
        d.on_group_end(OverlapGroup::A, &cup, 1.2);
        d.take_events();

        d.finish();
        assert_eq!(
            kinds(&d.take_events()),
            vec![("end", "pan".into(), 1.1), ("end", "cup".into(), 1.2)]
        );
        assert_eq!(d.pending_ends(), 0);
    }

    #[test]
    fn grasp_type_is_normalized() {
        assert_eq!(normalize_grasp_type("GA_Pinch_Left"), "PinchGrasp");
        assert_eq!(normalize_grasp_type("GA_Power_Right"), "PowerGrasp");
        assert_eq!(normalize_grasp_type("Tripod"), "TripodGrasp");

        let mut d = detector();
        d.set_grasp_type("GA_Pinch_Left");
        let cup = entity(1, "cup");
        d.on_group_begin(OverlapGroup::A, cup.clone(), 0.0);
        d.on_group_begin(OverlapGroup::B, cup, 0.0);
        match &d.take_events()[0] {
            SemanticEvent::BeginGrasp { grasp_type, .. } => assert_eq!(grasp_type, "PinchGrasp"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn destroyed_object_releases_grasp() {
        let mut d = detector();
        let cup = entity(1, "cup");
        d.on_group_begin(OverlapGroup::A, cup.clone(), 0.0);
        d.on_group_begin(OverlapGroup::B, cup.clone(), 0.0);
        d.take_events();
        d.forget(&cup, 2.0);
        assert!(!d.is_grasped(&cup));
        assert!(!d.set(OverlapGroup::B).contains(&cup));
        d.finish();
        assert_eq!(kinds(&d.take_events()), vec![("end", "cup".into(), 2.0)]);
    }

    #[test]
    fn owner_is_never_grasped() {
        let mut d = detector();
        let hand = entity(0, "hand");
        d.on_group_begin(OverlapGroup::A, hand.clone(), 0.0);
        d.on_group_begin(OverlapGroup::B, hand.clone(), 0.0);
        assert!(d.take_events().is_empty());
        assert!(d.set(OverlapGroup::A).is_empty());
    }
}
