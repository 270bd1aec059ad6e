//! Manipulator listener: grasp and contact events of one hand.
//!
//! The listener owns the hand's finger sensors (each tagged with an
//! [`OverlapGroup`]), a [`GraspDetector`] and a [`ContactTracker`]. Raw
//! sensor overlaps feed both: every overlap counts as a contact, overlaps
//! with bodies (not with other sensors) also feed the grasp groups.

use std::collections::BTreeMap;

use semlog_core::handle::ObjectHandle;
use semlog_core::identity::SemanticEntity;
use semlog_core::registry::EntityRegistry;

use crate::contact::{ContactTracker, SensorId, DEFAULT_MANIPULATOR_CONTACT_GAP};
use crate::event::SemanticEvent;
use crate::grasp::{GraspDetector, OverlapGroup, DEFAULT_GRASP_GAP, DEFAULT_UNPAUSE_TRIGGER};
use crate::lifecycle::Lifecycle;

/// Manipulator listener settings.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ManipulatorConfig {
    pub grasp_gap: f64,
    pub contact_gap: f64,
    pub unpause_trigger: f64,
    pub log_grasps: bool,
    pub log_contacts: bool,
}

impl Default for ManipulatorConfig {
    fn default() -> Self {
        Self {
            grasp_gap: DEFAULT_GRASP_GAP,
            contact_gap: DEFAULT_MANIPULATOR_CONTACT_GAP,
            unpause_trigger: DEFAULT_UNPAUSE_TRIGGER,
            log_grasps: true,
            log_contacts: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManipulatorListener {
    config: ManipulatorConfig,
    state: Lifecycle,
    sensors: BTreeMap<SensorId, OverlapGroup>,
    grasp: Option<GraspDetector>,
    contacts: Option<ContactTracker>,
}

impl ManipulatorListener {
    pub fn new(config: ManipulatorConfig) -> Self {
        Self {
            config,
            state: Lifecycle::Created,
            sensors: BTreeMap::new(),
            grasp: None,
            contacts: None,
        }
    }

    /// Attach a finger sensor. Only allowed before `init`.
    pub fn add_sensor(&mut self, sensor: SensorId, group: OverlapGroup) {
        if self.state != Lifecycle::Created {
            tracing::warn!(%sensor, "sensor added after init is ignored");
            return;
        }
        self.sensors.insert(sensor, group);
    }

    /// Resolve the owner and build the detectors.
    ///
    /// Fails (returns `false`, stays uninitialized) if the owner is not in
    /// the registry or a grasp group has no sensor while grasps are logged.
    pub fn init(&mut self, owner: ObjectHandle, registry: &dyn EntityRegistry) -> bool {
        if self.state != Lifecycle::Created {
            return self.state.is_init();
        }
        let Some(entity) = registry.lookup(owner) else {
            tracing::error!(?owner, "manipulator owner is not semantically annotated");
            return false;
        };
        if self.config.log_grasps {
            for group in [OverlapGroup::A, OverlapGroup::B] {
                if !self.sensors.values().any(|g| *g == group) {
                    tracing::error!(owner = %entity, ?group, "manipulator has no sensor in grasp group");
                    return false;
                }
            }
            self.grasp = Some(
                GraspDetector::new(entity.clone(), self.config.grasp_gap)
                    .with_unpause_trigger(self.config.unpause_trigger),
            );
        }
        if self.config.log_contacts {
            self.contacts = Some(ContactTracker::new(entity.clone(), self.config.contact_gap));
        }
        self.state = Lifecycle::Initialized;
        tracing::debug!(owner = %entity, sensors = self.sensors.len(), "manipulator listener initialized");
        true
    }

    pub fn start(&mut self) {
        if self.state == Lifecycle::Initialized {
            self.state = Lifecycle::Started;
        }
    }

    /// Raw overlap begin from `sensor`.
    pub fn on_overlap_begin(
        &mut self,
        sensor: SensorId,
        other: SemanticEntity,
        other_sensor: Option<SensorId>,
        now: f64,
    ) {
        let Some(group) = self.group_of(sensor) else {
            return;
        };
        if let Some(contacts) = self.contacts.as_mut() {
            contacts.on_begin(sensor, other.clone(), other_sensor, now);
        }
        if other_sensor.is_none() {
            if let Some(grasp) = self.grasp.as_mut() {
                grasp.on_group_begin(group, other, now);
            }
        }
    }

    /// Raw overlap end from `sensor`.
    pub fn on_overlap_end(
        &mut self,
        sensor: SensorId,
        other: &SemanticEntity,
        other_sensor: Option<SensorId>,
        now: f64,
    ) {
        let Some(group) = self.group_of(sensor) else {
            return;
        };
        if let Some(contacts) = self.contacts.as_mut() {
            contacts.on_end(sensor, other, other_sensor, now);
        }
        if other_sensor.is_none() {
            if let Some(grasp) = self.grasp.as_mut() {
                grasp.on_group_end(group, other, now);
            }
        }
    }

    /// `other` was destroyed while possibly touched or grasped.
    pub fn on_partner_destroyed(&mut self, other: &SemanticEntity, now: f64) {
        if !self.state.is_running() {
            return;
        }
        if let Some(contacts) = self.contacts.as_mut() {
            contacts.forget(other, now);
        }
        if let Some(grasp) = self.grasp.as_mut() {
            grasp.forget(other, now);
        }
    }

    /// Grasp trigger input (e.g. an analog button): pauses detection below
    /// the unpause trigger value.
    pub fn on_input_axis(&mut self, value: f64, now: f64) {
        if !self.state.is_running() {
            return;
        }
        if let Some(grasp) = self.grasp.as_mut() {
            grasp.on_input_axis(value, now);
        }
    }

    pub fn set_grasp_type(&mut self, raw: &str) {
        if let Some(grasp) = self.grasp.as_mut() {
            grasp.set_grasp_type(raw);
        }
    }

    pub fn fire_timers(&mut self, now: f64) {
        if !self.state.is_running() {
            return;
        }
        if let Some(grasp) = self.grasp.as_mut() {
            grasp.fire_timers(now);
        }
        if let Some(contacts) = self.contacts.as_mut() {
            contacts.fire_timers(now);
        }
    }

    /// Flush every pending grasp and contact end, then stop.
    pub fn finish(&mut self) {
        if self.state.is_running() {
            if let Some(grasp) = self.grasp.as_mut() {
                grasp.finish();
            }
            if let Some(contacts) = self.contacts.as_mut() {
                contacts.finish();
            }
        }
        self.state = Lifecycle::Finished;
    }

    /// Grasp events first, then contact events.
    pub fn take_events(&mut self) -> Vec<SemanticEvent> {
        let mut events = self
            .grasp
            .as_mut()
            .map(GraspDetector::take_events)
            .unwrap_or_default();
        if let Some(contacts) = self.contacts.as_mut() {
            events.extend(contacts.take_events());
        }
        events
    }

    fn group_of(&self, sensor: SensorId) -> Option<OverlapGroup> {
        if !self.state.is_running() {
            return None;
        }
        let group = self.sensors.get(&sensor).copied();
        if group.is_none() {
            tracing::error!(%sensor, "overlap reported for a sensor this manipulator does not own");
        }
        group
    }

    pub fn owns_sensor(&self, sensor: SensorId) -> bool {
        self.sensors.contains_key(&sensor)
    }

    pub fn sensors(&self) -> impl Iterator<Item = (SensorId, OverlapGroup)> + '_ {
        self.sensors.iter().map(|(s, g)| (*s, *g))
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn grasp(&self) -> Option<&GraspDetector> {
        self.grasp.as_ref()
    }

    pub fn contacts(&self) -> Option<&ContactTracker> {
        self.contacts.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use semlog_core::identity::ObjectKind;
    use semlog_core::registry::{RegistryEntry, SemanticRegistry};

    fn entity(index: u32, id: &str) -> SemanticEntity {
        SemanticEntity::new(ObjectHandle::new(index, 0), id, "Thing")
    }

    fn registry() -> SemanticRegistry {
        let mut reg = SemanticRegistry::new();
        for (i, id) in [(0, "hand"), (1, "cup")] {
            reg.register(RegistryEntry::new(entity(i, id), ObjectKind::Actor))
                .unwrap();
        }
        reg
    }

    fn hand() -> ManipulatorListener {
        let mut m = ManipulatorListener::new(ManipulatorConfig::default());
        m.add_sensor(SensorId(10), OverlapGroup::A);
        m.add_sensor(SensorId(11), OverlapGroup::B);
        m.add_sensor(SensorId(12), OverlapGroup::B);
        assert!(m.init(ObjectHandle::new(0, 0), &registry()));
        m.start();
        m
    }

    #[test]
    fn unregistered_owner_fails_init() {
        let mut m = ManipulatorListener::new(ManipulatorConfig::default());
        m.add_sensor(SensorId(10), OverlapGroup::A);
        m.add_sensor(SensorId(11), OverlapGroup::B);
        assert!(!m.init(ObjectHandle::new(7, 0), &registry()));
        m.start();
        m.on_overlap_begin(SensorId(10), entity(1, "cup"), None, 0.0);
        assert!(m.take_events().is_empty());
    }

    #[test]
    fn missing_group_fails_init() {
        let mut m = ManipulatorListener::new(ManipulatorConfig::default());
        m.add_sensor(SensorId(10), OverlapGroup::A);
        assert!(!m.init(ObjectHandle::new(0, 0), &registry()));
    }

    #[test]
    fn grasp_and_contact_from_the_same_signals() {
        let mut m = hand();
        let cup = entity(1, "cup");
        m.on_overlap_begin(SensorId(10), cup.clone(), None, 0.0);
        m.on_overlap_begin(SensorId(11), cup.clone(), None, 0.02);
        let events = m.take_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], SemanticEvent::BeginGrasp { time, .. } if *time == 0.02));
        assert!(matches!(&events[1], SemanticEvent::BeginContact(r) if r.time == 0.0));
    }

    #[test]
    fn finish_flushes_both_detectors() {
        let mut m = hand();
        let cup = entity(1, "cup");
        m.on_overlap_begin(SensorId(10), cup.clone(), None, 0.0);
        m.on_overlap_begin(SensorId(12), cup.clone(), None, 0.0);
        m.take_events();
        m.on_overlap_end(SensorId(10), &cup, None, 1.0);
        m.on_overlap_end(SensorId(12), &cup, None, 1.1);
        m.fire_timers(1.2);
        assert!(m.take_events().is_empty());

        m.finish();
        let events = m.take_events();
        assert!(matches!(&events[..], [
            SemanticEvent::EndGrasp { time: t1, .. },
            SemanticEvent::EndContact { time: t2, .. },
        ] if *t1 == 1.0 && *t2 == 1.1));
        assert_eq!(m.state(), Lifecycle::Finished);
    }

    #[test]
    fn unknown_sensor_is_ignored() {
        let mut m = hand();
        m.on_overlap_begin(SensorId(99), entity(1, "cup"), None, 0.0);
        assert!(m.take_events().is_empty());
    }

    #[test]
    fn sensor_partner_counts_as_contact_only() {
        let mut m = hand();
        let cup = entity(1, "cup");
        m.on_overlap_begin(SensorId(10), cup.clone(), Some(SensorId(50)), 0.0);
        m.on_overlap_begin(SensorId(11), cup.clone(), Some(SensorId(50)), 0.0);
        let events = m.take_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], SemanticEvent::BeginContact(r) if r.is_other_region));
    }
}
