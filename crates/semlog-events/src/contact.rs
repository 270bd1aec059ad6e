//! Contact events and contact region shapes.
//!
//! A [`ContactTracker`] turns raw per-sensor overlap signals of one owner
//! into debounced begin/end-contact events. An owner may carry several
//! sensors (the fingers of a hand) and the same partner may be seen through
//! its body and through its own region sensor, so overlaps are counted per
//! `(sensor, partner, partner sensor)` and only the first/last overlap with
//! a partner is forwarded to the debouncer.
//!
//! A [`ContactShape`] is a region sensor attached to one semantic object: a
//! tracker plus an optional [`SupportedByDetector`] fed with the same
//! contact transitions.

use std::collections::{HashMap, HashSet};
use std::fmt;

use semlog_core::handle::ObjectHandle;
use semlog_core::identity::SemanticEntity;
use semlog_core::registry::EntityRegistry;

use crate::debounce::{Debounced, Debouncer};
use crate::event::{ContactResult, SemanticEvent};
use crate::lifecycle::Lifecycle;
use crate::supported_by::{BodyMotion, SupportedByConfig, SupportedByDetector};

/// Default debounce gap of region contacts, in seconds.
pub const DEFAULT_REGION_CONTACT_GAP: f64 = 0.12;

/// Default debounce gap of manipulator contacts, in seconds.
pub const DEFAULT_MANIPULATOR_CONTACT_GAP: f64 = 0.35;

// ---------------------------------------------------------------------------
// SensorId
// ---------------------------------------------------------------------------

/// Host-assigned id of a sensor volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct SensorId(pub u32);

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sensor#{}", self.0)
    }
}

/// What changed for a partner after a raw overlap signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactTransition {
    /// First overlap with the partner.
    Entered,
    /// Last overlap with the partner ended.
    Left,
    /// The partner was already (or still is) in contact.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct OverlapKey {
    sensor: SensorId,
    other: ObjectHandle,
    other_sensor: Option<SensorId>,
}

#[derive(Debug, Clone)]
struct Partner {
    entity: SemanticEntity,
    overlaps: u32,
    is_region: bool,
}

// ---------------------------------------------------------------------------
// ContactTracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ContactTracker {
    owner: SemanticEntity,
    overlaps: HashSet<OverlapKey>,
    partners: HashMap<ObjectHandle, Partner>,
    contacts: Debouncer<SemanticEntity>,
    outbox: Vec<SemanticEvent>,
}

impl ContactTracker {
    pub fn new(owner: SemanticEntity, gap: f64) -> Self {
        Self {
            owner,
            overlaps: HashSet::new(),
            partners: HashMap::new(),
            contacts: Debouncer::new(gap),
            outbox: Vec::new(),
        }
    }

    pub fn owner(&self) -> &SemanticEntity {
        &self.owner
    }

    /// `sensor` started overlapping `other`, through `other_sensor` if the
    /// partner side is a region sensor.
    pub fn on_begin(
        &mut self,
        sensor: SensorId,
        other: SemanticEntity,
        other_sensor: Option<SensorId>,
        now: f64,
    ) -> ContactTransition {
        if other == self.owner {
            return ContactTransition::Unchanged;
        }
        let key = OverlapKey {
            sensor,
            other: other.handle,
            other_sensor,
        };
        if !self.overlaps.insert(key) {
            return ContactTransition::Unchanged;
        }
        let partner = self.partners.entry(other.handle).or_insert_with(|| Partner {
            entity: other.clone(),
            overlaps: 0,
            is_region: other_sensor.is_some(),
        });
        partner.overlaps += 1;
        if partner.overlaps > 1 {
            return ContactTransition::Unchanged;
        }
        self.contacts.raw_begin(other, now);
        self.pump();
        ContactTransition::Entered
    }

    /// `sensor` stopped overlapping `other`.
    pub fn on_end(
        &mut self,
        sensor: SensorId,
        other: &SemanticEntity,
        other_sensor: Option<SensorId>,
        now: f64,
    ) -> ContactTransition {
        let key = OverlapKey {
            sensor,
            other: other.handle,
            other_sensor,
        };
        if !self.overlaps.remove(&key) {
            if *other != self.owner {
                tracing::error!(
                    owner = %self.owner,
                    other = %other,
                    %sensor,
                    "contact ended without a matching begin"
                );
            }
            return ContactTransition::Unchanged;
        }
        let Some(partner) = self.partners.get_mut(&other.handle) else {
            return ContactTransition::Unchanged;
        };
        partner.overlaps -= 1;
        if partner.overlaps > 0 {
            return ContactTransition::Unchanged;
        }
        self.partners.remove(&other.handle);
        self.contacts.raw_end(other, now);
        self.pump();
        ContactTransition::Left
    }

    /// Drop every overlap with `other` (it was destroyed).
    pub fn forget(&mut self, other: &SemanticEntity, now: f64) -> ContactTransition {
        self.overlaps.retain(|k| k.other != other.handle);
        if self.partners.remove(&other.handle).is_none() {
            return ContactTransition::Unchanged;
        }
        self.contacts.raw_end(other, now);
        self.pump();
        ContactTransition::Left
    }

    pub fn fire_timers(&mut self, now: f64) {
        if self.contacts.flush_due(now) > 0 {
            self.pump();
        }
    }

    /// Emit every pending contact end immediately.
    pub fn finish(&mut self) {
        self.contacts.flush_all();
        self.pump();
    }

    pub fn is_in_contact(&self, other: &SemanticEntity) -> bool {
        self.contacts.is_active(other)
    }

    /// Partners currently overlapping at least one sensor.
    pub fn partners(&self) -> impl Iterator<Item = &SemanticEntity> {
        self.partners.values().map(|p| &p.entity)
    }

    pub fn pending_ends(&self) -> usize {
        self.contacts.pending().len()
    }

    pub fn next_deadline(&self) -> Option<f64> {
        self.contacts.next_deadline()
    }

    pub fn take_events(&mut self) -> Vec<SemanticEvent> {
        std::mem::take(&mut self.outbox)
    }

    fn pump(&mut self) {
        for ev in self.contacts.take_events() {
            let event = match ev {
                Debounced::Begin { key, time } => {
                    let is_other_region = self
                        .partners
                        .get(&key.handle)
                        .is_some_and(|p| p.is_region);
                    SemanticEvent::BeginContact(ContactResult {
                        self_entity: self.owner.clone(),
                        other: key,
                        time,
                        is_other_region,
                    })
                }
                Debounced::End { key, time } => SemanticEvent::EndContact {
                    self_entity: self.owner.clone(),
                    other: key,
                    time,
                },
            };
            self.outbox.push(event);
        }
    }
}

// ---------------------------------------------------------------------------
// ContactShape
// ---------------------------------------------------------------------------

/// Settings of a contact region.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ContactShapeConfig {
    pub contact_gap: f64,
    /// `None` disables supported-by detection for this region.
    pub supported_by: Option<SupportedByConfig>,
}

impl Default for ContactShapeConfig {
    fn default() -> Self {
        Self {
            contact_gap: DEFAULT_REGION_CONTACT_GAP,
            supported_by: Some(SupportedByConfig::default()),
        }
    }
}

/// A region sensor attached to one semantic object.
///
/// Stays inert (every call is a no-op) until [`init`](Self::init) succeeds
/// and [`start`](Self::start) is called, and again after
/// [`finish`](Self::finish).
#[derive(Debug, Clone)]
pub struct ContactShape {
    sensor: SensorId,
    config: ContactShapeConfig,
    state: Lifecycle,
    tracker: Option<ContactTracker>,
    supported_by: Option<SupportedByDetector>,
}

impl ContactShape {
    pub fn new(sensor: SensorId, config: ContactShapeConfig) -> Self {
        Self {
            sensor,
            config,
            state: Lifecycle::Created,
            tracker: None,
            supported_by: None,
        }
    }

    /// Resolve the owner's semantic data. Returns `false` (and stays
    /// uninitialized) if `owner` is not in the registry.
    pub fn init(&mut self, owner: ObjectHandle, registry: &dyn EntityRegistry) -> bool {
        if self.state != Lifecycle::Created {
            return self.state.is_init();
        }
        let Some(entity) = registry.lookup(owner) else {
            tracing::error!(sensor = %self.sensor, ?owner, "contact region owner is not semantically annotated");
            return false;
        };
        self.tracker = Some(ContactTracker::new(entity.clone(), self.config.contact_gap));
        self.supported_by = self
            .config
            .supported_by
            .map(|cfg| SupportedByDetector::new(entity.clone(), cfg));
        self.state = Lifecycle::Initialized;
        true
    }

    /// Begin processing; `initial` lists partners already overlapping the
    /// region as `(partner, partner region sensor)`.
    pub fn start<I>(&mut self, now: f64, initial: I)
    where
        I: IntoIterator<Item = (SemanticEntity, Option<SensorId>)>,
    {
        if self.state != Lifecycle::Initialized {
            return;
        }
        self.state = Lifecycle::Started;
        for (other, other_sensor) in initial {
            self.on_overlap_begin(other, other_sensor, now);
        }
    }

    pub fn on_overlap_begin(&mut self, other: SemanticEntity, other_sensor: Option<SensorId>, now: f64) {
        if !self.state.is_running() {
            return;
        }
        let Some(tracker) = self.tracker.as_mut() else {
            return;
        };
        if tracker.on_begin(self.sensor, other.clone(), other_sensor, now) == ContactTransition::Entered {
            if let Some(sb) = self.supported_by.as_mut() {
                sb.on_contact_begin(other, now);
            }
        }
    }

    pub fn on_overlap_end(&mut self, other: &SemanticEntity, other_sensor: Option<SensorId>, now: f64) {
        if !self.state.is_running() {
            return;
        }
        let Some(tracker) = self.tracker.as_mut() else {
            return;
        };
        if tracker.on_end(self.sensor, other, other_sensor, now) == ContactTransition::Left {
            if let Some(sb) = self.supported_by.as_mut() {
                sb.on_contact_end(other, now);
            }
        }
    }

    /// The partner object was destroyed mid-contact.
    pub fn on_partner_destroyed(&mut self, other: &SemanticEntity, now: f64) {
        if !self.state.is_running() {
            return;
        }
        let Some(tracker) = self.tracker.as_mut() else {
            return;
        };
        if tracker.forget(other, now) == ContactTransition::Left {
            if let Some(sb) = self.supported_by.as_mut() {
                sb.on_contact_end(other, now);
            }
        }
    }

    /// Fire debounce timers and run a supported-by poll if due.
    pub fn update(&mut self, now: f64, motion: &dyn BodyMotion) {
        if !self.state.is_running() {
            return;
        }
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.fire_timers(now);
        }
        if let Some(sb) = self.supported_by.as_mut() {
            sb.poll(now, motion);
        }
    }

    /// Flush pending contact ends and end active supports at `now`.
    pub fn finish(&mut self, now: f64) {
        if !self.state.is_running() {
            self.state = Lifecycle::Finished;
            return;
        }
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.finish();
        }
        if let Some(sb) = self.supported_by.as_mut() {
            sb.finish(now);
        }
        self.state = Lifecycle::Finished;
    }

    /// Contact events first, then supported-by events.
    pub fn take_events(&mut self) -> Vec<SemanticEvent> {
        let mut events = self
            .tracker
            .as_mut()
            .map(ContactTracker::take_events)
            .unwrap_or_default();
        if let Some(sb) = self.supported_by.as_mut() {
            events.extend(sb.take_events());
        }
        events
    }

    pub fn sensor(&self) -> SensorId {
        self.sensor
    }

    pub fn owner(&self) -> Option<&SemanticEntity> {
        self.tracker.as_ref().map(ContactTracker::owner)
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn tracker(&self) -> Option<&ContactTracker> {
        self.tracker.as_ref()
    }

    pub fn is_supported(&self) -> bool {
        self.supported_by
            .as_ref()
            .is_some_and(SupportedByDetector::is_supported)
    }

    pub fn last_supported_by_end_time(&self) -> Option<f64> {
        self.supported_by
            .as_ref()
            .and_then(SupportedByDetector::last_supported_by_end_time)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
