//! Logging session: the fixed-timestep loop that ties the physics host,
//! the event detectors and the world-state logger together.
//!
//! Each [`tick`](LoggingSession::tick):
//!
//! 1. The physics world steps by the fixed dt and reports sensor overlaps.
//! 2. Overlap signals are routed by sensor id to the manipulator listener
//!    or contact region that owns the sensor.
//! 3. Debounce timers fire and due supported-by polls run.
//! 4. New semantic events are published on the [`EventBus`] (subscription
//!    order) and recorded in the [`EventJournal`].
//! 5. The world-state logger samples if due.
//!
//! Simulation time is `tick_count * fixed_dt`, never accumulated.
//!
//! # Example
//!
//! ```
//! use semlog_engine::prelude::*;
//!
//! let mut config = SessionConfig::default();
//! config.world_state.enabled = false;
//! let mut session = LoggingSession::new(config).unwrap();
//!
//! let table = session
//!     .spawn_object("table", "Table", ObjectKind::Actor,
//!         PhysicsBody::new(BodyKind::Static, ColliderShape::Box { hx: 50.0, hy: 50.0, hz: 5.0 }),
//!         EntityPose::default())
//!     .unwrap();
//! session.add_contact_region(table, ColliderShape::Box { hx: 51.0, hy: 51.0, hz: 6.0 }, Vec3::ZERO).unwrap();
//!
//! session.start();
//! for _ in 0..10 {
//!     session.tick();
//! }
//! session.finish();
//! assert_eq!(session.tick_count(), 10);
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use semlog_core::handle::{HandleTable, ObjectHandle};
use semlog_core::identity::{Mobility, ObjectKind, SemanticEntity};
use semlog_core::math::{EntityPose, Vec3};
use semlog_core::registry::{EntityRegistry, RegistryEntry, SemanticRegistry};
use semlog_core::CoreError;
use semlog_events::contact::{ContactShape, SensorId};
use semlog_events::event::{EventBus, SemanticEvent, SubscriptionId};
use semlog_events::grasp::OverlapGroup;
use semlog_events::journal::EventJournal;
use semlog_events::lifecycle::Lifecycle;
use semlog_events::manipulator::ManipulatorListener;

use crate::config::{ConfigError, SessionConfig};
use crate::physics::{BodyKind, Bone, ColliderShape, OverlapPhase, OverlapSignal, PhysicsBody, PhysicsWorld};
use crate::world_state::sampler::{GazeSample, WorldStateSampler};
use crate::world_state::store::DocumentStore;
use crate::world_state::worker::{LoggerStats, WorldStateLogger};
use crate::world_state::writer::{create_writer, WriterTarget};

// ---------------------------------------------------------------------------
// Errors / reports
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] CoreError),

    #[error("object {handle:?} does not exist")]
    UnknownObject { handle: ObjectHandle },

    #[error("manipulator {index} does not exist")]
    UnknownManipulator { index: usize },

    #[error("sessions can only be configured before start")]
    AlreadyStarted,
}

/// Which subsystems came up at [`LoggingSession::start`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInit {
    pub world_state: bool,
    pub manipulators: Vec<bool>,
    pub contact_regions: Vec<bool>,
}

/// Timing of the last tick.
#[derive(Debug, Clone, Default)]
pub struct SessionDiagnostics {
    pub physics_time: Duration,
    pub events_time: Duration,
    pub world_state_time: Duration,
    pub total_time: Duration,
    pub signals: usize,
    pub events: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SensorRoute {
    Manipulator(usize),
    ContactRegion(usize),
}

/// A finger sensor of a manipulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FingerSensor {
    pub group: OverlapGroup,
    pub shape: ColliderShape,
    pub offset: Vec3,
}

// ---------------------------------------------------------------------------
// LoggingSession
// ---------------------------------------------------------------------------

pub struct LoggingSession {
    config: SessionConfig,
    episode_id: String,
    state: Lifecycle,
    handles: HandleTable,
    registry: SemanticRegistry,
    physics: PhysicsWorld,
    manipulators: Vec<(ObjectHandle, ManipulatorListener)>,
    regions: Vec<(ObjectHandle, ContactShape)>,
    routes: HashMap<SensorId, SensorRoute>,
    next_sensor: u32,
    bus: EventBus,
    journal: EventJournal,
    store: Option<Box<dyn DocumentStore>>,
    world_state: Option<WorldStateLogger>,
    last_world_state: Option<LoggerStats>,
    tick_counter: u64,
    init: SessionInit,
    last_diagnostics: SessionDiagnostics,
}

impl std::fmt::Debug for LoggingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingSession")
            .field("episode_id", &self.episode_id)
            .field("state", &self.state)
            .field("tick", &self.tick_counter)
            .field("objects", &self.registry.len())
            .field("manipulators", &self.manipulators.len())
            .field("regions", &self.regions.len())
            .finish()
    }
}

impl LoggingSession {
    /// Validate `config` and build an empty session with earth gravity.
    pub fn new(config: SessionConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let episode_id = config.resolve_episode_id();
        tracing::info!(task = %config.session.task_id, episode = %episode_id, "logging session created");
        Ok(Self {
            config,
            episode_id,
            state: Lifecycle::Created,
            handles: HandleTable::new(),
            registry: SemanticRegistry::new(),
            physics: PhysicsWorld::with_earth_gravity(),
            manipulators: Vec::new(),
            regions: Vec::new(),
            routes: HashMap::new(),
            next_sensor: 0,
            bus: EventBus::new(),
            journal: EventJournal::new(),
            store: None,
            world_state: None,
            last_world_state: None,
            tick_counter: 0,
            init: SessionInit::default(),
            last_diagnostics: SessionDiagnostics::default(),
        })
    }

    /// Document store used by the store writer.
    pub fn with_store(mut self, store: Box<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    // -- world setup ---------------------------------------------------------

    /// Create an annotated object with a physics body.
    ///
    /// Static bodies are registered with [`Mobility::Static`].
    pub fn spawn_object(
        &mut self,
        id: &str,
        class: &str,
        kind: ObjectKind,
        body: PhysicsBody,
        pose: EntityPose,
    ) -> Result<ObjectHandle, EngineError> {
        let handle = self.handles.spawn();
        let mobility = if body.kind == BodyKind::Static {
            Mobility::Static
        } else {
            Mobility::Movable
        };
        let entry = RegistryEntry::new(SemanticEntity::new(handle, id, class), kind).with_mobility(mobility);
        if let Err(e) = self.registry.register(entry) {
            self.handles.destroy(handle);
            return Err(e.into());
        }
        self.physics.register_body(handle, pose, Vec3::ZERO, &body);
        Ok(handle)
    }

    /// Create an object the registry knows nothing about.
    pub fn spawn_unannotated(&mut self, body: PhysicsBody, pose: EntityPose) -> ObjectHandle {
        let handle = self.handles.spawn();
        self.physics.register_body(handle, pose, Vec3::ZERO, &body);
        handle
    }

    pub fn attach_rig(&mut self, handle: ObjectHandle, bones: Vec<Bone>) -> Result<(), EngineError> {
        if self.physics.attach_rig(handle, bones) {
            Ok(())
        } else {
            Err(EngineError::UnknownObject { handle })
        }
    }

    /// Add a manipulator listener on `owner` with one sensor per finger.
    /// Returns the manipulator index.
    pub fn add_manipulator(
        &mut self,
        owner: ObjectHandle,
        fingers: &[FingerSensor],
    ) -> Result<usize, EngineError> {
        self.ensure_configurable()?;
        if !self.physics.has_body(owner) {
            return Err(EngineError::UnknownObject { handle: owner });
        }
        let index = self.manipulators.len();
        let mut listener = ManipulatorListener::new(self.config.events.manipulator());
        for finger in fingers {
            let sensor = self.alloc_sensor();
            self.physics.add_sensor(owner, sensor, finger.shape, finger.offset);
            self.routes.insert(sensor, SensorRoute::Manipulator(index));
            listener.add_sensor(sensor, finger.group);
        }
        self.manipulators.push((owner, listener));
        Ok(index)
    }

    /// Add a contact region sensor around `owner`.
    pub fn add_contact_region(
        &mut self,
        owner: ObjectHandle,
        shape: ColliderShape,
        offset: Vec3,
    ) -> Result<SensorId, EngineError> {
        self.ensure_configurable()?;
        if !self.physics.has_body(owner) {
            return Err(EngineError::UnknownObject { handle: owner });
        }
        let sensor = self.alloc_sensor();
        self.physics.add_sensor(owner, sensor, shape, offset);
        self.routes
            .insert(sensor, SensorRoute::ContactRegion(self.regions.len()));
        self.regions
            .push((owner, ContactShape::new(sensor, self.config.events.contact_region())));
        Ok(sensor)
    }

    /// Register an event subscriber. Dispatch follows subscription order.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&SemanticEvent) + Send + 'static,
    {
        self.bus.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    fn ensure_configurable(&self) -> Result<(), EngineError> {
        if self.state == Lifecycle::Created {
            Ok(())
        } else {
            Err(EngineError::AlreadyStarted)
        }
    }

    fn alloc_sensor(&mut self) -> SensorId {
        let sensor = SensorId(self.next_sensor);
        self.next_sensor += 1;
        sensor
    }

    // -- lifecycle -----------------------------------------------------------

    /// Initialize and start every subsystem. A subsystem that fails to
    /// initialize stays disabled; the others run.
    pub fn start(&mut self) -> &SessionInit {
        if self.state != Lifecycle::Created {
            return &self.init;
        }
        self.registry.init();
        let now = self.sim_time();

        for (owner, listener) in &mut self.manipulators {
            let ok = listener.init(*owner, &self.registry);
            listener.start();
            self.init.manipulators.push(ok);
        }

        for (owner, region) in &mut self.regions {
            let ok = region.init(*owner, &self.registry);
            let initial: Vec<(SemanticEntity, Option<SensorId>)> = self
                .physics
                .current_overlaps(region.sensor())
                .into_iter()
                .filter_map(|(other, other_sensor)| {
                    let other_sensor = match other_sensor {
                        None => None,
                        Some(s) if matches!(self.routes.get(&s), Some(SensorRoute::ContactRegion(_))) => Some(s),
                        Some(_) => return None,
                    };
                    self.registry
                        .lookup(other)
                        .map(|e| (e.clone(), other_sensor))
                })
                .collect();
            region.start(now, initial);
            self.init.contact_regions.push(ok);
        }

        self.init.world_state = self.config.world_state.enabled && self.start_world_state(now);
        self.state = Lifecycle::Started;
        self.dispatch();
        tracing::info!(
            world_state = self.init.world_state,
            manipulators = self.manipulators.len(),
            regions = self.regions.len(),
            "logging session started"
        );
        &self.init
    }

    fn start_world_state(&mut self, now: f64) -> bool {
        let ws = &self.config.world_state;
        let mut sampler = WorldStateSampler::from_registry(
            &self.registry,
            ws.thresholds(),
            ws.conversion(),
            ws.gaze_tolerance,
        );
        if ws.remove_static_items {
            sampler.remove_static_items(&self.registry);
        }
        let target = WriterTarget {
            kind: ws.writer,
            output_dir: &ws.output_dir,
            task_id: &self.config.session.task_id,
            episode_id: &self.episode_id,
            database: self.config.database(),
            overwrite: ws.overwrite,
        };
        let writer = match create_writer(&target, self.store.take()) {
            Ok(writer) => writer,
            Err(e) => {
                tracing::error!(error = %e, "world state writer init failed; world state logging disabled");
                return false;
            }
        };
        match WorldStateLogger::spawn(sampler, writer, ws.update_rate) {
            Ok(mut logger) => {
                logger.start(now);
                self.world_state = Some(logger);
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot start world state worker");
                false
            }
        }
    }

    /// Advance one fixed step. Returns the number of events published.
    pub fn tick(&mut self) -> usize {
        if !self.state.is_running() {
            return 0;
        }
        let tick_start = Instant::now();

        let physics_start = Instant::now();
        let signals = self.physics.step(self.config.session.fixed_dt);
        let physics_time = physics_start.elapsed();

        self.tick_counter += 1;
        let now = self.sim_time();

        let events_start = Instant::now();
        for signal in &signals {
            self.route(signal, now);
        }
        for (_, listener) in &mut self.manipulators {
            listener.fire_timers(now);
        }
        for (_, region) in &mut self.regions {
            region.update(now, &self.physics);
        }
        let events = self.dispatch();
        let events_time = events_start.elapsed();

        let ws_start = Instant::now();
        if let Some(logger) = self.world_state.as_mut() {
            logger.update(now, &self.physics, &mut self.registry);
        }
        let world_state_time = ws_start.elapsed();

        self.last_diagnostics = SessionDiagnostics {
            physics_time,
            events_time,
            world_state_time,
            total_time: tick_start.elapsed(),
            signals: signals.len(),
            events,
        };
        events
    }

    pub fn run_ticks(&mut self, count: u64) -> usize {
        (0..count).map(|_| self.tick()).sum()
    }

    /// Flush every pending end event in timestamp order, finish the
    /// world-state writer, close the journal and tear the registry down.
    pub fn finish(&mut self) {
        if self.state != Lifecycle::Started {
            self.state = Lifecycle::Finished;
            return;
        }
        let now = self.sim_time();

        let mut pending = Vec::new();
        for (_, listener) in &mut self.manipulators {
            listener.finish();
            pending.extend(listener.take_events());
        }
        for (_, region) in &mut self.regions {
            region.finish(now);
            pending.extend(region.take_events());
        }
        pending.sort_by(|a, b| a.time().total_cmp(&b.time()));
        for event in &pending {
            self.publish(event);
        }

        if let Some(mut logger) = self.world_state.take() {
            match logger.finish(&mut self.registry) {
                Ok(written) => tracing::debug!(written, "world state writer finished"),
                Err(e) => tracing::error!(error = %e, "world state writer finish failed"),
            }
            self.last_world_state = Some(logger.stats());
        }

        self.journal.finish(now);
        self.registry.teardown();
        self.state = Lifecycle::Finished;
        tracing::info!(
            ticks = self.tick_counter,
            relations = self.journal.len(),
            unmatched = self.journal.unmatched_ends(),
            "logging session finished"
        );
    }

    // -- host input ----------------------------------------------------------

    pub fn set_kinematic_pose(&mut self, handle: ObjectHandle, pose: EntityPose) {
        self.physics.set_kinematic_pose(handle, pose);
    }

    pub fn set_linear_velocity(&mut self, handle: ObjectHandle, velocity: Vec3) {
        self.physics.set_linear_velocity(handle, velocity);
    }

    pub fn set_gaze(&mut self, gaze: Option<GazeSample>) {
        self.physics.set_gaze(gaze);
    }

    /// Grasp trigger axis of a manipulator; below the unpause trigger the
    /// manipulator stops detecting grasps and ends the active ones.
    pub fn set_grasp_input(&mut self, manipulator: usize, value: f64) -> Result<(), EngineError> {
        let now = self.sim_time();
        let (_, listener) = self
            .manipulators
            .get_mut(manipulator)
            .ok_or(EngineError::UnknownManipulator { index: manipulator })?;
        listener.on_input_axis(value, now);
        self.dispatch();
        Ok(())
    }

    pub fn set_grasp_type(&mut self, manipulator: usize, raw: &str) -> Result<(), EngineError> {
        let (_, listener) = self
            .manipulators
            .get_mut(manipulator)
            .ok_or(EngineError::UnknownManipulator { index: manipulator })?;
        listener.set_grasp_type(raw);
        Ok(())
    }

    /// Remove an object from the world mid-session. Detectors treat it as
    /// contact lost; listeners and regions it owned are finished.
    pub fn destroy_object(&mut self, handle: ObjectHandle) -> bool {
        if !self.physics.has_body(handle) {
            return false;
        }
        let now = self.sim_time();
        if let Some(entity) = self.registry.lookup(handle).cloned() {
            if self.state.is_running() {
                for (owner, listener) in &mut self.manipulators {
                    if *owner == handle {
                        listener.finish();
                    } else {
                        listener.on_partner_destroyed(&entity, now);
                    }
                }
                for (owner, region) in &mut self.regions {
                    if *owner == handle {
                        region.finish(now);
                    } else {
                        region.on_partner_destroyed(&entity, now);
                    }
                }
            }
        }
        self.routes.retain(|sensor, _| self.physics.sensor_owner(*sensor) != Some(handle));
        self.physics.unregister_body(handle);
        self.handles.destroy(handle);
        self.handles.purge_registry(&mut self.registry);
        self.dispatch();
        true
    }

    // -- routing -------------------------------------------------------------

    fn route(&mut self, signal: &OverlapSignal, now: f64) {
        let Some(route) = self.routes.get(&signal.sensor).copied() else {
            return;
        };
        // Sensor-to-sensor overlaps only count between contact regions.
        let other_sensor = match signal.other_sensor {
            None => None,
            Some(s) => match (route, self.routes.get(&s)) {
                (SensorRoute::ContactRegion(_), Some(SensorRoute::ContactRegion(_))) => Some(s),
                _ => return,
            },
        };
        let Some(other) = self.registry.lookup(signal.other).cloned() else {
            tracing::trace!(other = ?signal.other, "overlap with unannotated object ignored");
            return;
        };
        match (route, signal.phase) {
            (SensorRoute::Manipulator(i), OverlapPhase::Begin) => {
                self.manipulators[i]
                    .1
                    .on_overlap_begin(signal.sensor, other, other_sensor, now);
            }
            (SensorRoute::Manipulator(i), OverlapPhase::End) => {
                self.manipulators[i]
                    .1
                    .on_overlap_end(signal.sensor, &other, other_sensor, now);
            }
            (SensorRoute::ContactRegion(i), OverlapPhase::Begin) => {
                self.regions[i].1.on_overlap_begin(other, other_sensor, now);
            }
            (SensorRoute::ContactRegion(i), OverlapPhase::End) => {
                self.regions[i].1.on_overlap_end(&other, other_sensor, now);
            }
        }
    }

    /// Publish queued detector events: manipulators first, then regions,
    /// each in emission order.
    fn dispatch(&mut self) -> usize {
        let mut events = Vec::new();
        for (_, listener) in &mut self.manipulators {
            events.extend(listener.take_events());
        }
        for (_, region) in &mut self.regions {
            events.extend(region.take_events());
        }
        for event in &events {
            self.publish(event);
        }
        events.len()
    }

    fn publish(&mut self, event: &SemanticEvent) {
        self.bus.publish(event);
        self.journal.record(event);
    }

    // -- accessors -----------------------------------------------------------

    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }

    /// `tick_count * fixed_dt`.
    pub fn sim_time(&self) -> f64 {
        self.tick_counter as f64 * self.config.session.fixed_dt
    }

    pub fn fixed_dt(&self) -> f64 {
        self.config.session.fixed_dt
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn episode_id(&self) -> &str {
        &self.episode_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &SemanticRegistry {
        &self.registry
    }

    pub fn physics(&self) -> &PhysicsWorld {
        &self.physics
    }

    pub fn journal(&self) -> &EventJournal {
        &self.journal
    }

    pub fn manipulator(&self, index: usize) -> Option<&ManipulatorListener> {
        self.manipulators.get(index).map(|(_, l)| l)
    }

    pub fn contact_region(&self, sensor: SensorId) -> Option<&ContactShape> {
        match self.routes.get(&sensor) {
            Some(SensorRoute::ContactRegion(i)) => self.regions.get(*i).map(|(_, r)| r),
            _ => None,
        }
    }

    pub fn init_report(&self) -> &SessionInit {
        &self.init
    }

    /// World-state counters, live while running and final after finish.
    pub fn world_state_stats(&self) -> Option<LoggerStats> {
        self.world_state
            .as_ref()
            .map(WorldStateLogger::stats)
            .or(self.last_world_state)
    }

    /// Block until the in-flight world-state write completes.
    pub fn wait_world_state(&mut self) {
        if let Some(logger) = self.world_state.as_mut() {
            logger.wait_idle(&mut self.registry);
        }
    }

    pub fn last_diagnostics(&self) -> &SessionDiagnostics {
        &self.last_diagnostics
    }
}
