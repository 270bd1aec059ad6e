//! rapier3d host world: bodies, sensor volumes, rigs and gaze.
//!
//! The [`PhysicsWorld`] stands in for the simulation the logger observes.
//! It owns a rapier3d simulation keyed by generational
//! [`ObjectHandle`]s and reports raw sensor overlaps as [`OverlapSignal`]s.
//! Each step:
//!
//! 1. rapier steps the simulation with the session's fixed dt.
//! 2. Sensor intersection start/stop events are collected through a
//!    crossbeam channel and mapped back to object handles and sensor ids.
//! 3. Signals are sorted for deterministic ordering.
//!
//! Pose and velocity queries ([`PoseSource`], [`BodyMotion`]) read straight
//! from rapier; skeletal bones are rigid offsets composed onto the body
//! pose.
//!
//! # Determinism
//!
//! rapier3d is compiled with `enhanced-determinism`. With a fixed timestep
//! and sorted signal delivery, identical inputs give identical signal
//! sequences on the same platform.

use std::collections::HashMap;

use rapier3d::na::{Quaternion, UnitQuaternion};
use rapier3d::prelude::*;
use semlog_core::handle::ObjectHandle;
use semlog_core::math::{EntityPose, Quat, Vec3};
use semlog_events::contact::SensorId;
use semlog_events::supported_by::BodyMotion;

use crate::world_state::sampler::{BonePose, GazeSample, PoseSource};

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// How rapier treats a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BodyKind {
    /// Fully simulated (a cup that can fall).
    Dynamic,
    /// Moved by the host through [`PhysicsWorld::set_kinematic_pose`] (a hand).
    Kinematic,
    /// Immovable (a table, a wall).
    Static,
}

/// Collider geometry, in simulation units.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ColliderShape {
    Box { hx: f64, hy: f64, hz: f64 },
    Ball { radius: f64 },
}

impl ColliderShape {
    fn to_shared(self) -> SharedShape {
        match self {
            ColliderShape::Box { hx, hy, hz } => {
                SharedShape::cuboid(hx as Real, hy as Real, hz as Real)
            }
            ColliderShape::Ball { radius } => SharedShape::ball(radius as Real),
        }
    }
}

/// Body descriptor for [`PhysicsWorld::register_body`].
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PhysicsBody {
    pub kind: BodyKind,
    pub shape: ColliderShape,
    pub friction: f64,
    pub restitution: f64,
}

impl PhysicsBody {
    pub fn new(kind: BodyKind, shape: ColliderShape) -> Self {
        Self {
            kind,
            shape,
            friction: 0.7,
            restitution: 0.0,
        }
    }
}

/// A rigid bone of a skeletal rig, posed relative to the rig's body.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bone {
    pub name: String,
    pub local: EntityPose,
}

// ---------------------------------------------------------------------------
// OverlapSignal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OverlapPhase {
    Begin,
    End,
}

/// A raw sensor overlap change reported by a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlapSignal {
    pub sensor: SensorId,
    pub sensor_owner: ObjectHandle,
    pub other: ObjectHandle,
    /// Set when the other collider is itself a sensor.
    pub other_sensor: Option<SensorId>,
    pub phase: OverlapPhase,
}

#[derive(Debug, Clone, Copy)]
struct ColliderTag {
    owner: ObjectHandle,
    sensor: Option<SensorId>,
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

fn to_isometry(pose: &EntityPose) -> Isometry<Real> {
    let l = pose.location;
    let q = pose.orientation;
    let rotation = UnitQuaternion::from_quaternion(Quaternion::new(
        q.w as Real,
        q.x as Real,
        q.y as Real,
        q.z as Real,
    ));
    Isometry::from_parts(vector![l.x as Real, l.y as Real, l.z as Real].into(), rotation)
}

fn from_isometry(iso: &Isometry<Real>) -> EntityPose {
    let t = iso.translation.vector;
    let c = iso.rotation.quaternion().coords;
    EntityPose::new(
        Vec3::new(t.x as f64, t.y as f64, t.z as f64),
        Quat::new(c[0] as f64, c[1] as f64, c[2] as f64, c[3] as f64),
    )
}

fn to_vector(v: Vec3) -> Vector<Real> {
    vector![v.x as Real, v.y as Real, v.z as Real]
}

// ---------------------------------------------------------------------------
// PhysicsWorld
// ---------------------------------------------------------------------------

/// Simulation lengths are centimetres.
const LENGTH_UNIT: Real = 100.0;

pub struct PhysicsWorld {
    pipeline: PhysicsPipeline,
    gravity: Vector<Real>,
    integration_params: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    rigid_body_set: RigidBodySet,
    collider_set: ColliderSet,
    impulse_joint_set: ImpulseJointSet,
    multibody_joint_set: MultibodyJointSet,
    ccd_solver: CCDSolver,
    bodies: HashMap<ObjectHandle, RigidBodyHandle>,
    colliders: HashMap<ColliderHandle, ColliderTag>,
    sensors: HashMap<SensorId, ColliderHandle>,
    rigs: HashMap<ObjectHandle, Vec<Bone>>,
    gaze: Option<GazeSample>,
}

impl std::fmt::Debug for PhysicsWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicsWorld")
            .field("bodies", &self.bodies.len())
            .field("sensors", &self.sensors.len())
            .field("rigs", &self.rigs.len())
            .finish()
    }
}

impl PhysicsWorld {
    /// Create a world with the given gravity (simulation units / s^2).
    pub fn new(gravity: Vec3) -> Self {
        Self {
            pipeline: PhysicsPipeline::new(),
            gravity: to_vector(gravity),
            integration_params: IntegrationParameters {
                length_unit: LENGTH_UNIT,
                ..IntegrationParameters::default()
            },
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            bodies: HashMap::new(),
            colliders: HashMap::new(),
            sensors: HashMap::new(),
            rigs: HashMap::new(),
            gaze: None,
        }
    }

    /// Earth gravity along -z in centimetres.
    pub fn with_earth_gravity() -> Self {
        Self::new(Vec3::new(0.0, 0.0, -981.0))
    }

    /// Add a body for `handle`. Returns `false` if it already exists.
    pub fn register_body(
        &mut self,
        handle: ObjectHandle,
        pose: EntityPose,
        velocity: Vec3,
        body: &PhysicsBody,
    ) -> bool {
        if self.bodies.contains_key(&handle) {
            return false;
        }
        let iso = to_isometry(&pose);
        let rb = match body.kind {
            BodyKind::Dynamic => RigidBodyBuilder::dynamic()
                .position(iso)
                .linvel(to_vector(velocity))
                .build(),
            BodyKind::Kinematic => RigidBodyBuilder::kinematic_position_based()
                .position(iso)
                .build(),
            BodyKind::Static => RigidBodyBuilder::fixed().position(iso).build(),
        };
        let body_handle = self.rigid_body_set.insert(rb);
        self.bodies.insert(handle, body_handle);

        let collider = ColliderBuilder::new(body.shape.to_shared())
            .friction(body.friction as Real)
            .restitution(body.restitution as Real)
            .build();
        let collider_handle =
            self.collider_set
                .insert_with_parent(collider, body_handle, &mut self.rigid_body_set);
        self.colliders.insert(
            collider_handle,
            ColliderTag {
                owner: handle,
                sensor: None,
            },
        );
        true
    }

    /// Attach a sensor volume to `owner`'s body at a local `offset`.
    ///
    /// Returns `false` if `owner` has no body or `sensor` is already in use.
    pub fn add_sensor(
        &mut self,
        owner: ObjectHandle,
        sensor: SensorId,
        shape: ColliderShape,
        offset: Vec3,
    ) -> bool {
        let Some(&body_handle) = self.bodies.get(&owner) else {
            tracing::warn!(?owner, %sensor, "sensor owner has no physics body");
            return false;
        };
        if self.sensors.contains_key(&sensor) {
            tracing::warn!(%sensor, "sensor id already in use");
            return false;
        }
        let collider = ColliderBuilder::new(shape.to_shared())
            .translation(to_vector(offset))
            .sensor(true)
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .active_collision_types(ActiveCollisionTypes::all())
            .build();
        let collider_handle =
            self.collider_set
                .insert_with_parent(collider, body_handle, &mut self.rigid_body_set);
        self.colliders.insert(
            collider_handle,
            ColliderTag {
                owner,
                sensor: Some(sensor),
            },
        );
        self.sensors.insert(sensor, collider_handle);
        true
    }

    /// Remove `handle`'s body, colliders, sensors and rig.
    ///
    /// Overlaps involving the removed colliders are not reported as ends;
    /// the caller announces the destruction to the detectors itself.
    pub fn unregister_body(&mut self, handle: ObjectHandle) -> bool {
        let Some(body_handle) = self.bodies.remove(&handle) else {
            return false;
        };
        self.rigid_body_set.remove(
            body_handle,
            &mut self.island_manager,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            true,
        );
        self.colliders.retain(|_, tag| tag.owner != handle);
        self.sensors
            .retain(|_, ch| self.collider_set.get(*ch).is_some());
        self.rigs.remove(&handle);
        if self
            .gaze
            .as_ref()
            .is_some_and(|g| g.target_entity == Some(handle))
        {
            self.gaze = None;
        }
        true
    }

    /// Move a kinematic body to `pose` during the next step.
    pub fn set_kinematic_pose(&mut self, handle: ObjectHandle, pose: EntityPose) {
        if let Some(rb) = self
            .bodies
            .get(&handle)
            .and_then(|bh| self.rigid_body_set.get_mut(*bh))
        {
            if rb.is_kinematic() {
                rb.set_next_kinematic_position(to_isometry(&pose));
            } else {
                rb.set_position(to_isometry(&pose), true);
            }
        }
    }

    /// Overwrite the linear velocity of a dynamic body.
    pub fn set_linear_velocity(&mut self, handle: ObjectHandle, velocity: Vec3) {
        if let Some(rb) = self
            .bodies
            .get(&handle)
            .and_then(|bh| self.rigid_body_set.get_mut(*bh))
        {
            rb.set_linvel(to_vector(velocity), true);
        }
    }

    /// Give `handle` a skeletal rig of rigid bones.
    pub fn attach_rig(&mut self, handle: ObjectHandle, bones: Vec<Bone>) -> bool {
        if !self.bodies.contains_key(&handle) {
            return false;
        }
        self.rigs.insert(handle, bones);
        true
    }

    /// Set (or clear) the singleton gaze sample.
    pub fn set_gaze(&mut self, gaze: Option<GazeSample>) {
        self.gaze = gaze;
    }

    /// Step the simulation and return sensor overlap changes.
    pub fn step(&mut self, dt: f64) -> Vec<OverlapSignal> {
        self.integration_params.dt = dt as Real;

        let (collision_send, collision_recv) =
            rapier3d::crossbeam::channel::unbounded::<CollisionEvent>();
        let (force_send, _force_recv) =
            rapier3d::crossbeam::channel::unbounded::<ContactForceEvent>();
        let event_handler = ChannelEventCollector::new(collision_send, force_send);

        self.pipeline.step(
            &self.gravity,
            &self.integration_params,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            None,
            &(),
            &event_handler,
        );

        let mut signals = Vec::new();
        while let Ok(event) = collision_recv.try_recv() {
            if event.removed() {
                continue;
            }
            let (h1, h2, phase) = match event {
                CollisionEvent::Started(h1, h2, _) => (h1, h2, OverlapPhase::Begin),
                CollisionEvent::Stopped(h1, h2, _) => (h1, h2, OverlapPhase::End),
            };
            let (Some(a), Some(b)) = (
                self.colliders.get(&h1).copied(),
                self.colliders.get(&h2).copied(),
            ) else {
                continue;
            };
            if a.owner == b.owner {
                continue;
            }
            for (me, other) in [(a, b), (b, a)] {
                if let Some(sensor) = me.sensor {
                    signals.push(OverlapSignal {
                        sensor,
                        sensor_owner: me.owner,
                        other: other.owner,
                        other_sensor: other.sensor,
                        phase,
                    });
                }
            }
        }

        // Channel delivery order is not specified; sort for determinism.
        signals.sort_by_key(|s| (s.phase, s.sensor, s.other.to_raw(), s.other_sensor));
        signals
    }

    /// Objects currently intersecting `sensor`, for replaying initial
    /// overlaps when a listener starts.
    pub fn current_overlaps(&self, sensor: SensorId) -> Vec<(ObjectHandle, Option<SensorId>)> {
        let Some(&ch) = self.sensors.get(&sensor) else {
            return Vec::new();
        };
        let Some(me) = self.colliders.get(&ch) else {
            return Vec::new();
        };
        let mut out: Vec<(ObjectHandle, Option<SensorId>)> = self
            .narrow_phase
            .intersection_pairs_with(ch)
            .filter(|(_, _, intersecting)| *intersecting)
            .filter_map(|(c1, c2, _)| {
                let other = if c1 == ch { c2 } else { c1 };
                self.colliders.get(&other).copied()
            })
            .filter(|tag| tag.owner != me.owner)
            .map(|tag| (tag.owner, tag.sensor))
            .collect();
        out.sort_by_key(|(h, s)| (h.to_raw(), *s));
        out
    }

    pub fn has_body(&self, handle: ObjectHandle) -> bool {
        self.bodies.contains_key(&handle)
    }

    pub fn body_count(&self) -> usize {
        self.rigid_body_set.len()
    }

    pub fn sensor_owner(&self, sensor: SensorId) -> Option<ObjectHandle> {
        let ch = self.sensors.get(&sensor)?;
        self.colliders.get(ch).map(|t| t.owner)
    }

    fn body(&self, handle: ObjectHandle) -> Option<&RigidBody> {
        self.bodies
            .get(&handle)
            .and_then(|bh| self.rigid_body_set.get(*bh))
    }
}

impl PoseSource for PhysicsWorld {
    fn pose(&self, handle: ObjectHandle) -> Option<EntityPose> {
        self.body(handle).map(|rb| from_isometry(rb.position()))
    }

    fn bone_poses(&self, handle: ObjectHandle) -> Option<Vec<BonePose>> {
        let root = self.pose(handle)?;
        let bones = self.rigs.get(&handle)?;
        Some(
            bones
                .iter()
                .map(|b| BonePose {
                    name: b.name.clone(),
                    pose: root.compose(&b.local),
                })
                .collect(),
        )
    }

    fn gaze(&self) -> Option<GazeSample> {
        self.gaze.clone()
    }
}

impl BodyMotion for PhysicsWorld {
    fn location(&self, handle: ObjectHandle) -> Option<Vec3> {
        self.pose(handle).map(|p| p.location)
    }

    fn linear_velocity(&self, handle: ObjectHandle) -> Option<Vec3> {
        self.body(handle).map(|rb| {
            let v = rb.linvel();
            Vec3::new(v.x as f64, v.y as f64, v.z as f64)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
