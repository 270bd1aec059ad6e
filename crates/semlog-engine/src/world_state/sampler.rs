//! Change-detecting world-state sampler.
//!
//! The sampler tracks three ordered lists of entities (plain actors, scene
//! components, skeletal rigs) built once from the registry. A sample pass is
//! split in three so that the expensive part can run off the simulation
//! thread:
//!
//! 1. [`capture`](WorldStateSampler::capture) reads current poses from the
//!    host ([`PoseSource`]) into a [`SampleFrame`]. Simulation thread.
//! 2. [`apply`](WorldStateSampler::apply) drops stale entries, compares the
//!    frame against the last *recorded* poses and builds the document.
//!    Worker thread.
//! 3. [`commit`](WorldStateSampler::commit) records the written poses. Only
//!    called once the write succeeded, so a failed write is retried on the
//!    next pass.

use std::collections::HashMap;

use semlog_core::handle::ObjectHandle;
use semlog_core::identity::{ObjectKind, SemanticEntity};
use semlog_core::math::{EntityPose, FrameConversion, PoseThresholds, Vec3};
use semlog_core::registry::EntityRegistry;

use super::document::{
    BoneRecord, EntityRecord, GazeRecord, SkelEntityRecord, WorldStateDocument,
};

// ---------------------------------------------------------------------------
// Host interface
// ---------------------------------------------------------------------------

/// World pose of one bone of a rig.
#[derive(Debug, Clone, PartialEq)]
pub struct BonePose {
    pub name: String,
    pub pose: EntityPose,
}

/// The singleton gaze ray in simulation coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct GazeSample {
    /// Object the ray hits, if any.
    pub target_entity: Option<ObjectHandle>,
    pub origin: Vec3,
    pub target: Vec3,
}

/// Per-tick transform queries answered by the host simulation.
///
/// `None` from [`pose`](Self::pose) means the object no longer exists.
pub trait PoseSource {
    fn pose(&self, handle: ObjectHandle) -> Option<EntityPose>;
    fn bone_poses(&self, handle: ObjectHandle) -> Option<Vec<BonePose>>;
    fn gaze(&self) -> Option<GazeSample>;
}

// ---------------------------------------------------------------------------
// Tracked entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedPoseEntity {
    pub handle: ObjectHandle,
    pub entity: SemanticEntity,
    /// Last pose written to storage.
    pub previous_pose: EntityPose,
}

impl TrackedPoseEntity {
    pub fn new(entity: SemanticEntity) -> Self {
        Self {
            handle: entity.handle,
            entity,
            previous_pose: EntityPose::UNLOGGED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackedList {
    Actors,
    Components,
    Skeletal,
}

/// Gaze state in simulation coordinates, resolved to an entity id.
#[derive(Debug, Clone, PartialEq)]
pub struct GazeSnapshot {
    pub entity_id: String,
    pub origin: Vec3,
    pub target: Vec3,
}

impl GazeSnapshot {
    fn equals(&self, other: &GazeSnapshot, tolerance: f64) -> bool {
        self.entity_id == other.entity_id
            && self.origin.equals(other.origin, tolerance)
            && self.target.equals(other.target, tolerance)
    }
}

// ---------------------------------------------------------------------------
// Frame / pass
// ---------------------------------------------------------------------------

/// Poses read from the host at one instant.
#[derive(Debug, Clone, Default)]
pub struct SampleFrame {
    pub time: f64,
    actors: Vec<(ObjectHandle, Option<EntityPose>)>,
    components: Vec<(ObjectHandle, Option<EntityPose>)>,
    skeletal: Vec<(ObjectHandle, Option<(EntityPose, Vec<BonePose>)>)>,
    gaze: Option<GazeSnapshot>,
}

/// Poses to record once the document has been stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingCommit {
    updates: HashMap<ObjectHandle, EntityPose>,
    gaze: Option<GazeSnapshot>,
}

impl PendingCommit {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.gaze.is_none()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }
}

/// Output of [`WorldStateSampler::apply`].
#[derive(Debug, Clone, Default)]
pub struct SamplePass {
    /// `None` only when nothing is tracked. A still world yields a
    /// document with no entity records.
    pub document: Option<WorldStateDocument>,
    /// Handles whose objects disappeared; the registry should forget them.
    pub removed: Vec<ObjectHandle>,
    pub commit: PendingCommit,
}

// ---------------------------------------------------------------------------
// WorldStateSampler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WorldStateSampler {
    thresholds: PoseThresholds,
    conversion: FrameConversion,
    gaze_tolerance: f64,
    actors: Vec<TrackedPoseEntity>,
    components: Vec<TrackedPoseEntity>,
    skeletal: Vec<TrackedPoseEntity>,
    previous_gaze: Option<GazeSnapshot>,
}

impl WorldStateSampler {
    pub fn new(thresholds: PoseThresholds, conversion: FrameConversion, gaze_tolerance: f64) -> Self {
        Self {
            thresholds,
            conversion,
            gaze_tolerance,
            actors: Vec::new(),
            components: Vec::new(),
            skeletal: Vec::new(),
            previous_gaze: None,
        }
    }

    /// Build the tracked lists from every registry entry with a pose, in
    /// registration order. Skeletal objects go only to the skeletal list.
    pub fn from_registry(
        registry: &dyn EntityRegistry,
        thresholds: PoseThresholds,
        conversion: FrameConversion,
        gaze_tolerance: f64,
    ) -> Self {
        let mut sampler = Self::new(thresholds, conversion, gaze_tolerance);
        for entry in registry.entries() {
            let tracked = TrackedPoseEntity::new(entry.entity.clone());
            match entry.kind {
                ObjectKind::Actor => sampler.actors.push(tracked),
                ObjectKind::SceneComponent => sampler.components.push(tracked),
                ObjectKind::SkeletalActor | ObjectKind::SkeletalComponent => {
                    sampler.skeletal.push(tracked)
                }
                ObjectKind::NoPose => {}
            }
        }
        tracing::debug!(
            actors = sampler.actors.len(),
            components = sampler.components.len(),
            skeletal = sampler.skeletal.len(),
            "world state sampler tracking entities"
        );
        sampler
    }

    /// Stop tracking entities tagged static. Skeletal entries are kept.
    pub fn remove_static_items(&mut self, registry: &dyn EntityRegistry) -> usize {
        let before = self.actors.len() + self.components.len();
        self.actors.retain(|t| !registry.is_static(t.handle));
        self.components.retain(|t| !registry.is_static(t.handle));
        let removed = before - self.actors.len() - self.components.len();
        tracing::debug!(removed, "static items removed from world state tracking");
        removed
    }

    /// Read current poses and gaze from the host.
    pub fn capture(
        &self,
        time: f64,
        source: &dyn PoseSource,
        registry: &dyn EntityRegistry,
    ) -> SampleFrame {
        let read = |list: &[TrackedPoseEntity]| {
            list.iter()
                .map(|t| (t.handle, source.pose(t.handle)))
                .collect::<Vec<_>>()
        };
        let skeletal = self
            .skeletal
            .iter()
            .map(|t| {
                let posed = source
                    .pose(t.handle)
                    .map(|p| (p, source.bone_poses(t.handle).unwrap_or_default()));
                (t.handle, posed)
            })
            .collect();
        let gaze = source.gaze().map(|g| GazeSnapshot {
            entity_id: g
                .target_entity
                .and_then(|h| registry.lookup(h))
                .map(|e| e.id.clone())
                .unwrap_or_default(),
            origin: g.origin,
            target: g.target,
        });
        SampleFrame {
            time,
            actors: read(&self.actors),
            components: read(&self.components),
            skeletal,
            gaze,
        }
    }

    /// Compare `frame` against the recorded poses and build the document.
    ///
    /// Every pass with at least one tracked entity produces a document,
    /// listing only the entities that moved past the thresholds. Stale
    /// entries are dropped here. Recorded poses are left untouched until
    /// [`commit`](Self::commit).
    pub fn apply(&mut self, frame: &SampleFrame) -> SamplePass {
        let mut pass = SamplePass::default();
        let removed = &mut pass.removed;
        let stale = |posed: bool, handle: ObjectHandle, removed: &mut Vec<ObjectHandle>| {
            if !posed {
                removed.push(handle);
            }
            posed
        };

        self.actors.retain(|t| {
            let posed = frame_pose(&frame.actors, t.handle).is_some();
            stale(posed, t.handle, removed)
        });
        self.components.retain(|t| {
            let posed = frame_pose(&frame.components, t.handle).is_some();
            stale(posed, t.handle, removed)
        });
        self.skeletal.retain(|t| {
            let posed = frame
                .skeletal
                .iter()
                .any(|(h, p)| *h == t.handle && p.is_some());
            stale(posed, t.handle, removed)
        });
        for handle in &pass.removed {
            tracing::debug!(?handle, "tracked entity no longer exists");
        }

        if self.tracked_count() == 0 {
            return pass;
        }

        let mut entities = Vec::new();
        for (list, poses) in [(&self.actors, &frame.actors), (&self.components, &frame.components)] {
            for tracked in list {
                let Some(current) = frame_pose(poses, tracked.handle) else {
                    continue;
                };
                if self.thresholds.exceeded(&tracked.previous_pose, &current) {
                    pass.commit.updates.insert(tracked.handle, current);
                    entities.push(EntityRecord {
                        id: tracked.entity.id.clone(),
                        loc: self.conversion.vector(current.location),
                        rot: self.conversion.quat(current.orientation),
                    });
                }
            }
        }

        let skel_entities = if self.skeletal.is_empty() {
            None
        } else {
            let mut records = Vec::new();
            for tracked in &self.skeletal {
                let Some((current, bones)) = frame
                    .skeletal
                    .iter()
                    .find(|(h, _)| *h == tracked.handle)
                    .and_then(|(_, p)| p.as_ref())
                else {
                    continue;
                };
                if self.thresholds.exceeded(&tracked.previous_pose, current) {
                    pass.commit.updates.insert(tracked.handle, *current);
                    records.push(SkelEntityRecord {
                        id: tracked.entity.id.clone(),
                        loc: self.conversion.vector(current.location),
                        rot: self.conversion.quat(current.orientation),
                        bones: bones
                            .iter()
                            .map(|b| BoneRecord {
                                name: b.name.clone(),
                                loc: self.conversion.vector(b.pose.location),
                                rot: self.conversion.quat(b.pose.orientation),
                            })
                            .collect(),
                    });
                }
            }
            Some(records)
        };

        let gaze = frame.gaze.as_ref().filter(|g| {
            self.previous_gaze
                .as_ref()
                .map_or(true, |prev| !g.equals(prev, self.gaze_tolerance))
        });
        pass.commit.gaze = gaze.cloned();

        pass.document = Some(WorldStateDocument {
            timestamp: frame.time,
            entities,
            skel_entities,
            gaze: gaze.map(|g| GazeRecord {
                entity_id: g.entity_id.clone(),
                target: self.conversion.vector(g.target),
                origin: self.conversion.vector(g.origin),
            }),
        });
        pass
    }

    /// Record the poses of a successfully written document.
    pub fn commit(&mut self, pending: PendingCommit) {
        if !pending.updates.is_empty() {
            for tracked in self
                .actors
                .iter_mut()
                .chain(self.components.iter_mut())
                .chain(self.skeletal.iter_mut())
            {
                if let Some(pose) = pending.updates.get(&tracked.handle) {
                    tracked.previous_pose = *pose;
                }
            }
        }
        if pending.gaze.is_some() {
            self.previous_gaze = pending.gaze;
        }
    }

    pub fn tracked(&self, list: TrackedList) -> &[TrackedPoseEntity] {
        match list {
            TrackedList::Actors => &self.actors,
            TrackedList::Components => &self.components,
            TrackedList::Skeletal => &self.skeletal,
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.actors.len() + self.components.len() + self.skeletal.len()
    }

    pub fn thresholds(&self) -> PoseThresholds {
        self.thresholds
    }

    pub fn previous_gaze(&self) -> Option<&GazeSnapshot> {
        self.previous_gaze.as_ref()
    }
}

fn frame_pose(poses: &[(ObjectHandle, Option<EntityPose>)], handle: ObjectHandle) -> Option<EntityPose> {
    poses
        .iter()
        .find(|(h, _)| *h == handle)
        .and_then(|(_, p)| *p)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use semlog_core::identity::Mobility;
    use semlog_core::math::Quat;
    use semlog_core::registry::{RegistryEntry, SemanticRegistry};

    #[derive(Default)]
    struct FakeSource {
        poses: HashMap<ObjectHandle, EntityPose>,
        bones: HashMap<ObjectHandle, Vec<BonePose>>,
        gaze: Option<GazeSample>,
    }

    impl PoseSource for FakeSource {
        fn pose(&self, handle: ObjectHandle) -> Option<EntityPose> {
            self.poses.get(&handle).copied()
        }
        fn bone_poses(&self, handle: ObjectHandle) -> Option<Vec<BonePose>> {
            self.bones.get(&handle).cloned()
        }
        fn gaze(&self) -> Option<GazeSample> {
            self.gaze.clone()
        }
    }

    fn h(i: u32) -> ObjectHandle {
        ObjectHandle::new(i, 0)
    }

    fn registry(kinds: &[(u32, ObjectKind, Mobility)]) -> SemanticRegistry {
        let mut r = SemanticRegistry::new();
        for (i, kind, mobility) in kinds {
            r.register(
                RegistryEntry::new(SemanticEntity::new(h(*i), format!("e{i}"), "Thing"), *kind)
                    .with_mobility(*mobility),
            )
            .unwrap();
        }
        r.init();
        r
    }

    fn sampler(r: &SemanticRegistry) -> WorldStateSampler {
        WorldStateSampler::from_registry(
            r,
            PoseThresholds::new(0.5, 0.1),
            FrameConversion { unit_scale: 1.0 },
            3.0,
        )
    }

    fn sample(s: &mut WorldStateSampler, time: f64, src: &FakeSource, r: &SemanticRegistry) -> SamplePass {
        let frame = s.capture(time, src, r);
        let pass = s.apply(&frame);
        s.commit(pass.commit.clone());
        pass
    }

    #[test]
    fn partitions_by_kind() {
        let r = registry(&[
            (0, ObjectKind::Actor, Mobility::Movable),
            (1, ObjectKind::SceneComponent, Mobility::Movable),
            (2, ObjectKind::SkeletalComponent, Mobility::Movable),
            (3, ObjectKind::SkeletalActor, Mobility::Movable),
            (4, ObjectKind::NoPose, Mobility::Movable),
        ]);
        let s = sampler(&r);
        assert_eq!(s.tracked(TrackedList::Actors).len(), 1);
        assert_eq!(s.tracked(TrackedList::Components).len(), 1);
        assert_eq!(s.tracked(TrackedList::Skeletal).len(), 2);
        assert!(s
            .tracked(TrackedList::Actors)
            .iter()
            .all(|t| t.previous_pose == EntityPose::UNLOGGED));
    }

    #[test]
    fn static_removal_spares_skeletal() {
        let r = registry(&[
            (0, ObjectKind::Actor, Mobility::Static),
            (1, ObjectKind::Actor, Mobility::Movable),
            (2, ObjectKind::SkeletalComponent, Mobility::Static),
        ]);
        let mut s = sampler(&r);
        assert_eq!(s.remove_static_items(&r), 1);
        assert_eq!(s.tracked(TrackedList::Actors).len(), 1);
        assert_eq!(s.tracked(TrackedList::Skeletal).len(), 1);
    }

    #[test]
    fn first_sample_writes_everything_then_only_movers() {
        let r = registry(&[
            (0, ObjectKind::Actor, Mobility::Movable),
            (1, ObjectKind::Actor, Mobility::Movable),
        ]);
        let mut s = sampler(&r);
        let mut src = FakeSource::default();
        src.poses.insert(h(0), EntityPose::at(Vec3::new(0.0, 0.0, 0.0)));
        src.poses.insert(h(1), EntityPose::at(Vec3::new(5.0, 0.0, 0.0)));

        let doc = sample(&mut s, 0.0, &src, &r).document.unwrap();
        assert_eq!(doc.entities.len(), 2);
        assert!(doc.skel_entities.is_none());

        // 0.4^2 is below the squared threshold 0.25.
        src.poses.insert(h(0), EntityPose::at(Vec3::new(0.4, 0.0, 0.0)));
        let pass = sample(&mut s, 0.1, &src, &r);
        assert!(pass.commit.is_empty());
        let doc = pass.document.unwrap();
        assert_eq!(doc.timestamp, 0.1);
        assert!(doc.entities.is_empty());

        src.poses.insert(h(0), EntityPose::at(Vec3::new(0.6, 0.0, 0.0)));
        let doc = sample(&mut s, 0.2, &src, &r).document.unwrap();
        assert_eq!(doc.timestamp, 0.2);
        assert_eq!(doc.entities.len(), 1);
        assert_eq!(doc.entities[0].id, "e0");
    }

    #[test]
    fn rotation_alone_triggers_a_write() {
        let r = registry(&[(0, ObjectKind::Actor, Mobility::Movable)]);
        let mut s = sampler(&r);
        let mut src = FakeSource::default();
        src.poses.insert(h(0), EntityPose::default());
        sample(&mut s, 0.0, &src, &r);
        src.poses.insert(
            h(0),
            EntityPose::new(Vec3::ZERO, Quat::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), 0.3)),
        );
        assert!(sample(&mut s, 0.1, &src, &r).document.is_some());
    }

    #[test]
    fn uncommitted_pass_is_retried() {
        let r = registry(&[(0, ObjectKind::Actor, Mobility::Movable)]);
        let mut s = sampler(&r);
        let mut src = FakeSource::default();
        src.poses.insert(h(0), EntityPose::default());
        let frame = s.capture(0.0, &src, &r);
        let pass = s.apply(&frame);
        assert!(pass.document.is_some());
        // Write failed: nothing committed, so the next pass writes again.
        let frame = s.capture(0.1, &src, &r);
        assert_eq!(s.apply(&frame).document.unwrap().entities.len(), 1);
    }

    #[test]
    fn still_world_is_sampled_every_time() {
        let r = registry(&[
            (0, ObjectKind::Actor, Mobility::Movable),
            (1, ObjectKind::SkeletalComponent, Mobility::Movable),
        ]);
        let mut s = sampler(&r);
        let mut src = FakeSource::default();
        src.poses.insert(h(0), EntityPose::default());
        src.poses.insert(h(1), EntityPose::at(Vec3::new(0.0, 3.0, 0.0)));
        src.bones.insert(h(1), Vec::new());
        sample(&mut s, 0.0, &src, &r);

        for (i, time) in [0.1, 0.2, 0.3].into_iter().enumerate() {
            let pass = sample(&mut s, time, &src, &r);
            let doc = pass.document.unwrap_or_else(|| panic!("no document at sample {i}"));
            assert_eq!(doc.timestamp, time);
            assert!(doc.entities.is_empty());
            assert_eq!(doc.skel_entities, Some(Vec::new()));
            assert!(pass.commit.is_empty());
        }
    }

    #[test]
    fn stale_entries_are_removed_and_reported() {
        let r = registry(&[
            (0, ObjectKind::Actor, Mobility::Movable),
            (1, ObjectKind::SkeletalComponent, Mobility::Movable),
        ]);
        let mut s = sampler(&r);
        let src = FakeSource::default();
        let pass = sample(&mut s, 0.0, &src, &r);
        assert_eq!(pass.removed, vec![h(0), h(1)]);
        assert!(pass.document.is_none());
        assert_eq!(s.tracked_count(), 0);
    }

    #[test]
    fn skeletal_entities_carry_all_bones() {
        let r = registry(&[
            (0, ObjectKind::Actor, Mobility::Movable),
            (1, ObjectKind::SkeletalComponent, Mobility::Movable),
        ]);
        let mut s = sampler(&r);
        let mut src = FakeSource::default();
        src.poses.insert(h(0), EntityPose::default());
        src.poses.insert(h(1), EntityPose::at(Vec3::new(0.0, 3.0, 0.0)));
        src.bones.insert(
            h(1),
            vec![
                BonePose {
                    name: "thumb".into(),
                    pose: EntityPose::at(Vec3::new(0.0, 3.0, 1.0)),
                },
                BonePose {
                    name: "index".into(),
                    pose: EntityPose::at(Vec3::new(0.0, 3.0, 2.0)),
                },
            ],
        );
        let doc = sample(&mut s, 0.0, &src, &r).document.unwrap();
        let skel = doc.skel_entities.unwrap();
        assert_eq!(skel.len(), 1);
        assert_eq!(skel[0].bones.len(), 2);
        // Right-handed conversion flips y.
        assert_eq!(skel[0].loc, Vec3::new(0.0, -3.0, 0.0));

        // Only the actor moves: skeletal list present but empty.
        src.poses.insert(h(0), EntityPose::at(Vec3::new(9.0, 0.0, 0.0)));
        let doc = sample(&mut s, 0.1, &src, &r).document.unwrap();
        assert_eq!(doc.skel_entities, Some(Vec::new()));
    }

    #[test]
    fn gaze_written_only_when_changed() {
        let r = registry(&[(0, ObjectKind::Actor, Mobility::Movable)]);
        let mut s = sampler(&r);
        let mut src = FakeSource::default();
        src.poses.insert(h(0), EntityPose::default());
        src.gaze = Some(GazeSample {
            target_entity: Some(h(0)),
            origin: Vec3::ZERO,
            target: Vec3::new(10.0, 0.0, 0.0),
        });
        let doc = sample(&mut s, 0.0, &src, &r).document.unwrap();
        assert_eq!(doc.gaze.unwrap().entity_id, "e0");

        // Within tolerance and nothing moved: an empty document.
        src.gaze.as_mut().unwrap().target = Vec3::new(11.0, 0.0, 0.0);
        let doc = sample(&mut s, 0.1, &src, &r).document.unwrap();
        assert!(doc.entities.is_empty());
        assert!(doc.gaze.is_none());

        src.gaze.as_mut().unwrap().target = Vec3::new(20.0, 0.0, 0.0);
        let doc = sample(&mut s, 0.2, &src, &r).document.unwrap();
        assert!(doc.entities.is_empty());
        assert!(doc.gaze.is_some());
    }

    #[test]
    fn empty_registry_produces_nothing() {
        let r = registry(&[]);
        let mut s = sampler(&r);
        let mut src = FakeSource::default();
        src.gaze = Some(GazeSample {
            target_entity: None,
            origin: Vec3::ZERO,
            target: Vec3::ZERO,
        });
        assert!(sample(&mut s, 0.0, &src, &r).document.is_none());
    }
}
