//! Semantic identity of simulation objects.
//!
//! A [`SemanticEntity`] is the unit of event attribution: an object handle
//! annotated with a stable string id and a class label. Entities are owned
//! by the [`EntityRegistry`](crate::registry::EntityRegistry); everything
//! else works with clones, which are cheap to compare because equality is
//! decided on the handle.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::handle::ObjectHandle;

// ---------------------------------------------------------------------------
// SemanticEntity
// ---------------------------------------------------------------------------

/// An object handle plus its semantic annotation.
///
/// `PartialEq`/`Hash` use the handle only (the fast path). Handles are
/// unique per live object, so two entities with the same handle are the same
/// object; [`eq_strict`](Self::eq_strict) additionally compares id and class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticEntity {
    /// The world object this annotation belongs to.
    pub handle: ObjectHandle,
    /// Stable semantic id, unique within a world.
    pub id: String,
    /// Semantic class label, e.g. `"Mug"` or `"LeftHand"`.
    pub class: String,
    /// Hex color used in segmentation masks; empty if unset.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub visual_mask: String,
}

impl SemanticEntity {
    pub fn new(handle: ObjectHandle, id: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            handle,
            id: id.into(),
            class: class.into(),
            visual_mask: String::new(),
        }
    }

    pub fn with_visual_mask(mut self, mask: impl Into<String>) -> Self {
        self.visual_mask = mask.into();
        self
    }

    /// `true` if both the id and the class are non-empty.
    pub fn is_set(&self) -> bool {
        !self.id.is_empty() && !self.class.is_empty()
    }

    pub fn has_visual_mask(&self) -> bool {
        !self.visual_mask.is_empty()
    }

    /// Handle comparison only.
    #[inline]
    pub fn eq_fast(&self, other: &SemanticEntity) -> bool {
        self.handle == other.handle
    }

    /// Handle, id and class comparison.
    pub fn eq_strict(&self, other: &SemanticEntity) -> bool {
        self.handle == other.handle && self.id == other.id && self.class == other.class
    }
}

impl PartialEq for SemanticEntity {
    fn eq(&self, other: &Self) -> bool {
        self.eq_fast(other)
    }
}

impl Eq for SemanticEntity {}

impl Hash for SemanticEntity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.handle.hash(state);
    }
}

impl fmt::Display for SemanticEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]({})", self.class, self.id, self.handle)
    }
}

// ---------------------------------------------------------------------------
// ObjectKind / Mobility
// ---------------------------------------------------------------------------

/// What sort of world object an entity annotates.
///
/// Determines which world-state list (if any) tracks the entity's pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// A top-level object with a transform.
    Actor,
    /// A component attached to an actor, with its own transform.
    SceneComponent,
    /// An actor driven by a skeletal rig.
    SkeletalActor,
    /// A skeletal mesh component (carries bones).
    SkeletalComponent,
    /// Annotated but without a pose (e.g. a logical grouping).
    NoPose,
}

impl ObjectKind {
    pub fn is_skeletal(self) -> bool {
        matches!(self, ObjectKind::SkeletalActor | ObjectKind::SkeletalComponent)
    }
}

/// Mobility tag of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Mobility {
    /// Tagged immutable; never moves during a session.
    Static,
    #[default]
    Movable,
}

// ---------------------------------------------------------------------------
// PairId
// ---------------------------------------------------------------------------

/// Order-independent identifier of a relation between two entities.
///
/// Derived from the two semantic ids only, so begin and end records of a
/// relation can be correlated without holding live object references, and
/// the same pair yields the same id no matter which side computes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairId(pub u64);

impl PairId {
    /// Combine two semantic ids into a pair id.
    pub fn new(a: &str, b: &str) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let mut hasher = blake3::Hasher::new();
        hasher.update(lo.as_bytes());
        // Separator so ("ab", "c") and ("a", "bc") differ.
        hasher.update(&[0u8]);
        hasher.update(hi.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest.as_bytes()[..8]);
        Self(u64::from_le_bytes(bytes))
    }

    /// Pair id of two entities.
    pub fn of(a: &SemanticEntity, b: &SemanticEntity) -> Self {
        Self::new(&a.id, &b.id)
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
