//! Semlog Core -- handles, semantic identity, registry and pose math.
//!
//! This crate holds the vocabulary shared by the event detectors
//! (`semlog-events`) and the world-state logger (`semlog-engine`):
//!
//! - [`handle`]: generational [`ObjectHandle`](handle::ObjectHandle)s, the
//!   validity-checked stand-in for weak references to world objects.
//! - [`identity`]: [`SemanticEntity`](identity::SemanticEntity) annotations
//!   and order-independent [`PairId`](identity::PairId)s.
//! - [`registry`]: the injected [`EntityRegistry`](registry::EntityRegistry)
//!   interface and its in-memory implementation.
//! - [`math`]: vectors, quaternions, poses, change thresholds and the
//!   left-to-right-handed frame conversion.
//!
//! # Quick Start
//!
//! ```
//! use semlog_core::prelude::*;
//!
//! let mut handles = HandleTable::new();
//! let mut registry = SemanticRegistry::new();
//! registry.init();
//!
//! let cup = handles.spawn();
//! registry
//!     .register(RegistryEntry::new(SemanticEntity::new(cup, "cup-01", "Cup"), ObjectKind::Actor))
//!     .unwrap();
//!
//! assert_eq!(registry.lookup(cup).unwrap().class, "Cup");
//! ```

#![deny(unsafe_code)]

pub mod handle;
pub mod identity;
pub mod math;
pub mod registry;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced when populating the entity registry.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The object lacks a semantic id or class.
    #[error("object {handle:?} is not semantically annotated (empty id or class)")]
    NotAnnotated { handle: handle::ObjectHandle },

    /// The handle is already registered.
    #[error("object {handle:?} is already registered")]
    DuplicateHandle { handle: handle::ObjectHandle },

    /// Another object already uses this semantic id.
    #[error("semantic id '{id}' is already used by another object")]
    DuplicateId { id: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::handle::{HandleTable, ObjectHandle};
    pub use crate::identity::{Mobility, ObjectKind, PairId, SemanticEntity};
    pub use crate::math::{EntityPose, FrameConversion, PoseThresholds, Quat, Vec3};
    pub use crate::registry::{EntityRegistry, RegistryEntry, SemanticRegistry};
    pub use crate::CoreError;
}
