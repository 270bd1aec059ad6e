//! Semlog Engine -- host integration and world-state logging.
//!
//! Ties the detectors of `semlog-events` to a rapier3d simulation and
//! persists world state:
//!
//! - [`physics`]: the rapier3d host world with sensor volumes, rigs and gaze.
//! - [`world_state`]: change-detecting sampler, document model, writers,
//!   document stores and the background writer thread.
//! - [`session`]: the fixed-timestep [`LoggingSession`](session::LoggingSession).
//! - [`config`]: serde-backed [`SessionConfig`](config::SessionConfig).

#![deny(unsafe_code)]

pub mod config;
pub mod physics;
pub mod session;
pub mod world_state;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::config::{ConfigError, SessionConfig};
    pub use crate::physics::{BodyKind, Bone, ColliderShape, PhysicsBody, PhysicsWorld};
    pub use crate::session::{EngineError, FingerSensor, LoggingSession, SessionInit};
    pub use crate::world_state::sampler::GazeSample;
    pub use crate::world_state::{
        DocumentStore, FileStore, MemoryStore, WorldStateDocument, WriterKind,
    };
    pub use semlog_core::prelude::*;
    pub use semlog_events::prelude::*;
}
