//! Semlog Events -- debounced semantic events from raw overlap signals.
//!
//! Physics sensors report noisy begin/end overlaps many times per second.
//! This crate turns them into a clean stream of discrete events with true
//! event times and stable relation identities.
//!
//! # Modules
//!
//! - [`debounce`]: the generic begin/end [`Debouncer`](debounce::Debouncer).
//! - [`grasp`]: two-group set-intersection grasp detection.
//! - [`contact`]: per-owner contact tracking and contact region shapes.
//! - [`supported_by`]: polling detector for objects resting on others.
//! - [`manipulator`]: a hand's grasp + contact listener.
//! - [`event`]: event payloads and the subscription-order [`EventBus`](event::EventBus).
//! - [`journal`]: begin/end pairing into finished relation records.
//! - [`timer`], [`lifecycle`]: the cooperative timer and listener states.

#![deny(unsafe_code)]

pub mod contact;
pub mod debounce;
pub mod event;
pub mod grasp;
pub mod journal;
pub mod lifecycle;
pub mod manipulator;
pub mod supported_by;
pub mod timer;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::contact::{ContactShape, ContactShapeConfig, ContactTracker, SensorId};
    pub use crate::debounce::{BeginOutcome, Debounced, Debouncer};
    pub use crate::event::{ContactResult, EventBus, EventKind, SemanticEvent, SubscriptionId};
    pub use crate::grasp::{GraspDetector, OverlapGroup};
    pub use crate::journal::{EventJournal, FinishedEvent, RelationKind};
    pub use crate::lifecycle::Lifecycle;
    pub use crate::manipulator::{ManipulatorConfig, ManipulatorListener};
    pub use crate::supported_by::{BodyMotion, SupportedByConfig, SupportedByDetector};
}
