//! Semantic events and the broadcast bus.
//!
//! Detectors never call consumers directly. They queue [`SemanticEvent`]s in
//! an outbox; the session drains the outboxes after each signal batch and
//! publishes them on an [`EventBus`]. Subscribers therefore run while no
//! detector is borrowed, so a callback cannot reach back into the sets of the
//! component that emitted the event.

use std::fmt;

use semlog_core::identity::{PairId, SemanticEntity};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SemanticEvent
// ---------------------------------------------------------------------------

/// Payload of a begin-contact event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactResult {
    /// The object owning the sensor that saw the contact.
    pub self_entity: SemanticEntity,
    pub other: SemanticEntity,
    pub time: f64,
    /// `true` if the other side is itself a contact region sensor.
    pub is_other_region: bool,
}

/// A discrete, debounced event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SemanticEvent {
    BeginGrasp {
        owner: SemanticEntity,
        object: SemanticEntity,
        time: f64,
        grasp_type: String,
    },
    EndGrasp {
        owner: SemanticEntity,
        object: SemanticEntity,
        time: f64,
    },
    BeginContact(ContactResult),
    EndContact {
        self_entity: SemanticEntity,
        other: SemanticEntity,
        time: f64,
    },
    BeginSupportedBy {
        supported: SemanticEntity,
        supporting: SemanticEntity,
        time: f64,
        pair_id: PairId,
    },
    EndSupportedBy {
        pair_id1: PairId,
        pair_id2: PairId,
        time: f64,
    },
}

impl SemanticEvent {
    /// Event time (true occurrence time, not emission time).
    pub fn time(&self) -> f64 {
        match self {
            SemanticEvent::BeginGrasp { time, .. }
            | SemanticEvent::EndGrasp { time, .. }
            | SemanticEvent::EndContact { time, .. }
            | SemanticEvent::BeginSupportedBy { time, .. }
            | SemanticEvent::EndSupportedBy { time, .. } => *time,
            SemanticEvent::BeginContact(r) => r.time,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            SemanticEvent::BeginGrasp { .. } => EventKind::BeginGrasp,
            SemanticEvent::EndGrasp { .. } => EventKind::EndGrasp,
            SemanticEvent::BeginContact(_) => EventKind::BeginContact,
            SemanticEvent::EndContact { .. } => EventKind::EndContact,
            SemanticEvent::BeginSupportedBy { .. } => EventKind::BeginSupportedBy,
            SemanticEvent::EndSupportedBy { .. } => EventKind::EndSupportedBy,
        }
    }

    pub fn is_begin(&self) -> bool {
        matches!(
            self,
            SemanticEvent::BeginGrasp { .. }
                | SemanticEvent::BeginContact(_)
                | SemanticEvent::BeginSupportedBy { .. }
        )
    }
}

/// Discriminant of [`SemanticEvent`], used for per-kind subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    BeginGrasp,
    EndGrasp,
    BeginContact,
    EndContact,
    BeginSupportedBy,
    EndSupportedBy,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::BeginGrasp => "begin_grasp",
            EventKind::EndGrasp => "end_grasp",
            EventKind::BeginContact => "begin_contact",
            EventKind::EndContact => "end_contact",
            EventKind::BeginSupportedBy => "begin_supported_by",
            EventKind::EndSupportedBy => "end_supported_by",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn FnMut(&SemanticEvent) + Send>;

struct Subscriber {
    id: SubscriptionId,
    filter: Option<EventKind>,
    callback: Callback,
}

/// Observer list with subscription-order dispatch.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Subscriber>,
    next_id: u64,
    published: u64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.len())
            .field("published", &self.published)
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&SemanticEvent) + Send + 'static,
    {
        self.add(None, Box::new(callback))
    }

    /// Receive only events of `kind`.
    pub fn subscribe_kind<F>(&mut self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: FnMut(&SemanticEvent) + Send + 'static,
    {
        self.add(Some(kind), Box::new(callback))
    }

    fn add(&mut self, filter: Option<EventKind>, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push(Subscriber {
            id,
            filter,
            callback,
        });
        id
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    /// Deliver `event` to matching subscribers in subscription order.
    pub fn publish(&mut self, event: &SemanticEvent) {
        self.published += 1;
        let kind = event.kind();
        for sub in &mut self.subscribers {
            if sub.filter.map_or(true, |k| k == kind) {
                (sub.callback)(event);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Total number of events published so far.
    pub fn published(&self) -> u64 {
        self.published
    }
}
