//! The entity registry: handle -> semantic annotation lookup.
//!
//! Detectors and the world-state sampler never reach for a global; they are
//! handed an [`EntityRegistry`] (usually a [`SemanticRegistry`]) by the
//! session that owns it. The registry has an explicit `init`/`teardown`
//! lifecycle tied to the logging session.

use std::collections::HashMap;

use crate::handle::ObjectHandle;
use crate::identity::{Mobility, ObjectKind, SemanticEntity};
use crate::CoreError;

// ---------------------------------------------------------------------------
// RegistryEntry
// ---------------------------------------------------------------------------

/// Everything the registry knows about one annotated object.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    pub entity: SemanticEntity,
    pub kind: ObjectKind,
    pub mobility: Mobility,
}

impl RegistryEntry {
    pub fn new(entity: SemanticEntity, kind: ObjectKind) -> Self {
        Self {
            entity,
            kind,
            mobility: Mobility::Movable,
        }
    }

    pub fn with_mobility(mut self, mobility: Mobility) -> Self {
        self.mobility = mobility;
        self
    }

    pub fn handle(&self) -> ObjectHandle {
        self.entity.handle
    }
}

// ---------------------------------------------------------------------------
// EntityRegistry
// ---------------------------------------------------------------------------

/// Lookup interface injected into every component that needs semantic data.
pub trait EntityRegistry {
    /// Full entry for `handle`, if annotated.
    fn entry(&self, handle: ObjectHandle) -> Option<&RegistryEntry>;

    /// All entries, in registration order.
    fn entries(&self) -> Vec<&RegistryEntry>;

    /// Forget `handle` (its object was destroyed). Returns the removed entry.
    fn remove(&mut self, handle: ObjectHandle) -> Option<RegistryEntry>;

    /// Semantic annotation of `handle`, if any.
    fn lookup(&self, handle: ObjectHandle) -> Option<&SemanticEntity> {
        self.entry(handle).map(|e| &e.entity)
    }

    /// `true` if `handle` is tagged static.
    fn is_static(&self, handle: ObjectHandle) -> bool {
        self.entry(handle)
            .is_some_and(|e| e.mobility == Mobility::Static)
    }
}

// ---------------------------------------------------------------------------
// SemanticRegistry
// ---------------------------------------------------------------------------

/// In-memory registry with session lifecycle.
///
/// Entries keep their registration order so that tracked lists built from
/// the registry are deterministic.
#[derive(Debug, Default)]
pub struct SemanticRegistry {
    order: Vec<ObjectHandle>,
    entries: HashMap<ObjectHandle, RegistryEntry>,
    initialized: bool,
}

impl SemanticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the registry ready for a session. Idempotent.
    pub fn init(&mut self) {
        if !self.initialized {
            tracing::debug!(entities = self.entries.len(), "entity registry initialized");
            self.initialized = true;
        }
    }

    /// Drop all entries and return to the uninitialized state.
    pub fn teardown(&mut self) {
        self.order.clear();
        self.entries.clear();
        self.initialized = false;
    }

    pub fn is_init(&self) -> bool {
        self.initialized
    }

    /// Annotate a world object.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotAnnotated`] if the id or class is empty,
    /// [`CoreError::DuplicateHandle`] if the handle is already registered,
    /// [`CoreError::DuplicateId`] if another object uses the same id.
    pub fn register(&mut self, entry: RegistryEntry) -> Result<(), CoreError> {
        let handle = entry.handle();
        if !entry.entity.is_set() {
            return Err(CoreError::NotAnnotated { handle });
        }
        if self.entries.contains_key(&handle) {
            return Err(CoreError::DuplicateHandle { handle });
        }
        if self.entries.values().any(|e| e.entity.id == entry.entity.id) {
            return Err(CoreError::DuplicateId {
                id: entry.entity.id.clone(),
            });
        }
        self.order.push(handle);
        self.entries.insert(handle, entry);
        Ok(())
    }

    /// Look an entity up by semantic id.
    pub fn find_by_id(&self, id: &str) -> Option<&SemanticEntity> {
        self.entries
            .values()
            .map(|e| &e.entity)
            .find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl EntityRegistry for SemanticRegistry {
    fn entry(&self, handle: ObjectHandle) -> Option<&RegistryEntry> {
        self.entries.get(&handle)
    }

    fn entries(&self) -> Vec<&RegistryEntry> {
        self.order
            .iter()
            .filter_map(|h| self.entries.get(h))
            .collect()
    }

    fn remove(&mut self, handle: ObjectHandle) -> Option<RegistryEntry> {
        let removed = self.entries.remove(&handle)?;
        self.order.retain(|h| *h != handle);
        tracing::debug!(entity = %removed.entity, "entity removed from registry");
        Some(removed)
    }
}
