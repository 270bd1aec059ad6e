//! Generational handles for simulation objects.
//!
//! An [`ObjectHandle`] is the Rust stand-in for a weak reference to a world
//! object: a slot *index* in the low 32 bits and the slot's *generation* in
//! the high 32 bits. The [`HandleTable`] bumps the generation when the
//! object is destroyed, so old copies fail validation instead of aliasing
//! whatever object reuses the slot.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::registry::EntityRegistry;

// ---------------------------------------------------------------------------
// ObjectHandle
// ---------------------------------------------------------------------------

/// A generational, copyable reference to a simulation object.
///
/// Layout: `[generation: u32 | index: u32]`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectHandle(u64);

impl ObjectHandle {
    /// Construct a handle from a slot index and generation.
    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | index as u64)
    }

    /// The slot index (low 32 bits).
    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    /// The generation (high 32 bits).
    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHandle({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// HandleTable
// ---------------------------------------------------------------------------

/// Slot table for the objects of one simulated world.
///
/// A slot's generation is odd while an object occupies it and even once the
/// object is destroyed, so liveness is read straight off the generation.
/// Vacant slots are reused lowest index first.
///
/// The table is the authority on which objects still exist: after objects
/// are destroyed, [`purge_registry`](Self::purge_registry) drops every
/// registry entry whose handle went stale.
#[derive(Debug, Default)]
pub struct HandleTable {
    generations: Vec<u32>,
    vacant: BTreeSet<u32>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Occupy a slot for a newly spawned object.
    pub fn spawn(&mut self) -> ObjectHandle {
        match self.vacant.pop_first() {
            Some(index) => {
                let generation = &mut self.generations[index as usize];
                *generation = generation.wrapping_add(1);
                ObjectHandle::new(index, *generation)
            }
            None => {
                let index = self.generations.len() as u32;
                self.generations.push(1);
                ObjectHandle::new(index, 1)
            }
        }
    }

    /// Vacate `handle`'s slot. Returns `false` if it was already stale.
    pub fn destroy(&mut self, handle: ObjectHandle) -> bool {
        if !self.is_alive(handle) {
            return false;
        }
        let generation = &mut self.generations[handle.index() as usize];
        *generation = generation.wrapping_add(1);
        self.vacant.insert(handle.index());
        true
    }

    pub fn is_alive(&self, handle: ObjectHandle) -> bool {
        self.generations
            .get(handle.index() as usize)
            .is_some_and(|&g| g % 2 == 1 && g == handle.generation())
    }

    pub fn live_count(&self) -> usize {
        self.generations.len() - self.vacant.len()
    }

    /// Remove registry entries of destroyed objects. Returns their handles
    /// in registration order.
    pub fn purge_registry(&self, registry: &mut dyn EntityRegistry) -> Vec<ObjectHandle> {
        let stale: Vec<ObjectHandle> = registry
            .entries()
            .into_iter()
            .map(|e| e.handle())
            .filter(|h| !self.is_alive(*h))
            .collect();
        for handle in &stale {
            registry.remove(*handle);
            tracing::debug!(%handle, "stale handle purged from registry");
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{ObjectKind, SemanticEntity};
    use crate::registry::{RegistryEntry, SemanticRegistry};

    #[test]
    fn live_handles_have_odd_generations() {
        let mut table = HandleTable::new();
        let handles: Vec<ObjectHandle> = (0..8).map(|_| table.spawn()).collect();
        assert!(handles.iter().all(|h| h.generation() == 1));
        assert_eq!(table.live_count(), 8);
    }

    #[test]
    fn destroyed_slot_is_reused_with_a_new_generation() {
        let mut table = HandleTable::new();
        let a = table.spawn();
        let b = table.spawn();
        assert!(table.destroy(b));
        assert!(table.destroy(a));
        // Lowest vacant index first.
        let c = table.spawn();
        assert_eq!(c.index(), a.index());
        assert_eq!(c.generation(), 3);
        assert!(!table.is_alive(a));
        assert!(table.is_alive(c));
        assert!(!table.destroy(a));
        assert_eq!(table.live_count(), 1);
    }

    #[test]
    fn unknown_or_vacant_handles_are_not_alive() {
        let table = HandleTable::new();
        assert!(!table.is_alive(ObjectHandle::new(3, 1)));
        assert!(!table.is_alive(ObjectHandle::new(0, 0)));
    }

    #[test]
    fn purge_drops_only_destroyed_entries() {
        let mut table = HandleTable::new();
        let mut registry = SemanticRegistry::new();
        let ids = ["cup", "plate", "bowl"];
        let handles: Vec<ObjectHandle> = ids
            .iter()
            .map(|id| {
                let h = table.spawn();
                registry
                    .register(RegistryEntry::new(SemanticEntity::new(h, *id, "Thing"), ObjectKind::Actor))
                    .unwrap();
                h
            })
            .collect();
        registry.init();

        table.destroy(handles[0]);
        table.destroy(handles[2]);
        assert_eq!(table.purge_registry(&mut registry), vec![handles[0], handles[2]]);
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(handles[1]).is_some());
        assert!(table.purge_registry(&mut registry).is_empty());
    }

    #[test]
    fn display_shows_index_and_generation() {
        let h = ObjectHandle::new(42, 7);
        assert_eq!(ObjectHandle::from_raw(h.to_raw()), h);
        assert_eq!(h.to_string(), "42v7");
    }
}
