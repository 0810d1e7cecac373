// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory entity map with dirty tracking.
//!
//! Every slot carries the entity, a dirty flag and a revision number. Keeping
//! the flag inside the slot means an id can only be dirty while it is cached,
//! and removing an entity drops its dirty state in the same shard operation.
//!
//! Revisions let the write-back job clear only what it actually persisted: a
//! [`DirtyEntry`] remembers the revision it was snapshotted at, and
//! [`LocalCache::clear_dirty_flags`] leaves a slot dirty when it has been
//! written again since.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::entity::Entity;

#[derive(Debug, Clone)]
struct Slot<E> {
    entity: E,
    dirty: bool,
    revision: u64,
}

/// A dirty entity captured by [`LocalCache::dirty_snapshot`].
#[derive(Debug, Clone)]
pub struct DirtyEntry<E> {
    pub entity: E,
    pub revision: u64,
}

/// Concurrent id → entity map with a per-entry dirty flag.
///
/// All operations are safe to call from many tasks without external locking.
pub struct LocalCache<E: Entity> {
    entries: DashMap<String, Slot<E>>,
    next_revision: AtomicU64,
}

impl<E: Entity> LocalCache<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_revision: AtomicU64::new(1),
        }
    }

    fn revision(&self) -> u64 {
        self.next_revision.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, id: &str) -> Option<E> {
        self.entries.get(id).map(|slot| slot.entity.clone())
    }

    /// Upsert and mark dirty.
    pub fn put(&self, entity: E) {
        let revision = self.revision();
        self.entries.insert(
            entity.id().to_string(),
            Slot { entity, dirty: true, revision },
        );
    }

    /// Upsert an entity that is already durable (freshly loaded).
    pub fn put_clean(&self, entity: E) {
        let revision = self.revision();
        self.entries.insert(
            entity.id().to_string(),
            Slot { entity, dirty: false, revision },
        );
    }

    /// Insert a clean entity only if the id is not cached yet.
    ///
    /// Returns the value now cached, which is the existing one when a writer
    /// got there first.
    pub fn put_clean_if_absent(&self, entity: E) -> E {
        match self.entries.entry(entity.id().to_string()) {
            Entry::Occupied(occupied) => occupied.get().entity.clone(),
            Entry::Vacant(vacant) => {
                let revision = self.revision();
                vacant.insert(Slot { entity: entity.clone(), dirty: false, revision });
                entity
            }
        }
    }

    /// Like [`put_clean_if_absent`](Self::put_clean_if_absent), but `skip`
    /// is consulted under the shard lock before inserting into a vacant slot.
    ///
    /// Returns `None` when the slot was vacant and `skip` said no.
    pub fn put_clean_if_absent_unless<F>(&self, entity: E, skip: F) -> Option<E>
    where
        F: FnOnce() -> bool,
    {
        match self.entries.entry(entity.id().to_string()) {
            Entry::Occupied(occupied) => Some(occupied.get().entity.clone()),
            Entry::Vacant(vacant) => {
                if skip() {
                    return None;
                }
                let revision = self.revision();
                vacant.insert(Slot { entity: entity.clone(), dirty: false, revision });
                Some(entity)
            }
        }
    }

    /// Fold a remotely-originated value into the cache.
    ///
    /// An existing entry is merged via [`Entity::merge`]; otherwise the remote
    /// value is inserted. Either way the slot ends up clean, since the state
    /// already lives in the remote store. Returns the resulting value.
    pub fn apply_remote(&self, remote: E) -> E {
        let revision = self.revision();
        match self.entries.entry(remote.id().to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                slot.entity.merge(remote);
                slot.dirty = false;
                slot.revision = revision;
                slot.entity.clone()
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot { entity: remote.clone(), dirty: false, revision });
                remote
            }
        }
    }

    /// Return the cached entity, or create it with `factory`.
    ///
    /// The factory runs while the shard is locked, so concurrent callers for
    /// the same missing id invoke it at most once. A created entity is dirty.
    pub fn get_or_put<F>(&self, id: &str, factory: F) -> E
    where
        F: FnOnce() -> E,
    {
        match self.entries.entry(id.to_string()) {
            Entry::Occupied(occupied) => occupied.get().entity.clone(),
            Entry::Vacant(vacant) => {
                let entity = factory();
                let revision = self.revision();
                vacant.insert(Slot { entity: entity.clone(), dirty: true, revision });
                entity
            }
        }
    }

    pub fn remove(&self, id: &str) -> Option<E> {
        self.entries.remove(id).map(|(_, slot)| slot.entity)
    }

    /// Remove `id` only if it has not been written since `revision` and
    /// `confirm` agrees. `confirm` runs under the shard lock, so no write to
    /// this id can land between the check and the removal.
    ///
    /// Returns the removed entity and whether it was dirty.
    pub fn remove_if_unchanged<F>(&self, id: &str, revision: u64, confirm: F) -> Option<(E, bool)>
    where
        F: FnOnce() -> bool,
    {
        self.entries
            .remove_if(id, |_, slot| slot.revision == revision && confirm())
            .map(|(_, slot)| (slot.entity, slot.dirty))
    }

    /// Revision of the cached slot, bumped by every write to it.
    pub fn revision_of(&self, id: &str) -> Option<u64> {
        self.entries.get(id).map(|slot| slot.revision)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn all(&self) -> Vec<E> {
        self.entries.iter().map(|r| r.value().entity.clone()).collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Flag a cached entity as changed. No-op (returns `false`) if absent.
    pub fn mark_dirty(&self, id: &str) -> bool {
        match self.entries.get_mut(id) {
            Some(mut slot) => {
                slot.dirty = true;
                slot.revision = self.revision();
                true
            }
            None => false,
        }
    }

    pub fn mark_clean(&self, id: &str) {
        if let Some(mut slot) = self.entries.get_mut(id) {
            slot.dirty = false;
        }
    }

    pub fn is_dirty(&self, id: &str) -> bool {
        self.entries.get(id).is_some_and(|slot| slot.dirty)
    }

    pub fn dirty_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|r| r.value().dirty)
            .map(|r| r.key().clone())
            .collect()
    }

    pub fn dirty_entities(&self) -> Vec<E> {
        self.entries
            .iter()
            .filter(|r| r.value().dirty)
            .map(|r| r.value().entity.clone())
            .collect()
    }

    pub fn dirty_count(&self) -> usize {
        self.entries.iter().filter(|r| r.value().dirty).count()
    }

    /// Capture every dirty entity together with its current revision.
    pub fn dirty_snapshot(&self) -> Vec<DirtyEntry<E>> {
        self.entries
            .iter()
            .filter(|r| r.value().dirty)
            .map(|r| DirtyEntry {
                entity: r.value().entity.clone(),
                revision: r.value().revision,
            })
            .collect()
    }

    /// Clear the dirty flag of every snapshotted entry that has not been
    /// written since. Returns how many flags were cleared.
    pub fn clear_dirty_flags(&self, snapshot: &[DirtyEntry<E>]) -> usize {
        let mut cleared = 0;
        for entry in snapshot {
            if let Some(mut slot) = self.entries.get_mut(entry.entity.id()) {
                if slot.dirty && slot.revision == entry.revision {
                    slot.dirty = false;
                    cleared += 1;
                }
            }
        }
        cleared
    }

    /// Clear every dirty flag unconditionally.
    pub fn clear_all_dirty(&self) {
        for mut slot in self.entries.iter_mut() {
            slot.dirty = false;
        }
    }
}

impl<E: Entity> Default for LocalCache<E> {
    fn default() -> Self {
        Self::new()
    }
}
