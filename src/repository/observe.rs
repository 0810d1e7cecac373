// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Read-only change streams over the cache.
//!
//! Both streams are `tokio::sync::watch` channels: a receiver always sees the
//! latest value and writers never wait on slow readers.

use dashmap::DashMap;
use tokio::sync::watch;

use super::CachedRepository;
use crate::entity::Entity;

pub(super) struct Observers<E> {
    by_id: DashMap<String, watch::Sender<Option<E>>>,
    all: watch::Sender<Vec<E>>,
}

impl<E: Entity> Observers<E> {
    pub(super) fn new() -> Self {
        let (all, _) = watch::channel(Vec::new());
        Self {
            by_id: DashMap::new(),
            all,
        }
    }
}

impl<E: Entity> CachedRepository<E> {
    /// Follow one entity.
    ///
    /// The receiver starts at the current cached value (`None` if not cached)
    /// and sees every later save, load, remote update, delete and eviction.
    /// Observing does not load the entity.
    pub fn observe(&self, id: &str) -> watch::Receiver<Option<E>> {
        let current = self.cache.get(id);
        let sender = self
            .observers
            .by_id
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(None).0);
        sender.send_replace(current);
        sender.subscribe()
    }

    /// Follow the full list of cached entities, republished on every change.
    pub fn observe_all(&self) -> watch::Receiver<Vec<E>> {
        self.observers.all.send_replace(self.cache.all());
        self.observers.all.subscribe()
    }

    /// Publish a change of `id` to its observers and to list observers.
    pub(super) fn notify(&self, id: &str, value: Option<E>) {
        let mut abandoned = false;
        if let Some(sender) = self.observers.by_id.get(id) {
            if sender.receiver_count() == 0 {
                abandoned = true;
            } else {
                sender.send_replace(value);
            }
        }
        if abandoned {
            self.observers
                .by_id
                .remove_if(id, |_, sender| sender.receiver_count() == 0);
        }

        if self.observers.all.receiver_count() > 0 {
            self.observers.all.send_replace(self.cache.all());
        }
    }

    /// Drop per-id channels nobody listens to any more.
    pub(super) fn prune_observers(&self) {
        self.observers
            .by_id
            .retain(|_, sender| sender.receiver_count() > 0);
    }

    #[cfg(test)]
    pub(super) fn observed_ids(&self) -> usize {
        self.observers.by_id.len()
    }
}
