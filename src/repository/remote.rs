// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Applying peer broadcasts to the local cache.

use std::sync::Arc;

use tracing::{debug, trace};

use super::types::{Counters, MissKind};
use super::CachedRepository;
use crate::entity::Entity;
use crate::error::Result;

impl<E: Entity> CachedRepository<E> {
    /// Fold an entity broadcast by a peer into the cache.
    ///
    /// Only entities this server already holds, or has marked as context,
    /// are taken; anything else is ignored. A cached value is merged through
    /// [`Entity::merge`]. The result is clean: the peer has persisted it.
    ///
    /// An ignored update still lifts any cooldown on the id, since the entity
    /// now exists in storage.
    pub fn handle_remote_update(&self, entity: E) {
        let id = entity.id().to_string();
        if !self.cache.contains(&id) && !self.access.is_pinned(&id) {
            trace!(repo = %self.name, id = %id, "Ignoring remote update for uncached entity");
            self.cooldowns.remove(&id);
            Counters::bump(&self.counters.remote_updates_ignored);
            crate::metrics::record_remote(&self.name, "update", "ignored");
            return;
        }

        let merged = self.cache.apply_remote(entity);
        self.access.touch(&id);
        self.cooldowns.remove(&id);
        self.notify(&id, Some(merged));

        debug!(repo = %self.name, id = %id, "Applied remote update");
        Counters::bump(&self.counters.remote_updates_applied);
        crate::metrics::record_remote(&self.name, "update", "applied");
    }

    /// Evict an entity a peer deleted.
    ///
    /// The id is treated as known-absent for the cooldown window, so a read
    /// racing the peer's storage delete cannot bring it back.
    pub fn handle_remote_delete(&self, id: &str) {
        self.record_removal(id);
        let removed = self.cache.remove(id).is_some();
        self.access.forget(id);
        self.start_cooldown(id, MissKind::Absent);
        self.notify(id, None);

        debug!(repo = %self.name, id = %id, removed, "Applied remote delete");
        Counters::bump(&self.counters.remote_deletes);
        crate::metrics::record_remote(&self.name, "delete", if removed { "applied" } else { "ignored" });
    }

    /// Route the sync service's handlers into this repository and start it.
    ///
    /// Handlers hold weak references; once the repository is dropped they
    /// become no-ops.
    pub(super) async fn attach_sync(&self) -> Result<()> {
        let Some(sync) = &self.sync else {
            return Ok(());
        };

        let weak = self.self_ref.clone();
        sync.on_update(Arc::new(move |entity: E| {
            if let Some(repo) = weak.upgrade() {
                repo.handle_remote_update(entity);
            }
        }));

        let weak = self.self_ref.clone();
        sync.on_delete(Arc::new(move |id: String| {
            if let Some(repo) = weak.upgrade() {
                repo.handle_remote_delete(&id);
            }
        }));

        sync.start().await
    }

    pub(super) async fn detach_sync(&self) {
        if let Some(sync) = &self.sync {
            sync.stop().await;
        }
    }
}
