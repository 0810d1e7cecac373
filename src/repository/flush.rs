// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write-back and idle eviction.
//!
//! Both cycles take the maintenance lock for their whole snapshot-and-act
//! phase, so an entity is never evicted while it is being saved and two
//! cycles never save the same snapshot.
//!
//! Eviction selects idle ids first and removes each one only if, under its
//! shard lock, it is still idle and unwritten since selection.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use super::types::Counters;
use super::CachedRepository;
use crate::entity::Entity;
use crate::error::{CacheError, Result};
use crate::resilience::retry::retry_if;

impl<E: Entity> CachedRepository<E> {
    /// Persist every dirty entity in one batch, then broadcast each of them.
    ///
    /// Dirty flags are cleared only after storage confirmed the batch, and
    /// only for entities not written again meanwhile. On failure every flag
    /// stays set and the next cycle tries again. Returns how many entities
    /// were written.
    #[tracing::instrument(skip(self), fields(repo = %self.name))]
    pub async fn save_dirty(&self) -> Result<usize> {
        let _guard = self.maintenance.lock().await;
        self.write_back().await
    }

    /// Body of [`save_dirty`](Self::save_dirty); caller holds the maintenance lock.
    async fn write_back(&self) -> Result<usize> {
        let snapshot = self.cache.dirty_snapshot();
        if snapshot.is_empty() {
            return Ok(0);
        }

        let start = Instant::now();
        let entities: Vec<E> = snapshot.iter().map(|d| d.entity.clone()).collect();
        let storage = &self.storage;
        let result = retry_if(
            "write_back",
            &self.retry_config(),
            || storage.save_many(&entities),
            CacheError::is_retryable,
        )
        .await;

        Counters::bump(&self.counters.write_backs);
        crate::metrics::record_flush_duration(&self.name, start.elapsed());

        if let Err(e) = result {
            Counters::bump(&self.counters.write_back_failures);
            crate::metrics::record_write_back(&self.name, entities.len(), false);
            if e.is_serialization() {
                error!(
                    repo = %self.name,
                    count = entities.len(),
                    error = %e,
                    "Write-back cannot encode its batch; entities stay dirty until they change"
                );
            } else {
                warn!(repo = %self.name, count = entities.len(), error = %e, "Write-back failed, entities stay dirty");
            }
            return Err(e);
        }

        let cleared = self.cache.clear_dirty_flags(&snapshot);
        Counters::add(&self.counters.entities_written, entities.len());
        crate::metrics::record_write_back(&self.name, entities.len(), true);
        debug!(
            repo = %self.name,
            written = entities.len(),
            cleared,
            duration_ms = start.elapsed().as_millis() as u64,
            "Write-back complete"
        );

        if let Some(sync) = &self.sync {
            for entity in &entities {
                if let Err(e) = sync.broadcast_update(entity).await {
                    warn!(repo = %self.name, id = %entity.id(), error = %e, "Failed to broadcast update");
                }
            }
        }

        self.update_gauges();
        Ok(entities.len())
    }

    /// Evict entities idle for longer than the entity timeout.
    ///
    /// Context ids are never evicted. Returns how many entities were evicted.
    #[tracing::instrument(skip(self), fields(repo = %self.name))]
    pub async fn cleanup_expired_entities(&self) -> usize {
        let _guard = self.maintenance.lock().await;
        let config = self.config();

        let candidates = self.expired_candidates(config.entity_timeout());
        let evicted = self.evict_selected(&candidates, config.entity_timeout());

        let purged = self.purge_cooldowns(config.load_cooldown());
        self.purge_removals();
        self.prune_observers();

        if evicted > 0 {
            info!(repo = %self.name, evicted, cooldowns_purged = purged, "Evicted idle entities");
            Counters::add(&self.counters.evictions, evicted);
            crate::metrics::record_eviction(&self.name, evicted);
        }
        self.update_gauges();
        evicted
    }

    /// Idle ids with the slot revision they were seen at.
    pub(super) fn expired_candidates(&self, timeout: Duration) -> Vec<(String, u64)> {
        let keys = self.cache.keys();
        self.access
            .select_expired(&keys, Instant::now(), timeout)
            .into_iter()
            .filter_map(|id| self.cache.revision_of(&id).map(|revision| (id, revision)))
            .collect()
    }

    /// Evict the candidates that are still idle and unchanged. Returns the count.
    pub(super) fn evict_selected(&self, candidates: &[(String, u64)], timeout: Duration) -> usize {
        let mut evicted = 0;
        for (id, revision) in candidates {
            let removed = self.cache.remove_if_unchanged(id, *revision, || {
                if !self.access.is_expired(id, Instant::now(), timeout) {
                    return false;
                }
                self.record_removal(id);
                self.access.forget(id);
                true
            });
            let Some((_, dirty)) = removed else {
                trace!(repo = %self.name, id = %id, "Entity used since selection, not evicting");
                continue;
            };
            if dirty {
                warn!(repo = %self.name, id = %id, "Evicted idle entity with unsaved changes");
                crate::metrics::record_error(&self.name, "cleanup", "dirty_eviction");
            }
            self.notify(id, None);
            evicted += 1;
        }
        evicted
    }

    pub(super) fn update_gauges(&self) {
        crate::metrics::set_cache_sizes(
            &self.name,
            self.cache.len(),
            self.cache.dirty_count(),
            self.access.pinned_count(),
        );
    }
}
