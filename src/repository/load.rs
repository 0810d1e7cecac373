// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache-miss loading: single-flight and the negative-load cooldown.
//!
//! ```text
//! miss ─► cooldown? ──yes──► Suppressed
//!            │no
//!            ▼
//!     in_flight[id] ──exists──► join the pending load
//!            │vacant
//!            ▼
//!     register cell ─► storage.load (with retry) ─► populate cache / start cooldown
//!                                                      │
//!                                   remove in_flight[id] (only our own cell)
//! ```
//!
//! The cell's initializer updates the cache before any waiter wakes, so a
//! caller arriving after the entry is removed finds the entity cached.
//!
//! Every local removal (delete, remote delete, eviction) records a sequence
//! number for its id before the slot goes. A load notes the sequence when it
//! starts and drops its result if the id was removed since.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use super::types::{Cooldown, Counters, Lookup, MissKind};
use super::CachedRepository;
use crate::entity::Entity;
use crate::error::{CacheError, Result};
use crate::resilience::retry::retry_if;

impl<E: Entity> CachedRepository<E> {
    /// Resolve a cache miss.
    pub(super) async fn lookup(&self, id: &str) -> Result<Lookup<E>> {
        if let Some(kind) = self.cooldown(id, self.config().load_cooldown()) {
            trace!(repo = %self.name, id = %id, ?kind, "Load suppressed by cooldown");
            Counters::bump(&self.counters.loads_suppressed);
            crate::metrics::record_load_suppressed(&self.name);
            return Ok(Lookup::Suppressed(kind));
        }
        self.load_shared(id).await
    }

    /// Load `id` through the single-flight registry, ignoring any cooldown.
    pub(super) async fn load_shared(&self, id: &str) -> Result<Lookup<E>> {
        let (cell, leader) = match self.in_flight.entry(id.to_string()) {
            Entry::Occupied(pending) => (Arc::clone(pending.get()), false),
            Entry::Vacant(vacant) => {
                let cell = Arc::new(OnceCell::new());
                vacant.insert(Arc::clone(&cell));
                (cell, true)
            }
        };
        if !leader {
            trace!(repo = %self.name, id = %id, "Joining in-flight load");
            Counters::bump(&self.counters.load_joins);
            crate::metrics::record_load_joined(&self.name);
        }

        let result = cell.get_or_init(|| self.load_from_storage(id)).await.clone();
        self.in_flight.remove_if(id, |_, current| Arc::ptr_eq(current, &cell));

        result.map(|loaded| match loaded {
            Some(entity) => Lookup::Found(entity),
            None => Lookup::Absent,
        })
    }

    /// The single storage load behind one in-flight cell.
    async fn load_from_storage(&self, id: &str) -> Result<Option<E>> {
        let _timer = crate::metrics::LatencyTimer::new(&self.name, "load");
        Counters::bump(&self.counters.loads);
        let mark = self.begin_load();

        let storage = &self.storage;
        let loaded = retry_if(
            "load",
            &self.retry_config(),
            || storage.load(id),
            CacheError::is_retryable,
        )
        .await;

        match loaded {
            Ok(Some(entity)) => {
                crate::metrics::record_load(&self.name, "found");
                Ok(self.adopt_loaded(id, entity, &mark))
            }
            Ok(None) => {
                debug!(repo = %self.name, id = %id, "Entity not in storage");
                crate::metrics::record_load(&self.name, "absent");
                self.start_cooldown(id, MissKind::Absent);
                Ok(None)
            }
            Err(e) => {
                Counters::bump(&self.counters.load_failures);
                crate::metrics::record_load(&self.name, "error");
                self.start_cooldown(id, MissKind::Failed);
                self.log_storage_error("load", &e);
                Err(e)
            }
        }
    }

    /// Cache a freshly loaded entity as clean and announce it.
    ///
    /// A local write that raced the load wins; its value is returned instead.
    /// Returns `None` without caching if `id` was removed after `mark`.
    pub(super) fn adopt_loaded(&self, id: &str, entity: E, mark: &LoadMark<'_>) -> Option<E> {
        let Some(cached) = self
            .cache
            .put_clean_if_absent_unless(entity, || self.removed_since(id, mark))
        else {
            debug!(repo = %self.name, id = %id, "Dropping load result, entity removed meanwhile");
            return None;
        };
        self.access.touch(id);
        self.cooldowns.remove(id);
        self.notify(id, Some(cached.clone()));
        Some(cached)
    }

    /// Note the removal sequence before reading from storage.
    pub(super) fn begin_load(&self) -> LoadMark<'_> {
        self.loads_active.fetch_add(1, Ordering::SeqCst);
        LoadMark {
            seq: self.removal_seq.load(Ordering::SeqCst),
            active: &self.loads_active,
        }
    }

    /// Record that `id` is leaving the cache. Call before removing the slot.
    pub(super) fn record_removal(&self, id: &str) {
        let seq = self.removal_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.removals.insert(id.to_string(), seq);
    }

    fn removed_since(&self, id: &str, mark: &LoadMark<'_>) -> bool {
        self.removals.get(id).is_some_and(|seq| *seq > mark.seq)
    }

    /// Forget removal records no running load can still observe.
    pub(super) fn purge_removals(&self) -> usize {
        let floor = self.removal_seq.load(Ordering::SeqCst);
        if self.loads_active.load(Ordering::SeqCst) > 0 {
            return 0;
        }
        let before = self.removals.len();
        self.removals.retain(|_, seq| *seq > floor);
        before.saturating_sub(self.removals.len())
    }

    /// Active cooldown for `id`, if any. Expired entries are dropped.
    pub(super) fn cooldown(&self, id: &str, window: Duration) -> Option<MissKind> {
        let entry = self.cooldowns.get(id).map(|c| *c)?;
        if entry.at.elapsed() < window {
            return Some(entry.kind);
        }
        self.cooldowns.remove_if(id, |_, c| c.at.elapsed() >= window);
        None
    }

    pub(super) fn start_cooldown(&self, id: &str, kind: MissKind) {
        self.cooldowns.insert(
            id.to_string(),
            Cooldown {
                at: Instant::now(),
                kind,
            },
        );
    }

    /// Drop cooldown entries older than `window`. Returns how many went.
    pub(super) fn purge_cooldowns(&self, window: Duration) -> usize {
        let before = self.cooldowns.len();
        self.cooldowns.retain(|_, c| c.at.elapsed() < window);
        before.saturating_sub(self.cooldowns.len())
    }
}

/// A storage read in progress; see [`CachedRepository::begin_load`].
pub(super) struct LoadMark<'a> {
    seq: u64,
    active: &'a std::sync::atomic::AtomicUsize,
}

impl Drop for LoadMark<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::RepoConfig;
    use crate::storage::Storage;
    use std::sync::atomic::Ordering;

    fn repo_over(storage: Arc<StubStorage>, cooldown_ms: u64) -> Arc<CachedRepository<Player>> {
        let config = RepoConfig {
            retry_base_delay_ms: 1,
            load_cooldown_ms: cooldown_ms,
            ..RepoConfig::new("players")
        };
        CachedRepository::new(config, storage).unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_gets_share_one_load() {
        let storage = Arc::new(StubStorage::with_load_delay(Duration::from_millis(50)));
        storage.inner.save(&player("x", 11)).await.unwrap();
        let repo = repo_over(storage.clone(), 60_000);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move { repo.get("x").await }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), Some(player("x", 11)));
        }
        assert_eq!(storage.loads.load(Ordering::SeqCst), 1);
        assert_eq!(repo.stats().load_joins, 9);
        assert_eq!(repo.stats().loads_in_flight, 0);
    }

    #[tokio::test]
    async fn test_concurrent_failures_share_one_error() {
        let storage = Arc::new(StubStorage::with_load_delay(Duration::from_millis(20)));
        storage.fail_always.store(true, Ordering::SeqCst);
        let repo = repo_over(storage.clone(), 60_000);

        let (a, b) = tokio::join!(repo.get("y"), repo.get("y"));

        assert!(a.is_err());
        assert_eq!(a, b);
        // One load group, retried three times.
        assert_eq!(storage.loads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_cooldown_always_queries_storage() {
        let storage = Arc::new(StubStorage::default());
        let repo = repo_over(storage.clone(), 0);

        repo.get("nobody").await.unwrap();
        repo.get("nobody").await.unwrap();

        assert_eq!(storage.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cooldown_expires() {
        let storage = Arc::new(StubStorage::default());
        let repo = repo_over(storage.clone(), 30);

        repo.get("late").await.unwrap();
        storage.inner.save(&player("late", 1)).await.unwrap();
        assert_eq!(repo.get("late").await.unwrap(), None);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(repo.get("late").await.unwrap(), Some(player("late", 1)));
    }

    #[tokio::test]
    async fn test_save_clears_cooldown() {
        let storage = Arc::new(StubStorage::default());
        let repo = repo_over(storage, 60_000);

        repo.get("p").await.unwrap();
        assert!(repo.cooldown("p", Duration::from_secs(60)).is_some());

        repo.save(player("p", 1)).unwrap();
        assert!(repo.cooldown("p", Duration::from_secs(60)).is_none());
    }

    #[tokio::test]
    async fn test_delete_during_load_is_not_undone() {
        let storage = Arc::new(StubStorage::with_load_delay(Duration::from_millis(50)));
        storage.inner.save(&player("q", 7)).await.unwrap();
        let repo = repo_over(storage.clone(), 60_000);

        let reader = {
            let repo = repo.clone();
            tokio::spawn(async move { repo.get("q").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        repo.delete("q").await.unwrap();

        assert_eq!(reader.await.unwrap().unwrap(), None);
        assert!(!repo.is_cached("q"));
        assert_eq!(repo.get("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remote_delete_during_load_is_not_undone() {
        let storage = Arc::new(StubStorage::with_load_delay(Duration::from_millis(50)));
        storage.inner.save(&player("r", 7)).await.unwrap();
        let repo = repo_over(storage.clone(), 60_000);

        let reader = {
            let repo = repo.clone();
            tokio::spawn(async move { repo.get("r").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        repo.handle_remote_delete("r");

        assert_eq!(reader.await.unwrap().unwrap(), None);
        assert!(!repo.is_cached("r"));
    }

    #[tokio::test]
    async fn test_removal_records_outlive_running_loads_only() {
        let repo = repo_over(Arc::new(StubStorage::default()), 60_000);

        let mark = repo.begin_load();
        repo.record_removal("a");
        assert!(repo.removed_since("a", &mark));
        assert!(!repo.removed_since("b", &mark));
        assert_eq!(repo.purge_removals(), 0);

        drop(mark);
        assert_eq!(repo.purge_removals(), 1);
        assert!(repo.removals.is_empty());
    }

    #[tokio::test]
    async fn test_purge_cooldowns() {
        let repo = repo_over(Arc::new(StubStorage::default()), 60_000);
        repo.start_cooldown("a", MissKind::Absent);
        repo.start_cooldown("b", MissKind::Failed);

        assert_eq!(repo.purge_cooldowns(Duration::from_secs(60)), 0);
        assert_eq!(repo.purge_cooldowns(Duration::ZERO), 2);
    }
}
