// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The cached repository.
//!
//! [`CachedRepository`] ties together the pieces of one entity type:
//! - [`LocalCache`] holding every entity this server touched, with dirty flags
//! - a [`Storage`] backend, written to by the periodic write-back job
//! - an optional [`SyncService`] that broadcasts saved entities and deletes to
//!   peers and feeds their broadcasts back into the cache
//!
//! Reads and writes hit the local cache synchronously. Durability is deferred:
//! `save` only marks the entity dirty and the write-back job persists it.
//!
//! # Lifecycle
//!
//! ```text
//! Created → Loading → Running → ShuttingDown → Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde::{Deserialize, Serialize};
//! use shard_cache::{CachedRepository, Entity, MemoryStorage, RepoConfig};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Farm { id: String, crops: u32 }
//!
//! impl Entity for Farm {
//!     fn id(&self) -> &str { &self.id }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> shard_cache::Result<()> {
//! let repo = CachedRepository::new(RepoConfig::new("farms"), Arc::new(MemoryStorage::<Farm>::new()))?;
//! repo.init().await?;
//!
//! let farm = repo.get_or_create("farm.7", || Farm { id: "farm.7".into(), crops: 0 }).await?;
//! repo.save(Farm { crops: farm.crops + 1, ..farm })?;
//!
//! repo.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod flush;
mod lifecycle;
mod load;
mod observe;
mod remote;
mod types;

pub use types::{RepoState, RepoStats};

use std::sync::atomic::{AtomicU64, AtomicUsize};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::cache::{AccessTracker, LocalCache};
use crate::config::RepoConfig;
use crate::entity::Entity;
use crate::error::{CacheError, Result};
use crate::resilience::retry::{retry_if, RetryConfig};
use crate::storage::Storage;
use crate::sync::SyncService;

use observe::Observers;
use types::{Cooldown, Counters, Lookup, MissKind};

/// Result slot shared by every caller waiting on the same load.
type LoadCell<E> = Arc<OnceCell<Result<Option<E>>>>;

/// Write-back cache of one entity type, shared across servers.
///
/// Always handled through an `Arc`; background jobs and sync handlers hold
/// weak references so dropping the last `Arc` ends them.
pub struct CachedRepository<E: Entity> {
    pub(super) name: String,
    pub(super) config: RwLock<Arc<RepoConfig>>,

    pub(super) cache: LocalCache<E>,
    pub(super) access: AccessTracker,
    pub(super) storage: Arc<dyn Storage<E>>,
    pub(super) sync: Option<Arc<dyn SyncService<E>>>,

    /// Single-flight registry: one pending load per id
    pub(super) in_flight: DashMap<String, LoadCell<E>>,
    /// Negative-load cooldown: recent empty or failed loads
    pub(super) cooldowns: DashMap<String, Cooldown>,
    /// Removal sequence per id, checked before caching a load result
    pub(super) removals: DashMap<String, u64>,
    pub(super) removal_seq: AtomicU64,
    pub(super) loads_active: AtomicUsize,

    /// Serializes write-back and cleanup cycles
    pub(super) maintenance: tokio::sync::Mutex<()>,
    pub(super) jobs: Mutex<Vec<JoinHandle<()>>>,

    pub(super) state: watch::Sender<RepoState>,
    pub(super) observers: Observers<E>,
    pub(super) counters: Counters,

    pub(super) self_ref: Weak<Self>,
}

impl<E: Entity> CachedRepository<E> {
    /// Build a repository without cross-server sync.
    ///
    /// The repository starts in `Created`: reads and writes work immediately,
    /// but nothing is written back until [`init()`](Self::init) starts the jobs.
    pub fn new(config: RepoConfig, storage: Arc<dyn Storage<E>>) -> Result<Arc<Self>> {
        Self::build(config, storage, None)
    }

    /// Build a repository that shares updates with peers through `sync`.
    pub fn with_sync(
        config: RepoConfig,
        storage: Arc<dyn Storage<E>>,
        sync: Arc<dyn SyncService<E>>,
    ) -> Result<Arc<Self>> {
        Self::build(config, storage, Some(sync))
    }

    fn build(
        config: RepoConfig,
        storage: Arc<dyn Storage<E>>,
        sync: Option<Arc<dyn SyncService<E>>>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let (state, _) = watch::channel(RepoState::Created);

        Ok(Arc::new_cyclic(|self_ref| Self {
            name: config.name.clone(),
            config: RwLock::new(Arc::new(config)),
            cache: LocalCache::new(),
            access: AccessTracker::new(),
            storage,
            sync,
            in_flight: DashMap::new(),
            cooldowns: DashMap::new(),
            removals: DashMap::new(),
            removal_seq: AtomicU64::new(0),
            loads_active: AtomicUsize::new(0),
            maintenance: tokio::sync::Mutex::new(()),
            jobs: Mutex::new(Vec::new()),
            state,
            observers: Observers::new(),
            counters: Counters::default(),
            self_ref: self_ref.clone(),
        }))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current configuration. Replaced wholesale by [`reconfigure`](Self::reconfigure).
    #[must_use]
    pub fn config(&self) -> Arc<RepoConfig> {
        self.config.read().clone()
    }

    #[must_use]
    pub fn state(&self) -> RepoState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<RepoState> {
        self.state.subscribe()
    }

    /// Writes are taken until shutdown begins.
    fn accepting_writes(&self) -> bool {
        !matches!(self.state(), RepoState::ShuttingDown | RepoState::Stopped)
    }

    pub(super) fn set_state(&self, state: RepoState) {
        self.state.send_replace(state);
        crate::metrics::set_repo_state(&self.name, &state.to_string());
    }

    /// Move to `to` if the current state passes `from`, as one step.
    ///
    /// On refusal the state is left alone and returned.
    pub(super) fn claim_state<F>(&self, to: RepoState, from: F) -> std::result::Result<(), RepoState>
    where
        F: FnOnce(RepoState) -> bool,
    {
        let mut refused = None;
        let claimed = self.state.send_if_modified(|state| {
            if from(*state) {
                *state = to;
                true
            } else {
                refused = Some(*state);
                false
            }
        });
        if claimed {
            crate::metrics::set_repo_state(&self.name, &to.to_string());
            return Ok(());
        }
        Err(refused.unwrap_or(to))
    }

    #[must_use]
    pub fn stats(&self) -> RepoStats {
        let mut stats = RepoStats {
            cached: self.cache.len(),
            dirty: self.cache.dirty_count(),
            contexts: self.access.pinned_count(),
            loads_in_flight: self.in_flight.len(),
            ..RepoStats::default()
        };
        self.counters.fill(&mut stats);
        stats
    }

    pub(super) fn retry_config(&self) -> RetryConfig {
        RetryConfig::for_repo(&self.config())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════════════

    /// Get an entity, loading it from storage on a cache miss.
    ///
    /// `Ok(None)` means storage has no such entity, or a recent load for this
    /// id came back empty or failed and the cooldown is still running.
    #[tracing::instrument(skip(self), fields(repo = %self.name))]
    pub async fn get(&self, id: &str) -> Result<Option<E>> {
        if let Some(entity) = self.cached(id) {
            return Ok(Some(entity));
        }
        match self.lookup(id).await? {
            Lookup::Found(entity) => Ok(Some(entity)),
            Lookup::Absent | Lookup::Suppressed(_) => Ok(None),
        }
    }

    /// Get an entity, creating it with `factory` on a confirmed miss.
    ///
    /// The created entity is saved (cached and marked dirty). Concurrent
    /// callers for the same missing id run the factory at most once. A
    /// cooldown from an empty load does not count as confirmation: storage is
    /// asked again, since a peer may have created the entity meanwhile. If
    /// the last load of `id` failed and the cooldown is running, nothing is
    /// created and [`CacheError::LoadSuppressed`] is returned.
    #[tracing::instrument(skip(self, factory), fields(repo = %self.name))]
    pub async fn get_or_create<F>(&self, id: &str, factory: F) -> Result<E>
    where
        F: FnOnce() -> E,
    {
        if let Some(entity) = self.cached(id) {
            return Ok(entity);
        }

        let lookup = match self.lookup(id).await? {
            Lookup::Suppressed(MissKind::Absent) => self.load_shared(id).await?,
            other => other,
        };
        match lookup {
            Lookup::Found(entity) => Ok(entity),
            Lookup::Suppressed(_) => Err(CacheError::LoadSuppressed { id: id.to_string() }),
            Lookup::Absent => {
                if !self.accepting_writes() {
                    return Err(CacheError::ShuttingDown);
                }
                let mut created = false;
                let entity = self.cache.get_or_put(id, || {
                    created = true;
                    factory()
                });

                if created {
                    if entity.id() != id {
                        self.cache.remove(id);
                        error!(id = %id, created = %entity.id(), "Factory returned an entity with a different id");
                        return Err(CacheError::Config(format!(
                            "factory for '{}' produced entity '{}'",
                            id,
                            entity.id()
                        )));
                    }
                    debug!(id = %id, "Entity created");
                    self.after_write(id, &entity);
                    crate::metrics::record_operation(&self.name, "create", "success");
                } else {
                    self.access.touch(id);
                }
                Ok(entity)
            }
        }
    }

    /// Get several entities; ids not found anywhere are left out.
    ///
    /// Misses go to storage in one batched load. Ids under cooldown are
    /// skipped. This path bypasses single-flight.
    #[tracing::instrument(skip(self, ids), fields(repo = %self.name, count = ids.len()))]
    pub async fn get_many(&self, ids: &[String]) -> Result<Vec<E>> {
        let mut found = Vec::with_capacity(ids.len());
        let mut misses = Vec::new();
        let window = self.config().load_cooldown();

        for id in ids {
            if let Some(entity) = self.cached(id) {
                found.push(entity);
            } else if self.cooldown(id, window).is_some() {
                Counters::bump(&self.counters.loads_suppressed);
                crate::metrics::record_load_suppressed(&self.name);
            } else {
                misses.push(id.clone());
            }
        }
        if misses.is_empty() {
            return Ok(found);
        }

        let mark = self.begin_load();
        let storage = &self.storage;
        let loaded = retry_if(
            "load_many",
            &self.retry_config(),
            || storage.load_many(&misses),
            CacheError::is_retryable,
        )
        .await;

        match loaded {
            Ok(entities) => {
                Counters::add(&self.counters.loads, misses.len());
                for entity in entities {
                    let id = entity.id().to_string();
                    found.extend(self.adopt_loaded(&id, entity, &mark));
                }
                for id in &misses {
                    if !self.cache.contains(id) {
                        self.start_cooldown(id, MissKind::Absent);
                    }
                }
                Ok(found)
            }
            Err(e) => {
                Counters::bump(&self.counters.load_failures);
                for id in &misses {
                    self.start_cooldown(id, MissKind::Failed);
                }
                self.log_storage_error("load_many", &e);
                Err(e)
            }
        }
    }

    /// Whether the entity exists in the cache or in storage.
    pub async fn exists(&self, id: &str) -> Result<bool> {
        if self.cache.contains(id) {
            return Ok(true);
        }
        self.storage.exists(id).await
    }

    /// Snapshot of every cached entity.
    #[must_use]
    pub fn all(&self) -> Vec<E> {
        self.cache.all()
    }

    /// Whether `id` is currently cached.
    #[must_use]
    pub fn is_cached(&self, id: &str) -> bool {
        self.cache.contains(id)
    }

    #[must_use]
    pub fn is_dirty(&self, id: &str) -> bool {
        self.cache.is_dirty(id)
    }

    /// Cache hit: touch and return.
    fn cached(&self, id: &str) -> Option<E> {
        let hit = self.cache.get(id);
        crate::metrics::record_cache_lookup(&self.name, hit.is_some());
        if hit.is_some() {
            self.access.touch(id);
        }
        hit
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Writes
    // ═══════════════════════════════════════════════════════════════════════════

    /// Write an entity to the cache and mark it dirty.
    ///
    /// Visible to `get` immediately; persisted and broadcast by the next
    /// write-back cycle. Fails once shutdown has begun: the final write-back
    /// may already have taken its snapshot.
    pub fn save(&self, entity: E) -> Result<()> {
        if !self.accepting_writes() {
            return Err(CacheError::ShuttingDown);
        }
        let id = entity.id().to_string();
        self.cache.put(entity.clone());
        self.after_write(&id, &entity);
        crate::metrics::record_operation(&self.name, "save", "success");
        Ok(())
    }

    /// Bookkeeping after a local write landed in the cache.
    fn after_write(&self, id: &str, entity: &E) {
        self.access.touch(id);
        self.cooldowns.remove(id);
        self.notify(id, Some(entity.clone()));
    }

    /// Remove an entity here, in storage and on every peer.
    ///
    /// The local view changes immediately and observers see `None` whatever
    /// happens next. The storage delete is retried; peers are told only once
    /// it succeeded. The delete waits for a running write-back cycle so that
    /// cycle cannot write the entity back afterwards.
    #[tracing::instrument(skip(self), fields(repo = %self.name))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        let _timer = crate::metrics::LatencyTimer::new(&self.name, "delete");

        self.record_removal(id);
        self.cache.remove(id);
        self.access.forget(id);
        self.start_cooldown(id, MissKind::Absent);
        self.notify(id, None);

        let result = {
            let _guard = self.maintenance.lock().await;
            let storage = &self.storage;
            retry_if(
                "delete",
                &self.retry_config(),
                || storage.delete(id),
                CacheError::is_retryable,
            )
            .await
        };

        if let Err(e) = result {
            self.log_storage_error("delete", &e);
            crate::metrics::record_operation(&self.name, "delete", "error");
            return Err(e);
        }

        if let Some(sync) = &self.sync {
            if let Err(e) = sync.broadcast_delete(id).await {
                warn!(id = %id, error = %e, "Failed to broadcast delete");
            }
        }
        crate::metrics::record_operation(&self.name, "delete", "success");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Contexts
    // ═══════════════════════════════════════════════════════════════════════════

    /// Mark `id` as active. Active entities are never evicted.
    ///
    /// If the entity is not cached yet a background load warms the cache.
    /// Returns `false` if the id was already a context.
    pub fn add_context(&self, id: &str) -> bool {
        if !self.access.pin(id) {
            return false;
        }
        if !self.cache.contains(id) {
            self.spawn_warm_load(id);
        }
        true
    }

    pub fn remove_context(&self, id: &str) -> bool {
        self.access.unpin(id)
    }

    #[must_use]
    pub fn get_contexts(&self) -> Vec<String> {
        self.access.pinned()
    }

    #[must_use]
    pub fn is_context(&self, id: &str) -> bool {
        self.access.is_pinned(id)
    }

    fn spawn_warm_load(&self, id: &str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(id = %id, "No runtime, skipping context warm-up");
            return;
        };
        let weak = self.self_ref.clone();
        let id = id.to_string();
        runtime.spawn(async move {
            let Some(repo) = weak.upgrade() else { return };
            if let Err(e) = repo.get(&id).await {
                debug!(repo = %repo.name, id = %id, error = %e, "Context warm-up load failed");
            }
        });
    }

    /// Log a storage failure; undecodable payloads get their own message
    /// because retrying them is pointless.
    pub(super) fn log_storage_error(&self, operation: &str, err: &CacheError) {
        if err.is_serialization() {
            error!(repo = %self.name, operation, error = %err, "Storage payload could not be (de)serialized");
            crate::metrics::record_error(&self.name, operation, "serialization");
        } else {
            warn!(repo = %self.name, operation, error = %err, "Storage operation failed after retries");
            crate::metrics::record_error(&self.name, operation, "backend");
        }
    }
}

impl<E: Entity> Drop for CachedRepository<E> {
    fn drop(&mut self) {
        for job in self.jobs.get_mut().drain(..) {
            job.abort();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn config() -> RepoConfig {
        RepoConfig {
            retry_base_delay_ms: 1,
            ..RepoConfig::new("players")
        }
    }

    fn repo_over(storage: Arc<StubStorage>) -> Arc<CachedRepository<Player>> {
        CachedRepository::new(config(), storage).unwrap()
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let config = RepoConfig {
            storage_key: String::new(),
            ..RepoConfig::new("players")
        };
        let result = CachedRepository::<Player>::new(config, Arc::new(StubStorage::default()));
        assert!(matches!(result, Err(CacheError::Config(_))));
    }

    #[tokio::test]
    async fn test_save_is_visible_before_write_back() {
        let storage = Arc::new(StubStorage::default());
        let repo = repo_over(storage.clone());

        repo.save(player("alice", 5)).unwrap();

        assert_eq!(repo.get("alice").await.unwrap(), Some(player("alice", 5)));
        assert!(repo.is_dirty("alice"));
        assert_eq!(storage.saves.load(Ordering::SeqCst), 0);
        assert_eq!(storage.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_get_loads_and_caches_clean() {
        let storage = Arc::new(StubStorage::default());
        storage.inner.save(&player("bob", 9)).await.unwrap();
        let repo = repo_over(storage.clone());

        assert_eq!(repo.get("bob").await.unwrap(), Some(player("bob", 9)));
        assert!(repo.is_cached("bob"));
        assert!(!repo.is_dirty("bob"));

        repo.get("bob").await.unwrap();
        assert_eq!(storage.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_entity_is_none_and_cooled_down() {
        let storage = Arc::new(StubStorage::default());
        let repo = repo_over(storage.clone());

        assert_eq!(repo.get("ghost").await.unwrap(), None);
        assert_eq!(repo.get("ghost").await.unwrap(), None);

        assert_eq!(storage.loads.load(Ordering::SeqCst), 1);
        assert_eq!(repo.stats().loads_suppressed, 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_error_then_suppressed() {
        let storage = Arc::new(StubStorage::default());
        storage.fail_always.store(true, Ordering::SeqCst);
        let repo = repo_over(storage.clone());

        assert!(repo.get("carol").await.is_err());
        assert_eq!(storage.loads.load(Ordering::SeqCst), 3);

        // Inside the cooldown: no storage traffic, plain miss for get ...
        assert_eq!(repo.get("carol").await.unwrap(), None);
        assert_eq!(storage.loads.load(Ordering::SeqCst), 3);

        // ... and no blind creation for get_or_create.
        let result = repo.get_or_create("carol", || player("carol", 0)).await;
        assert_eq!(result, Err(CacheError::LoadSuppressed { id: "carol".into() }));
        assert!(!repo.is_cached("carol"));
    }

    #[tokio::test]
    async fn test_get_or_create_after_confirmed_miss() {
        let storage = Arc::new(StubStorage::default());
        let repo = repo_over(storage.clone());

        assert_eq!(repo.get("dave").await.unwrap(), None);
        let created = repo.get_or_create("dave", || player("dave", 1)).await.unwrap();

        assert_eq!(created, player("dave", 1));
        assert!(repo.is_dirty("dave"));
        // The cooled-down miss is confirmed against storage before creating.
        assert_eq!(storage.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_get_or_create_does_not_overwrite_peer_created_entity() {
        let storage = Arc::new(StubStorage::default());
        let repo = repo_over(storage.clone());
        assert_eq!(repo.get("pat").await.unwrap(), None);

        // Another server creates the entity inside our cooldown window.
        storage.inner.save(&player("pat", 500)).await.unwrap();

        let entity = repo
            .get_or_create("pat", || panic!("factory must not run"))
            .await
            .unwrap();
        assert_eq!(entity, player("pat", 500));
        assert!(!repo.is_dirty("pat"));

        repo.save_dirty().await.unwrap();
        assert_eq!(storage.inner.load("pat").await.unwrap(), Some(player("pat", 500)));
    }

    #[tokio::test]
    async fn test_get_or_create_returns_existing() {
        let storage = Arc::new(StubStorage::default());
        storage.inner.save(&player("erin", 40)).await.unwrap();
        let repo = repo_over(storage);

        let entity = repo
            .get_or_create("erin", || panic!("factory must not run"))
            .await
            .unwrap();
        assert_eq!(entity, player("erin", 40));
    }

    #[tokio::test]
    async fn test_get_or_create_rejects_mismatched_id() {
        let repo = repo_over(Arc::new(StubStorage::default()));

        let result = repo.get_or_create("frank", || player("someone-else", 0)).await;
        assert!(matches!(result, Err(CacheError::Config(_))));
        assert!(!repo.is_cached("frank"));
    }

    #[tokio::test]
    async fn test_delete_removes_everywhere() {
        let storage = Arc::new(StubStorage::default());
        storage.inner.save(&player("gina", 3)).await.unwrap();
        let repo = repo_over(storage.clone());
        repo.get("gina").await.unwrap();

        repo.delete("gina").await.unwrap();

        assert!(!repo.is_cached("gina"));
        assert!(!storage.inner.exists("gina").await.unwrap());
        // Known-absent: no reload from storage.
        assert_eq!(repo.get("gina").await.unwrap(), None);
        assert_eq!(storage.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_failure_still_clears_local_view() {
        let storage = Arc::new(StubStorage::default());
        storage.fail_always.store(true, Ordering::SeqCst);
        let repo = repo_over(storage.clone());
        repo.save(player("hank", 1)).unwrap();
        let mut rx = repo.observe("hank");

        assert!(repo.delete("hank").await.is_err());
        assert!(!repo.is_cached("hank"));
        assert_eq!(*rx.borrow_and_update(), None);
        assert_eq!(storage.deletes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exists_checks_cache_then_storage() {
        let storage = Arc::new(StubStorage::default());
        storage.inner.save(&player("ivy", 0)).await.unwrap();
        let repo = repo_over(storage);
        repo.save(player("jack", 0)).unwrap();

        assert!(repo.exists("jack").await.unwrap());
        assert!(repo.exists("ivy").await.unwrap());
        assert!(!repo.exists("nobody").await.unwrap());
        assert!(!repo.is_cached("ivy"));
    }

    #[tokio::test]
    async fn test_get_many_mixes_cache_and_storage() {
        let storage = Arc::new(StubStorage::default());
        storage.inner.save(&player("kim", 2)).await.unwrap();
        let repo = repo_over(storage);
        repo.save(player("lee", 1)).unwrap();

        let ids = vec!["lee".to_string(), "kim".to_string(), "none".to_string()];
        let mut found = repo.get_many(&ids).await.unwrap();
        found.sort_by(|a, b| a.id.cmp(&b.id));

        assert_eq!(found, vec![player("kim", 2), player("lee", 1)]);
        assert!(repo.is_cached("kim"));
        assert_eq!(repo.get("none").await.unwrap(), None);
        assert_eq!(repo.stats().loads_suppressed, 1);
    }

    #[tokio::test]
    async fn test_contexts() {
        let repo = repo_over(Arc::new(StubStorage::default()));

        assert!(repo.add_context("mia"));
        assert!(!repo.add_context("mia"));
        assert!(repo.is_context("mia"));
        assert_eq!(repo.get_contexts(), vec!["mia".to_string()]);

        assert!(repo.remove_context("mia"));
        assert!(repo.get_contexts().is_empty());
    }

    #[tokio::test]
    async fn test_add_context_warms_cache() {
        let storage = Arc::new(StubStorage::default());
        storage.inner.save(&player("ned", 8)).await.unwrap();
        let repo = repo_over(storage);

        repo.add_context("ned");

        for _ in 0..100 {
            if repo.is_cached("ned") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(repo.is_cached("ned"));
    }

    #[tokio::test]
    async fn test_save_after_stop_is_rejected() {
        let repo = repo_over(Arc::new(StubStorage::default()));
        repo.init().await.unwrap();
        repo.shutdown().await.unwrap();

        assert_eq!(repo.save(player("owen", 1)), Err(CacheError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_writes_rejected_while_shutting_down() {
        let repo = repo_over(Arc::new(StubStorage::default()));
        repo.set_state(RepoState::ShuttingDown);

        assert_eq!(repo.save(player("pia", 1)), Err(CacheError::ShuttingDown));
        let created = repo.get_or_create("pia", || player("pia", 1)).await;
        assert_eq!(created, Err(CacheError::ShuttingDown));
        assert!(!repo.is_cached("pia"));
    }
}
