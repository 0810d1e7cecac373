// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Repository lifecycle: init, background jobs, reconfiguration, shutdown.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::{CachedRepository, RepoState};
use crate::config::RepoConfig;
use crate::entity::Entity;
use crate::error::{CacheError, Result};
use crate::resilience::retry::retry_if;

impl<E: Entity> CachedRepository<E> {
    /// Start the repository.
    ///
    /// 1. Bulk-load storage into the cache if `load_all_on_start` is set
    /// 2. Wire the sync handlers and start the sync service
    /// 3. Start the write-back job and, if enabled, the cleanup job
    ///
    /// A failed bulk load or sync start is logged and the repository still
    /// starts: the cache then fills lazily, and peers' updates are missed
    /// until the transport comes back. Calling `init` on a loading or
    /// running repository is a no-op.
    #[tracing::instrument(skip(self), fields(repo = %self.name))]
    pub async fn init(&self) -> Result<()> {
        if let Err(current) = self.claim_state(RepoState::Loading, |s| s == RepoState::Created) {
            return match current {
                RepoState::ShuttingDown | RepoState::Stopped => Err(CacheError::ShuttingDown),
                _ => Ok(()),
            };
        }

        let start = Instant::now();
        let config = self.config();

        if config.load_all_on_start {
            match self.load_all_into_cache().await {
                Ok(count) => info!(repo = %self.name, count, "Bulk-loaded entities"),
                Err(e) => {
                    self.log_storage_error("load_all", &e);
                    warn!(repo = %self.name, "Starting with a cold cache");
                }
            }
        }

        if let Err(e) = self.attach_sync().await {
            warn!(repo = %self.name, error = %e, "Sync service failed to start, running without peer updates");
            crate::metrics::record_error(&self.name, "init", "sync_start");
        }

        self.start_jobs(&config);
        if self.claim_state(RepoState::Running, |s| s == RepoState::Loading).is_err() {
            warn!(repo = %self.name, "Shutdown requested during init, stopping");
            self.stop_jobs();
            self.detach_sync().await;
            return Err(CacheError::ShuttingDown);
        }
        self.update_gauges();
        info!(
            repo = %self.name,
            cached = self.cache.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Repository running"
        );
        Ok(())
    }

    async fn load_all_into_cache(&self) -> Result<usize> {
        let storage = &self.storage;
        let mark = self.begin_load();
        let entities = retry_if(
            "load_all",
            &self.retry_config(),
            || storage.load_all(),
            CacheError::is_retryable,
        )
        .await?;

        let count = entities.len();
        for entity in entities {
            let id = entity.id().to_string();
            self.adopt_loaded(&id, entity, &mark);
        }
        Ok(count)
    }

    /// Stop the repository.
    ///
    /// Cancels the background jobs, runs a final write-back (broadcasting as
    /// usual), then stops the sync service. Loads already in flight finish
    /// on their own. The final write-back's error is returned; entities it
    /// could not save remain dirty in the cache.
    #[tracing::instrument(skip(self), fields(repo = %self.name))]
    pub async fn shutdown(&self) -> Result<()> {
        let claimed = self.claim_state(RepoState::ShuttingDown, |s| {
            !matches!(s, RepoState::ShuttingDown | RepoState::Stopped)
        });
        if claimed.is_err() {
            return Ok(());
        }

        info!(repo = %self.name, dirty = self.cache.dirty_count(), "Shutting down repository");
        self.stop_jobs();

        let result = self.save_dirty().await;
        match &result {
            Ok(written) => debug!(repo = %self.name, written, "Final write-back complete"),
            Err(e) => error!(
                repo = %self.name,
                error = %e,
                dirty = self.cache.dirty_count(),
                "Final write-back failed, unsaved changes remain in memory only"
            ),
        }

        self.detach_sync().await;
        self.set_state(RepoState::Stopped);
        info!(repo = %self.name, "Repository stopped");
        result.map(|_| ())
    }

    /// Replace the configuration.
    ///
    /// Intervals, retry and timeout settings take effect immediately; running
    /// jobs are restarted with the new intervals. The name, storage key and
    /// update channel are bound to the storage and sync service and cannot
    /// change.
    pub fn reconfigure(&self, config: RepoConfig) -> Result<()> {
        config.validate()?;
        let current = self.config();
        if config.name != current.name
            || config.storage_key != current.storage_key
            || config.update_channel != current.update_channel
        {
            return Err(CacheError::Config(format!(
                "repository '{}': name, storage key and update channel are fixed",
                self.name
            )));
        }

        let config = Arc::new(config);
        *self.config.write() = Arc::clone(&config);

        if self.state() == RepoState::Running {
            self.stop_jobs();
            self.start_jobs(&config);
        }
        info!(
            repo = %self.name,
            save_interval_ms = config.save_interval_ms,
            cleanup_enabled = config.cleanup_enabled,
            "Repository reconfigured"
        );
        Ok(())
    }

    fn start_jobs(&self, config: &RepoConfig) {
        let mut jobs = self.jobs.lock();

        jobs.push(spawn_periodic(
            self.self_ref.clone(),
            config.save_interval(),
            |repo| async move {
                // Failures are logged by the cycle itself.
                let _ = repo.save_dirty().await;
            },
        ));

        if config.cleanup_enabled {
            jobs.push(spawn_periodic(
                self.self_ref.clone(),
                config.cleanup_interval(),
                |repo| async move {
                    repo.cleanup_expired_entities().await;
                },
            ));
        }
        debug!(repo = %self.name, jobs = jobs.len(), "Background jobs started");
    }

    fn stop_jobs(&self) {
        let jobs: Vec<JoinHandle<()>> = self.jobs.lock().drain(..).collect();
        for job in &jobs {
            job.abort();
        }
        if !jobs.is_empty() {
            debug!(repo = %self.name, jobs = jobs.len(), "Background jobs cancelled");
        }
    }

    #[cfg(test)]
    pub(super) fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }
}

/// Run `tick` every `period` until the repository is dropped or the job aborted.
///
/// The first run happens one full period after start.
fn spawn_periodic<E, F, Fut>(weak: Weak<CachedRepository<E>>, period: Duration, tick: F) -> JoinHandle<()>
where
    E: Entity,
    F: Fn(Arc<CachedRepository<E>>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let Some(repo) = weak.upgrade() else { break };
            tick(repo).await;
        }
    })
}
