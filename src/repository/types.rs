// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the cached repository.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Repository lifecycle state.
///
/// Use [`super::CachedRepository::state()`] to check the current state or
/// [`super::CachedRepository::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoState {
    /// Constructed, `init()` not called yet. Reads and writes already work.
    Created,
    /// Bulk-loading and wiring sync handlers
    Loading,
    /// Background jobs running
    Running,
    /// Final write-back in progress
    ShuttingDown,
    /// Jobs cancelled, sync stopped
    Stopped,
}

impl std::fmt::Display for RepoState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Loading => write!(f, "Loading"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Point-in-time view of a repository's sizes and counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoStats {
    pub cached: usize,
    pub dirty: usize,
    pub contexts: usize,
    pub loads_in_flight: usize,

    /// Storage loads that ran (one per single-flight group)
    pub loads: u64,
    pub load_failures: u64,
    /// Callers that attached to a load already in flight
    pub load_joins: u64,
    /// Misses answered from the cooldown without touching storage
    pub loads_suppressed: u64,

    pub write_backs: u64,
    pub write_back_failures: u64,
    pub entities_written: u64,
    pub evictions: u64,

    pub remote_updates_applied: u64,
    pub remote_updates_ignored: u64,
    pub remote_deletes: u64,
}

/// Why a recent load came back empty-handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum MissKind {
    /// Storage answered: no such entity
    Absent,
    /// Storage failed
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct Cooldown {
    pub(super) at: Instant,
    pub(super) kind: MissKind,
}

/// Outcome of a cache-miss lookup.
#[derive(Debug, Clone)]
pub(super) enum Lookup<E> {
    Found(E),
    Absent,
    Suppressed(MissKind),
}

#[derive(Debug, Default)]
pub(super) struct Counters {
    pub(super) loads: AtomicU64,
    pub(super) load_failures: AtomicU64,
    pub(super) load_joins: AtomicU64,
    pub(super) loads_suppressed: AtomicU64,
    pub(super) write_backs: AtomicU64,
    pub(super) write_back_failures: AtomicU64,
    pub(super) entities_written: AtomicU64,
    pub(super) evictions: AtomicU64,
    pub(super) remote_updates_applied: AtomicU64,
    pub(super) remote_updates_ignored: AtomicU64,
    pub(super) remote_deletes: AtomicU64,
}

impl Counters {
    pub(super) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Fill the counter half of a [`RepoStats`].
    pub(super) fn fill(&self, stats: &mut RepoStats) {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        stats.loads = get(&self.loads);
        stats.load_failures = get(&self.load_failures);
        stats.load_joins = get(&self.load_joins);
        stats.loads_suppressed = get(&self.loads_suppressed);
        stats.write_backs = get(&self.write_backs);
        stats.write_back_failures = get(&self.write_back_failures);
        stats.entities_written = get(&self.entities_written);
        stats.evictions = get(&self.evictions);
        stats.remote_updates_applied = get(&self.remote_updates_applied);
        stats.remote_updates_ignored = get(&self.remote_updates_ignored);
        stats.remote_deletes = get(&self.remote_deletes);
    }
}
