// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Last-access bookkeeping and the context (pin) set used by idle eviction.

use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};

/// Tracks when each id was last read or written, and which ids are pinned.
#[derive(Debug, Default)]
pub struct AccessTracker {
    last_access: DashMap<String, Instant>,
    contexts: DashSet<String>,
}

impl AccessTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&self, id: &str) {
        self.touch_at(id, Instant::now());
    }

    pub fn touch_at(&self, id: &str, at: Instant) {
        self.last_access.insert(id.to_string(), at);
    }

    pub fn last_access(&self, id: &str) -> Option<Instant> {
        self.last_access.get(id).map(|r| *r.value())
    }

    pub fn forget(&self, id: &str) {
        self.last_access.remove(id);
    }

    pub fn pin(&self, id: &str) -> bool {
        self.contexts.insert(id.to_string())
    }

    pub fn unpin(&self, id: &str) -> bool {
        self.contexts.remove(id).is_some()
    }

    pub fn is_pinned(&self, id: &str) -> bool {
        self.contexts.contains(id)
    }

    pub fn pinned(&self) -> Vec<String> {
        self.contexts.iter().map(|r| r.key().clone()).collect()
    }

    pub fn pinned_count(&self) -> usize {
        self.contexts.len()
    }

    /// Whether `id` is unpinned and idle for longer than `timeout`.
    ///
    /// An id with no recorded access counts as idle since forever.
    pub fn is_expired(&self, id: &str, now: Instant, timeout: Duration) -> bool {
        if self.is_pinned(id) {
            return false;
        }
        match self.last_access(id) {
            Some(at) => now.saturating_duration_since(at) > timeout,
            None => true,
        }
    }

    /// Ids from `candidates` that [are expired](Self::is_expired).
    pub fn select_expired<'a, I>(&self, candidates: I, now: Instant, timeout: Duration) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        candidates
            .into_iter()
            .filter(|id| self.is_expired(id, now, timeout))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_and_unpin() {
        let tracker = AccessTracker::new();
        assert!(tracker.pin("p1"));
        assert!(!tracker.pin("p1"));
        assert!(tracker.is_pinned("p1"));
        assert_eq!(tracker.pinned(), vec!["p1".to_string()]);

        assert!(tracker.unpin("p1"));
        assert!(!tracker.is_pinned("p1"));
        assert_eq!(tracker.pinned_count(), 0);
    }

    #[test]
    fn test_select_expired_skips_pinned_and_fresh() {
        let tracker = AccessTracker::new();
        let now = Instant::now();
        let stale = now.checked_sub(Duration::from_millis(500)).unwrap();

        tracker.touch_at("old", stale);
        tracker.touch_at("old-pinned", stale);
        tracker.touch_at("fresh", now);
        tracker.pin("old-pinned");

        let ids = vec!["old".to_string(), "old-pinned".to_string(), "fresh".to_string()];
        let expired = tracker.select_expired(&ids, now, Duration::from_millis(100));

        assert_eq!(expired, vec!["old".to_string()]);
    }

    #[test]
    fn test_untracked_ids_count_as_expired() {
        let tracker = AccessTracker::new();
        let ids = vec!["never-touched".to_string()];

        let expired = tracker.select_expired(&ids, Instant::now(), Duration::from_secs(60));
        assert_eq!(expired, ids);
    }

    #[test]
    fn test_touch_or_pin_revives_expired_id() {
        let tracker = AccessTracker::new();
        let now = Instant::now();
        let timeout = Duration::from_millis(100);
        tracker.touch_at("a", now.checked_sub(Duration::from_millis(500)).unwrap());
        assert!(tracker.is_expired("a", now, timeout));

        tracker.touch_at("a", now);
        assert!(!tracker.is_expired("a", now, timeout));

        assert!(tracker.is_expired("b", now, timeout));
        tracker.pin("b");
        assert!(!tracker.is_expired("b", now, timeout));
    }

    #[test]
    fn test_forget_removes_access_time() {
        let tracker = AccessTracker::new();
        tracker.touch("a");
        assert!(tracker.last_access("a").is_some());

        tracker.forget("a");
        assert!(tracker.last_access("a").is_none());
    }
}
