//! In-process progress reporting for long-running handlers.
//!
//! Not persisted: a restart loses progress, which is fine since the status
//! façade only uses this for coarse percentage display while a job is running.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::types::JobId;

struct Entry {
    percent: u8,
    expires_at: Instant,
}

/// Bounded, TTL-evicting map from job id to a coarse progress percentage.
pub struct ProgressTracker {
    entries: Mutex<HashMap<JobId, Entry>>,
    capacity: usize,
    ttl: Duration,
}

impl ProgressTracker {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
            ttl,
        }
    }

    /// Record a progress update for `job_id`. Silently drops the update if the
    /// tracker is at capacity and `job_id` isn't already tracked.
    pub fn set(&self, job_id: JobId, percent: u8) {
        let mut entries = self.entries.lock().expect("poisoned progress mutex");
        evict_expired(&mut entries);

        if !entries.contains_key(&job_id) && entries.len() >= self.capacity {
            return;
        }

        entries.insert(
            job_id,
            Entry {
                percent: percent.min(100),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn get(&self, job_id: JobId) -> Option<u8> {
        let mut entries = self.entries.lock().expect("poisoned progress mutex");
        evict_expired(&mut entries);
        entries.get(&job_id).map(|entry| entry.percent)
    }

    /// Called by the dispatcher when a job reaches a terminal state, so progress
    /// doesn't linger until its TTL expires.
    pub fn clear(&self, job_id: JobId) {
        self.entries
            .lock()
            .expect("poisoned progress mutex")
            .remove(&job_id);
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(4096, Duration::from_secs(600))
    }
}

fn evict_expired(entries: &mut HashMap<JobId, Entry>) {
    let now = Instant::now();
    entries.retain(|_, entry| entry.expires_at > now);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_roundtrip() {
        let tracker = ProgressTracker::default();
        let id = JobId::new();
        tracker.set(id, 42);
        assert_eq!(tracker.get(id), Some(42));
    }

    #[test]
    fn clear_removes_entry() {
        let tracker = ProgressTracker::default();
        let id = JobId::new();
        tracker.set(id, 10);
        tracker.clear(id);
        assert_eq!(tracker.get(id), None);
    }

    #[test]
    fn percent_is_capped_at_100() {
        let tracker = ProgressTracker::default();
        let id = JobId::new();
        tracker.set(id, 255);
        assert_eq!(tracker.get(id), Some(100));
    }

    #[test]
    fn capacity_limits_new_entries() {
        let tracker = ProgressTracker::new(1, Duration::from_secs(60));
        let first = JobId::new();
        let second = JobId::new();
        tracker.set(first, 5);
        tracker.set(second, 5);
        assert_eq!(tracker.get(first), Some(5));
        assert_eq!(tracker.get(second), None);
    }

    #[test]
    fn expired_entries_are_evicted() {
        let tracker = ProgressTracker::new(10, Duration::from_millis(1));
        let id = JobId::new();
        tracker.set(id, 5);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(tracker.get(id), None);
    }
}
