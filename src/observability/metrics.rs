//! Metrics registry
//!
//! - Counters only, monotonic
//! - Reset only on process start
//! - Relaxed atomics; exactness across counters is not required

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters for the sync engine
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    instances_loaded: AtomicU64,
    instances_invalidated: AtomicU64,
    instances_evicted: AtomicU64,
    steps_accepted: AtomicU64,
    submissions_stale: AtomicU64,
    waiters_parked: AtomicU64,
    waiters_woken: AtomicU64,
    waiters_timed_out: AtomicU64,
    position_reports: AtomicU64,
    sessions_resolved: AtomicU64,
    sessions_rejected: AtomicU64,
    sessions_evicted: AtomicU64,
    watcher_events: AtomicU64,
    watcher_events_skipped: AtomicU64,
    watcher_acquire_failures: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    // Instance lifecycle

    pub fn increment_instances_loaded(&self) {
        self.instances_loaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_instances_invalidated(&self) {
        self.instances_invalidated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_instances_evicted(&self, count: u64) {
        self.instances_evicted.fetch_add(count, Ordering::Relaxed);
    }

    // Version protocol

    /// Add accepted steps (one batch may carry several)
    pub fn increment_steps_accepted(&self, steps: u64) {
        self.steps_accepted.fetch_add(steps, Ordering::Relaxed);
    }

    pub fn increment_submissions_stale(&self) {
        self.submissions_stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_position_reports(&self) {
        self.position_reports.fetch_add(1, Ordering::Relaxed);
    }

    // Long polls

    pub fn increment_waiters_parked(&self) {
        self.waiters_parked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_waiters_woken(&self) {
        self.waiters_woken.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_waiters_timed_out(&self) {
        self.waiters_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    // Sessions

    pub fn increment_sessions_resolved(&self) {
        self.sessions_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sessions_rejected(&self) {
        self.sessions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_sessions_evicted(&self, count: u64) {
        self.sessions_evicted.fetch_add(count, Ordering::Relaxed);
    }

    // Entity watcher

    pub fn increment_watcher_events(&self) {
        self.watcher_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_watcher_events_skipped(&self) {
        self.watcher_events_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_watcher_acquire_failures(&self) {
        self.watcher_acquire_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            instances_loaded: self.instances_loaded.load(Ordering::Relaxed),
            instances_invalidated: self.instances_invalidated.load(Ordering::Relaxed),
            instances_evicted: self.instances_evicted.load(Ordering::Relaxed),
            steps_accepted: self.steps_accepted.load(Ordering::Relaxed),
            submissions_stale: self.submissions_stale.load(Ordering::Relaxed),
            waiters_parked: self.waiters_parked.load(Ordering::Relaxed),
            waiters_woken: self.waiters_woken.load(Ordering::Relaxed),
            waiters_timed_out: self.waiters_timed_out.load(Ordering::Relaxed),
            position_reports: self.position_reports.load(Ordering::Relaxed),
            sessions_resolved: self.sessions_resolved.load(Ordering::Relaxed),
            sessions_rejected: self.sessions_rejected.load(Ordering::Relaxed),
            sessions_evicted: self.sessions_evicted.load(Ordering::Relaxed),
            watcher_events: self.watcher_events.load(Ordering::Relaxed),
            watcher_events_skipped: self.watcher_events_skipped.load(Ordering::Relaxed),
            watcher_acquire_failures: self.watcher_acquire_failures.load(Ordering::Relaxed),
        }
    }

    /// Current values as a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub instances_loaded: u64,
    pub instances_invalidated: u64,
    pub instances_evicted: u64,
    pub steps_accepted: u64,
    pub submissions_stale: u64,
    pub waiters_parked: u64,
    pub waiters_woken: u64,
    pub waiters_timed_out: u64,
    pub position_reports: u64,
    pub sessions_resolved: u64,
    pub sessions_rejected: u64,
    pub sessions_evicted: u64,
    pub watcher_events: u64,
    pub watcher_events_skipped: u64,
    pub watcher_acquire_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        let snapshot = MetricsRegistry::new().snapshot();
        assert_eq!(snapshot.steps_accepted, 0);
        assert_eq!(snapshot.waiters_parked, 0);
        assert_eq!(snapshot.sessions_evicted, 0);
    }

    #[test]
    fn test_increment_counters() {
        let registry = MetricsRegistry::new();

        registry.increment_steps_accepted(3);
        registry.increment_steps_accepted(2);
        registry.increment_submissions_stale();
        registry.increment_waiters_parked();
        registry.increment_waiters_timed_out();
        registry.add_sessions_evicted(4);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.steps_accepted, 5);
        assert_eq!(snapshot.submissions_stale, 1);
        assert_eq!(snapshot.waiters_parked, 1);
        assert_eq!(snapshot.waiters_timed_out, 1);
        assert_eq!(snapshot.sessions_evicted, 4);
    }

    #[test]
    fn test_to_json() {
        let registry = MetricsRegistry::new();
        registry.increment_instances_loaded();
        registry.increment_watcher_events();

        let json = registry.to_json();
        assert_eq!(json["instances_loaded"], 1);
        assert_eq!(json["watcher_events"], 1);
        assert_eq!(json["steps_accepted"], 0);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..100 {
                        reg.increment_waiters_woken();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.snapshot().waiters_woken, 800);
    }
}
