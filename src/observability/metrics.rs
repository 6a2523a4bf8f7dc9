//! Commit and log counters
//!
//! Counters only, monotonic, reset when the process starts.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Relaxed atomic counters; readers may see slightly stale values.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    commits: AtomicU64,
    aborts: AtomicU64,
    read_conflicts: AtomicU64,
    write_conflicts: AtomicU64,
    /// Installer errors that aborted a commit
    constraint_violations: AtomicU64,
    physicals_appended: AtomicU64,
    bytes_appended: AtomicU64,
    replayed_physicals: AtomicU64,
    truncations: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_commits(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_aborts(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_read_conflicts(&self) {
        self.read_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_write_conflicts(&self) {
        self.write_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_constraint_violations(&self) {
        self.constraint_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one appended batch
    pub fn add_appended(&self, physicals: u64, bytes: u64) {
        self.physicals_appended.fetch_add(physicals, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_replayed(&self, physicals: u64) {
        self.replayed_physicals.fetch_add(physicals, Ordering::Relaxed);
    }

    pub fn increment_truncations(&self) {
        self.truncations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commits: self.commits.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            read_conflicts: self.read_conflicts.load(Ordering::Relaxed),
            write_conflicts: self.write_conflicts.load(Ordering::Relaxed),
            constraint_violations: self.constraint_violations.load(Ordering::Relaxed),
            physicals_appended: self.physicals_appended.load(Ordering::Relaxed),
            bytes_appended: self.bytes_appended.load(Ordering::Relaxed),
            replayed_physicals: self.replayed_physicals.load(Ordering::Relaxed),
            truncations: self.truncations.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub commits: u64,
    pub aborts: u64,
    pub read_conflicts: u64,
    pub write_conflicts: u64,
    pub constraint_violations: u64,
    pub physicals_appended: u64,
    pub bytes_appended: u64,
    pub replayed_physicals: u64,
    pub truncations: u64,
}

impl MetricsSnapshot {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_registry_is_zero() {
        let snapshot = MetricsRegistry::new().snapshot();
        assert_eq!(snapshot.commits, 0);
        assert_eq!(snapshot.bytes_appended, 0);
    }

    #[test]
    fn test_counters_accumulate() {
        let registry = MetricsRegistry::new();
        registry.increment_commits();
        registry.increment_write_conflicts();
        registry.increment_aborts();
        registry.add_appended(3, 120);
        registry.add_appended(2, 80);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.commits, 1);
        assert_eq!(snapshot.write_conflicts, 1);
        assert_eq!(snapshot.physicals_appended, 5);
        assert_eq!(snapshot.bytes_appended, 200);
    }

    #[test]
    fn test_snapshot_serializes() {
        let registry = MetricsRegistry::new();
        registry.add_replayed(7);
        let parsed: serde_json::Value = serde_json::from_str(&registry.snapshot().to_json()).unwrap();
        assert_eq!(parsed["replayed_physicals"], 7);
    }

    #[test]
    fn test_thread_safety() {
        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..100 {
                        reg.increment_commits();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.snapshot().commits, 800);
    }
}
