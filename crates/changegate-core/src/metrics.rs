//! Global atomic counters for submission outcomes.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Atomic counters, lock-free.
pub struct Metrics {
    submits_attempted: AtomicU64,
    submits_succeeded: AtomicU64,
    submits_rejected: AtomicU64,
    fast_forwards: AtomicU64,
    merge_commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            submits_attempted: AtomicU64::new(0),
            submits_succeeded: AtomicU64::new(0),
            submits_rejected: AtomicU64::new(0),
            fast_forwards: AtomicU64::new(0),
            merge_commits: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
        }
    }

    pub fn inc_attempted(&self) {
        self.submits_attempted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "submits_attempted", "counter incremented");
    }

    pub fn inc_succeeded(&self) {
        self.submits_succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "submits_succeeded", "counter incremented");
    }

    pub fn inc_rejected(&self) {
        self.submits_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "submits_rejected", "counter incremented");
    }

    pub fn add_fast_forwards(&self, n: u64) {
        self.fast_forwards.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_merge_commits(&self, n: u64) {
        self.merge_commits.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_rollbacks(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rollbacks", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            submits_attempted = self.submits_attempted(),
            submits_succeeded = self.submits_succeeded(),
            submits_rejected = self.submits_rejected(),
            fast_forwards = self.fast_forwards(),
            merge_commits = self.merge_commits(),
            rollbacks = self.rollbacks(),
        );
    }

    pub fn submits_attempted(&self) -> u64 {
        self.submits_attempted.load(Ordering::Relaxed)
    }

    pub fn submits_succeeded(&self) -> u64 {
        self.submits_succeeded.load(Ordering::Relaxed)
    }

    pub fn submits_rejected(&self) -> u64 {
        self.submits_rejected.load(Ordering::Relaxed)
    }

    pub fn fast_forwards(&self) -> u64 {
        self.fast_forwards.load(Ordering::Relaxed)
    }

    pub fn merge_commits(&self) -> u64 {
        self.merge_commits.load(Ordering::Relaxed)
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.submits_attempted.store(0, Ordering::Relaxed);
        self.submits_succeeded.store(0, Ordering::Relaxed);
        self.submits_rejected.store(0, Ordering::Relaxed);
        self.fast_forwards.store(0, Ordering::Relaxed);
        self.merge_commits.store(0, Ordering::Relaxed);
        self.rollbacks.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_attempted();
        m.inc_attempted();
        m.inc_succeeded();
        m.add_merge_commits(3);
        assert_eq!(m.submits_attempted(), 2);
        assert_eq!(m.submits_succeeded(), 1);
        assert_eq!(m.merge_commits(), 3);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_rejected();
        m.inc_rollbacks();
        m.add_fast_forwards(2);
        m.reset();
        assert_eq!(m.submits_rejected(), 0);
        assert_eq!(m.rollbacks(), 0);
        assert_eq!(m.fast_forwards(), 0);
    }
}
