//! Global atomic counters for ctxkeep.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a CLI command).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations and no locking.
pub struct Metrics {
    compactions: AtomicU64,
    items_archived: AtomicU64,
    checkpoints_created: AtomicU64,
    snapshot_failures: AtomicU64,
    restores_applied: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            compactions: AtomicU64::new(0),
            items_archived: AtomicU64::new(0),
            checkpoints_created: AtomicU64::new(0),
            snapshot_failures: AtomicU64::new(0),
            restores_applied: AtomicU64::new(0),
        }
    }

    pub fn inc_compactions(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "compactions", "counter incremented");
    }

    pub fn add_items_archived(&self, n: u64) {
        self.items_archived.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "items_archived", n, "counter incremented");
    }

    pub fn inc_checkpoints(&self) {
        self.checkpoints_created.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "checkpoints_created", "counter incremented");
    }

    pub fn inc_snapshot_failures(&self) {
        self.snapshot_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "snapshot_failures", "counter incremented");
    }

    pub fn inc_restores(&self) {
        self.restores_applied.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "restores_applied", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            compactions = self.compactions(),
            items_archived = self.items_archived(),
            checkpoints_created = self.checkpoints_created(),
            snapshot_failures = self.snapshot_failures(),
            restores_applied = self.restores_applied(),
        );
    }

    pub fn compactions(&self) -> u64 {
        self.compactions.load(Ordering::Relaxed)
    }

    pub fn items_archived(&self) -> u64 {
        self.items_archived.load(Ordering::Relaxed)
    }

    pub fn checkpoints_created(&self) -> u64 {
        self.checkpoints_created.load(Ordering::Relaxed)
    }

    pub fn snapshot_failures(&self) -> u64 {
        self.snapshot_failures.load(Ordering::Relaxed)
    }

    pub fn restores_applied(&self) -> u64 {
        self.restores_applied.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.compactions.store(0, Ordering::Relaxed);
        self.items_archived.store(0, Ordering::Relaxed);
        self.checkpoints_created.store(0, Ordering::Relaxed);
        self.snapshot_failures.store(0, Ordering::Relaxed);
        self.restores_applied.store(0, Ordering::Relaxed);
    }
}
