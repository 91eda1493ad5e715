//! Driver counters.
//!
//! A single [`DriverMetrics`] is built at start-up and shared by `Arc` with
//! every component that records something.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for node operations.
#[derive(Debug, Default)]
pub struct DriverMetrics {
    publishes: AtomicU64,
    publish_failures: AtomicU64,
    unpublishes: AtomicU64,
    syncs: AtomicU64,
    sync_failures: AtomicU64,
    snapshots_written: AtomicU64,
    writes_skipped: AtomicU64,
}

/// Point-in-time copy of [`DriverMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Successful publishes.
    pub publishes: u64,
    /// Publishes that were rolled back.
    pub publish_failures: u64,
    /// Completed unpublishes.
    pub unpublishes: u64,
    /// Bundle syncs attempted.
    pub syncs: u64,
    /// Bundle syncs that failed.
    pub sync_failures: u64,
    /// Syncs that published a new snapshot.
    pub snapshots_written: u64,
    /// Syncs that found the directory already current.
    pub writes_skipped: u64,
}

impl DriverMetrics {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_publish(&self, ok: bool) {
        if ok {
            self.publishes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.publish_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_unpublish(&self) {
        self.unpublishes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sync(&self, published: Option<bool>) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
        match published {
            Some(true) => self.snapshots_written.fetch_add(1, Ordering::Relaxed),
            Some(false) => self.writes_skipped.fetch_add(1, Ordering::Relaxed),
            None => self.sync_failures.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Read every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            publishes: self.publishes.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            unpublishes: self.unpublishes.load(Ordering::Relaxed),
            syncs: self.syncs.load(Ordering::Relaxed),
            sync_failures: self.sync_failures.load(Ordering::Relaxed),
            snapshots_written: self.snapshots_written.load(Ordering::Relaxed),
            writes_skipped: self.writes_skipped.load(Ordering::Relaxed),
        }
    }
}
