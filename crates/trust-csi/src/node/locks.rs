//! Per-volume serialization.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use trust_csi_common::VolumeId;

/// One mutex per volume ID.
///
/// Publish, unpublish and resync of the same volume run one at a time;
/// different volumes proceed in parallel.
#[derive(Debug, Default)]
pub struct VolumeLocks {
    locks: DashMap<VolumeId, Arc<Mutex<()>>>,
}

impl VolumeLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `volume_id`.
    pub fn with_lock<T>(&self, volume_id: &VolumeId, f: impl FnOnce() -> T) -> T {
        // Clone the Arc out so the map shard is not held while waiting.
        let mutex = Arc::clone(&self.locks.entry(volume_id.clone()).or_default());
        let _guard = mutex.lock();
        f()
    }

    /// Drop the entry for `volume_id` unless someone else holds or waits on
    /// it.
    pub fn forget(&self, volume_id: &VolumeId) {
        self.locks
            .remove_if(volume_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    /// Number of volumes with a lock entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no volume has a lock entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn same_volume_is_serialized() {
        let locks = Arc::new(VolumeLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let id: VolumeId = "vol-1".parse().unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (locks, active, peak, id) =
                    (Arc::clone(&locks), Arc::clone(&active), Arc::clone(&peak), id.clone());
                std::thread::spawn(move || {
                    locks.with_lock(&id, || {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(10));
                        active.fetch_sub(1, Ordering::SeqCst);
                    });
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn forget_drops_idle_entries() {
        let locks = VolumeLocks::new();
        let id: VolumeId = "vol-1".parse().unwrap();

        locks.with_lock(&id, || ());
        assert_eq!(locks.len(), 1);

        locks.forget(&id);
        assert!(locks.is_empty());
    }
}
