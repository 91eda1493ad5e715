//! Reverse index from bundle names to the volumes that project them.

use std::collections::{BTreeMap, BTreeSet};

use trust_csi_common::VolumeId;

/// Map of bundle name to tracked volume IDs.
///
/// A bundle is present only while at least one volume tracks it. Bundles
/// are cluster scoped, so volumes in different namespaces share an entry.
#[derive(Debug, Default, Clone)]
pub struct BundleIndex {
    entries: BTreeMap<String, BTreeSet<VolumeId>>,
}

impl BundleIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `volume_id` projects `bundle`.
    pub fn insert(&mut self, bundle: &str, volume_id: VolumeId) {
        self.entries
            .entry(bundle.to_string())
            .or_default()
            .insert(volume_id);
    }

    /// Forget `volume_id` under `bundle`, dropping the bundle once empty.
    ///
    /// Returns whether the volume was present.
    pub fn remove(&mut self, bundle: &str, volume_id: &VolumeId) -> bool {
        let Some(volumes) = self.entries.get_mut(bundle) else {
            return false;
        };

        let removed = volumes.remove(volume_id);
        if volumes.is_empty() {
            self.entries.remove(bundle);
        }
        removed
    }

    /// Volumes tracking `bundle`, in ID order.
    #[must_use]
    pub fn volumes(&self, bundle: &str) -> Vec<VolumeId> {
        self.entries
            .get(bundle)
            .map(|volumes| volumes.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every tracked bundle name, sorted.
    #[must_use]
    pub fn bundles(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Number of tracked bundles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no bundle is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
