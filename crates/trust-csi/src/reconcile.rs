//! Resync of every volume that tracks a bundle.

use std::fmt;
use std::sync::Arc;

use trust_csi_common::CsiError;

use crate::node::VolumeLocks;
use crate::state::VolumeStateStore;
use crate::sync::BundleSyncer;

/// Failures from a reconcile pass, one per volume.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<(String, CsiError)>,
}

impl MultiError {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the failure for `volume_id`.
    pub fn push(&mut self, volume_id: impl Into<String>, error: CsiError) {
        self.errors.push((volume_id.into(), error));
    }

    /// Fold another collection into this one.
    pub fn extend(&mut self, other: Self) {
        self.errors.extend(other.errors);
    }

    /// Failures in the order they happened.
    #[must_use]
    pub fn errors(&self) -> &[(String, CsiError)] {
        &self.errors
    }

    /// Number of failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether nothing failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok(value)` when empty, otherwise `Err(self)`.
    ///
    /// # Errors
    ///
    /// Returns `self` if any failure was recorded.
    pub fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => f.write_str("no errors"),
            [(id, e)] => write!(f, "volume {id}: {e}"),
            errors => {
                write!(f, "{} volumes failed: [", errors.len())?;
                for (i, (id, e)) in errors.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "volume {id}: {e}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl std::error::Error for MultiError {}

/// Re-renders volumes when their bundle changes.
#[derive(Debug, Clone)]
pub struct Reconciler {
    state: Arc<VolumeStateStore>,
    syncer: BundleSyncer,
    locks: Arc<VolumeLocks>,
}

impl Reconciler {
    /// Create a reconciler sharing `locks` with the node server.
    pub fn new(state: Arc<VolumeStateStore>, syncer: BundleSyncer, locks: Arc<VolumeLocks>) -> Self {
        Self {
            state,
            syncer,
            locks,
        }
    }

    /// Sync every volume tracking `bundle`.
    ///
    /// Returns the number of volumes synced.
    ///
    /// # Errors
    ///
    /// Returns every per-volume failure; one failure does not stop the
    /// remaining volumes.
    pub fn reconcile(&self, bundle: &str) -> Result<usize, MultiError> {
        let mut errors = MultiError::new();
        let mut synced = 0;

        for metadata in self.state.metadata_for_bundle(bundle) {
            let volume_id = metadata.volume_id;
            let result = self.locks.with_lock(&volume_id, || {
                // Re-read under the lock; the volume may have been
                // unpublished or republished while we waited.
                let Some(current) = self.state.get(&volume_id) else {
                    return Ok(false);
                };
                let data_dir = self.state.paths().volume_data(volume_id.as_str());
                self.syncer.sync(&current, &data_dir).map(|_| true)
            });

            match result {
                Ok(true) => synced += 1,
                Ok(false) => {
                    tracing::debug!(volume_id = %volume_id, bundle, "Skipping untracked volume");
                }
                Err(e) => errors.push(volume_id.to_string(), e),
            }
        }

        tracing::debug!(bundle, synced, failed = errors.len(), "Reconciled bundle");
        errors.into_result(synced)
    }

    /// Sync every tracked bundle.
    ///
    /// # Errors
    ///
    /// Returns the failures of every bundle combined.
    pub fn reconcile_all(&self) -> Result<usize, MultiError> {
        let mut errors = MultiError::new();
        let mut synced = 0;

        for bundle in self.state.bundles() {
            match self.reconcile(&bundle) {
                Ok(count) => synced += count,
                Err(failed) => errors.extend(failed),
            }
        }

        errors.into_result(synced)
    }
}
