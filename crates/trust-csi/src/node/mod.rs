//! Volume publish and unpublish.
//!
//! Publishing an inline volume:
//!
//! 1. validate the request and build the volume record
//! 2. create `<tmpfs>/<volume>/data` and sync the bundle into it
//! 3. bind mount the data directory read-only onto the target path
//! 4. track the record so later bundle changes are resynced
//!
//! Any failure after validation is rolled back: the volume stops syncing,
//! the target is unmounted and the volume root is removed. Unpublish runs
//! the same teardown and tolerates volumes that are already gone.

pub mod locks;
pub mod request;

use std::io;
use std::path::Path;
use std::sync::Arc;

use trust_csi_common::{CsiError, CsiResult, VolumeId};

pub use locks::VolumeLocks;
pub use request::{PublishRequest, UnpublishRequest, ValidatedPublish};

use crate::filesystem::Mounter;
use crate::metadata::VolumeMetadata;
use crate::metrics::DriverMetrics;
use crate::state::VolumeStateStore;
use crate::sync::BundleSyncer;

/// Capabilities the node service advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCapability {
    /// The kubelet passes the pod's fsGroup with each publish.
    VolumeMountGroup,
}

/// Node identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Node ID.
    pub node_id: String,
}

/// Handles volume publish and unpublish on one node.
#[derive(Debug)]
pub struct NodeServer {
    node_id: String,
    state: Arc<VolumeStateStore>,
    syncer: BundleSyncer,
    mounter: Arc<dyn Mounter>,
    locks: Arc<VolumeLocks>,
    metrics: Arc<DriverMetrics>,
}

impl NodeServer {
    /// Create a node server.
    pub fn new(
        node_id: impl Into<String>,
        state: Arc<VolumeStateStore>,
        syncer: BundleSyncer,
        mounter: Arc<dyn Mounter>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            state,
            syncer,
            mounter,
            locks: Arc::default(),
            metrics: Arc::default(),
        }
    }

    /// Share a lock table with other components.
    #[must_use]
    pub fn with_locks(mut self, locks: Arc<VolumeLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Record into a shared metrics collector.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<DriverMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Node ID.
    #[must_use]
    pub fn node_info(&self) -> NodeInfo {
        NodeInfo {
            node_id: self.node_id.clone(),
        }
    }

    /// Capabilities of the node service.
    #[must_use]
    pub const fn capabilities(&self) -> &'static [NodeCapability] {
        &[NodeCapability::VolumeMountGroup]
    }

    /// Publish a volume at its target path.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed requests, leaving existing
    /// state alone. Any later failure is returned after rollback.
    pub fn publish(&self, request: &PublishRequest) -> CsiResult<()> {
        let ValidatedPublish {
            target_path,
            metadata,
        } = request.validate()?;
        let volume_id = metadata.volume_id.clone();

        tracing::info!(
            volume_id = %volume_id,
            target_path = %target_path.display(),
            bundle = %metadata.bundle,
            "Starting volume publish"
        );

        let result = self.locks.with_lock(&volume_id, || {
            let result = self.publish_locked(&target_path, metadata);
            if result.is_err() {
                self.rollback(&volume_id, &target_path);
            }
            result
        });
        self.metrics.record_publish(result.is_ok());

        match &result {
            Ok(()) => tracing::info!(volume_id = %volume_id, "Volume has been published"),
            Err(e) => tracing::warn!(volume_id = %volume_id, error = %e, "Volume publish failed"),
        }
        result
    }

    fn publish_locked(&self, target_path: &Path, metadata: VolumeMetadata) -> CsiResult<()> {
        let data_dir = self.state.paths().volume_data(metadata.volume_id.as_str());

        tracing::debug!(volume_id = %metadata.volume_id, dir = %data_dir.display(), "Creating volume directory");
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| CsiError::projection("creating volume data directory", e))?;

        // Content is in place before the pod can see the mount.
        self.syncer.sync(&metadata, &data_dir)?;

        if !target_path.exists() {
            std::fs::create_dir_all(target_path)
                .map_err(|e| CsiError::projection("creating target path", e))?;
        }
        if self.mounter.is_mount_point(target_path)? {
            tracing::debug!(target_path = %target_path.display(), "Target already mounted");
        } else {
            self.mounter.bind_read_only(&data_dir, target_path)?;
        }

        self.state.track(metadata)
    }

    fn rollback(&self, volume_id: &VolumeId, target_path: &Path) {
        self.state.stop_sync(volume_id);

        match self.mounter.is_mount_point(target_path) {
            Ok(true) => {
                if let Err(e) = self.mounter.unmount(target_path) {
                    tracing::warn!(
                        volume_id = %volume_id,
                        target_path = %target_path.display(),
                        error = %e,
                        "Rollback could not unmount target"
                    );
                }
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(
                volume_id = %volume_id,
                target_path = %target_path.display(),
                error = %e,
                "Rollback could not inspect target"
            ),
        }

        let root = self.state.paths().volume_root(volume_id.as_str());
        if let Err(e) = remove_all(&root) {
            tracing::warn!(
                volume_id = %volume_id,
                dir = %root.display(),
                error = %e,
                "Rollback could not remove volume root"
            );
        }
    }

    /// Tear a volume down. Safe to repeat.
    ///
    /// # Errors
    ///
    /// Returns an error if the volume ID is invalid, the target cannot be
    /// unmounted, or the volume root cannot be removed.
    pub fn unpublish(&self, request: &UnpublishRequest) -> CsiResult<()> {
        let volume_id = VolumeId::new(request.volume_id.clone())?;
        let target_path = request.target_path.as_path();

        tracing::info!(
            volume_id = %volume_id,
            target_path = %target_path.display(),
            "Starting volume unpublish"
        );

        self.locks.with_lock(&volume_id, || -> CsiResult<()> {
            // Stop resync first; the record file stays until the root goes.
            self.state.stop_sync(&volume_id);

            if !target_path.as_os_str().is_empty() && self.mounter.is_mount_point(target_path)? {
                tracing::debug!(target_path = %target_path.display(), "Unmounting volume");
                self.mounter.unmount(target_path)?;
            }

            let root = self.state.paths().volume_root(volume_id.as_str());
            tracing::debug!(dir = %root.display(), "Cleaning up volume");
            remove_all(&root).map_err(|e| CsiError::projection("removing volume root", e))
        })?;

        self.locks.forget(&volume_id);
        self.metrics.record_unpublish();
        tracing::info!(volume_id = %volume_id, "Volume has been unpublished");
        Ok(())
    }
}

fn remove_all(path: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
