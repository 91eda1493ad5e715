//! Load, render and publish one volume.

use std::path::Path;
use std::sync::Arc;

use trust_csi_common::CsiResult;

use crate::metadata::VolumeMetadata;
use crate::metrics::DriverMetrics;
use crate::projection::{AtomicWriter, WriteOutcome};
use crate::render::BundleRenderer;
use crate::source::BundleSource;

/// Brings a volume's data directory up to date with its bundle.
#[derive(Debug, Clone)]
pub struct BundleSyncer {
    source: Arc<dyn BundleSource>,
    renderer: BundleRenderer,
    metrics: Arc<DriverMetrics>,
}

impl BundleSyncer {
    /// Create a syncer reading from `source`.
    pub fn new(source: Arc<dyn BundleSource>, metrics: Arc<DriverMetrics>) -> Self {
        Self {
            source,
            renderer: BundleRenderer::new(),
            metrics,
        }
    }

    /// Render the volume's bundle into `data_dir`.
    ///
    /// The caller holds the volume lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundle cannot be loaded or rendered, or the
    /// write fails. The previously published content stays visible.
    pub fn sync(&self, metadata: &VolumeMetadata, data_dir: &Path) -> CsiResult<WriteOutcome> {
        let result = self.sync_inner(metadata, data_dir);
        self.metrics
            .record_sync(result.as_ref().ok().map(WriteOutcome::is_published));

        match &result {
            Ok(WriteOutcome::Published { snapshot }) => tracing::info!(
                volume_id = %metadata.volume_id,
                bundle = %metadata.bundle,
                snapshot = %snapshot,
                "Published bundle"
            ),
            Ok(WriteOutcome::Unchanged) => tracing::debug!(
                volume_id = %metadata.volume_id,
                bundle = %metadata.bundle,
                "Bundle unchanged"
            ),
            Err(e) => tracing::warn!(
                volume_id = %metadata.volume_id,
                bundle = %metadata.bundle,
                error = %e,
                "Bundle sync failed"
            ),
        }
        result
    }

    fn sync_inner(&self, metadata: &VolumeMetadata, data_dir: &Path) -> CsiResult<WriteOutcome> {
        let bundle = self.source.load(&metadata.pod_namespace, &metadata.bundle)?;
        let payload = self.renderer.render(&bundle, &metadata.outputs)?;
        AtomicWriter::new(data_dir)?.write(&payload, None)
    }
}
