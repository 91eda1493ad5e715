//! Wiring of the node agent's components.

use std::sync::Arc;

use trust_csi_common::CsiResult;

use crate::config::DriverConfig;
use crate::filesystem::Mounter;
use crate::identity::IdentityServer;
use crate::metadata::VersionedCodec;
use crate::metrics::DriverMetrics;
use crate::node::{NodeServer, VolumeLocks};
use crate::reconcile::Reconciler;
use crate::source::BundleSource;
use crate::state::VolumeStateStore;
use crate::sync::BundleSyncer;
use crate::watch::BundleWatcher;

/// A fully assembled node agent.
#[derive(Debug)]
pub struct Driver {
    config: DriverConfig,
    source: Arc<dyn BundleSource>,
    state: Arc<VolumeStateStore>,
    metrics: Arc<DriverMetrics>,
    node: NodeServer,
    reconciler: Reconciler,
    identity: IdentityServer,
}

impl Driver {
    /// Load persisted state and build every component.
    ///
    /// # Errors
    ///
    /// Returns an error if the state store cannot be initialized.
    pub fn initialize(
        config: DriverConfig,
        source: Arc<dyn BundleSource>,
        mounter: Arc<dyn Mounter>,
    ) -> CsiResult<Self> {
        let tmpfs_mounter = config.tmpfs.then_some(mounter.as_ref());
        let state = Arc::new(VolumeStateStore::initialize(
            config.paths.clone(),
            Arc::new(VersionedCodec::new()),
            tmpfs_mounter,
        )?);

        let metrics = Arc::new(DriverMetrics::new());
        let locks = Arc::new(VolumeLocks::new());
        let syncer = BundleSyncer::new(Arc::clone(&source), Arc::clone(&metrics));

        let node = NodeServer::new(
            config.node_id.clone(),
            Arc::clone(&state),
            syncer.clone(),
            mounter,
        )
        .with_locks(Arc::clone(&locks))
        .with_metrics(Arc::clone(&metrics));
        let reconciler = Reconciler::new(Arc::clone(&state), syncer, locks);
        let identity = IdentityServer::new(&config);

        tracing::info!(
            node_id = %config.node_id,
            driver = %config.driver_name,
            root = %config.paths.root.display(),
            volumes = state.volume_ids().len(),
            "Driver initialized"
        );

        Ok(Self {
            config,
            source,
            state,
            metrics,
            node,
            reconciler,
            identity,
        })
    }

    /// Configuration the driver was built from.
    #[must_use]
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Volume state.
    #[must_use]
    pub const fn state(&self) -> &Arc<VolumeStateStore> {
        &self.state
    }

    /// Shared counters.
    #[must_use]
    pub const fn metrics(&self) -> &Arc<DriverMetrics> {
        &self.metrics
    }

    /// Node service.
    #[must_use]
    pub const fn node(&self) -> &NodeServer {
        &self.node
    }

    /// Reconciler.
    #[must_use]
    pub const fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Identity service.
    #[must_use]
    pub const fn identity(&self) -> &IdentityServer {
        &self.identity
    }

    /// Watcher over the driver's bundle source.
    #[must_use]
    pub fn watcher(&self) -> BundleWatcher {
        BundleWatcher::new(Arc::clone(&self.source), self.config.resync_interval)
    }
}
