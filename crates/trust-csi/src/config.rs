//! Driver configuration.

use std::path::PathBuf;
use std::time::Duration;

use trust_csi_common::DriverPaths;

use crate::source::DEFAULT_BUNDLE_DIR;

/// Default CSI driver name.
pub const DEFAULT_DRIVER_NAME: &str = "trust-manager-csi-driver";

/// Default CSI endpoint.
pub const DEFAULT_ENDPOINT: &str = "unix://plugin/csi.sock";

/// Driver configuration options.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Node this agent runs on.
    pub node_id: String,
    /// Name reported in plugin info.
    pub driver_name: String,
    /// CSI endpoint the kubelet connects to.
    pub endpoint: String,
    /// Paths below the data root.
    pub paths: DriverPaths,
    /// Directory read by the bundle source.
    pub bundle_dir: PathBuf,
    /// Whether to back volumes with a tmpfs mount.
    pub tmpfs: bool,
    /// How often the watcher polls for bundle changes.
    pub resync_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            driver_name: DEFAULT_DRIVER_NAME.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            paths: DriverPaths::new(),
            bundle_dir: PathBuf::from(DEFAULT_BUNDLE_DIR),
            tmpfs: true,
            resync_interval: Duration::from_secs(30),
        }
    }
}

impl DriverConfig {
    /// Set the node ID.
    #[must_use]
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    /// Set the driver name.
    #[must_use]
    pub fn with_driver_name(mut self, name: impl Into<String>) -> Self {
        self.driver_name = name.into();
        self
    }

    /// Set the CSI endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the data root.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.paths = DriverPaths::with_root(root);
        self
    }

    /// Set the bundle directory.
    #[must_use]
    pub fn with_bundle_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bundle_dir = dir.into();
        self
    }

    /// Keep volumes on the data root's filesystem instead of a tmpfs.
    #[must_use]
    pub const fn without_tmpfs(mut self) -> Self {
        self.tmpfs = false;
        self
    }

    /// Set the watcher poll interval.
    #[must_use]
    pub const fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = DriverConfig::default();
        assert_eq!(config.driver_name, "trust-manager-csi-driver");
        assert!(config.tmpfs);
        assert_eq!(config.bundle_dir, PathBuf::from("/etc/trust-csi/bundles"));
    }

    #[test]
    fn builder_pattern() {
        let config = DriverConfig::default()
            .with_node_id("node-a")
            .with_root("/custom/root")
            .without_tmpfs()
            .with_resync_interval(Duration::from_secs(5));

        assert_eq!(config.node_id, "node-a");
        assert_eq!(config.paths.tmpfs(), PathBuf::from("/custom/root/tmpfs"));
        assert!(!config.tmpfs);
        assert_eq!(config.resync_interval, Duration::from_secs(5));
    }
}
