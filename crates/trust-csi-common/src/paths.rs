//! Filesystem layout below the driver data root.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default data root for the node agent.
pub static TRUST_CSI_DATA_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("TRUST_CSI_DATA_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/run/trust-csi"))
});

/// Name of the per-volume record file.
pub const METADATA_FILE: &str = "metadata";

/// Name of the per-volume projection directory.
pub const DATA_DIR: &str = "data";

/// Standard paths used by the node agent.
///
/// ```text
/// <root>/tmpfs/                    in-memory backing area
/// <root>/tmpfs/<volume>/           volume root
/// <root>/tmpfs/<volume>/data/      projection target
/// <root>/tmpfs/<volume>/metadata   persisted volume record
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverPaths {
    /// Data root directory (default: /var/run/trust-csi).
    pub root: PathBuf,
}

impl DriverPaths {
    /// Create paths with the default data root.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom data root.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Backing area that holds every volume.
    #[must_use]
    pub fn tmpfs(&self) -> PathBuf {
        self.root.join("tmpfs")
    }

    /// Root directory of a volume.
    #[must_use]
    pub fn volume_root(&self, volume_id: &str) -> PathBuf {
        self.tmpfs().join(volume_id)
    }

    /// Directory the bundle is projected into.
    #[must_use]
    pub fn volume_data(&self, volume_id: &str) -> PathBuf {
        self.volume_root(volume_id).join(DATA_DIR)
    }

    /// Persisted record of a volume.
    #[must_use]
    pub fn volume_metadata(&self, volume_id: &str) -> PathBuf {
        self.volume_root(volume_id).join(METADATA_FILE)
    }
}

impl Default for DriverPaths {
    fn default() -> Self {
        Self {
            root: TRUST_CSI_DATA_ROOT.clone(),
        }
    }
}
