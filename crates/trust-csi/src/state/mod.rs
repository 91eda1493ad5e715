//! Volume state persistence.
//!
//! Every published volume has a record at `<tmpfs>/<volume>/metadata`. The
//! store keeps those records in memory together with a [`BundleIndex`] so
//! the reconciler can find the volumes that project a changed bundle, and
//! rebuilds both from disk on start.

mod index;

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use trust_csi_common::{CsiError, CsiResult, DriverPaths, VolumeId};

pub use index::BundleIndex;

use crate::filesystem::Mounter;
use crate::metadata::{MetadataCodec, VolumeMetadata};

/// Mode of the tmpfs directory.
const TMPFS_MODE: u32 = 0o700;

/// Mode of a persisted record.
const RECORD_MODE: u32 = 0o644;

#[derive(Debug, Default)]
struct Inner {
    volumes: HashMap<VolumeId, VolumeMetadata>,
    index: BundleIndex,
}

impl Inner {
    fn insert(&mut self, metadata: VolumeMetadata) {
        let id = metadata.volume_id.clone();
        if let Some(previous) = self.volumes.remove(&id) {
            self.index.remove(&previous.bundle, &id);
        }
        self.index.insert(&metadata.bundle, id.clone());
        self.volumes.insert(id, metadata);
    }
}

/// Tracks the volumes this node serves.
#[derive(Debug)]
pub struct VolumeStateStore {
    paths: DriverPaths,
    codec: Arc<dyn MetadataCodec>,
    inner: RwLock<Inner>,
}

impl VolumeStateStore {
    /// Prepare the backing area and load every persisted record.
    ///
    /// With a `mounter`, a tmpfs is mounted on the backing area unless one
    /// is already there. Without one the area is a plain directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing area cannot be prepared, and
    /// [`CsiError::CorruptRecord`] if any volume record cannot be read or
    /// decoded.
    pub fn initialize(
        paths: DriverPaths,
        codec: Arc<dyn MetadataCodec>,
        mounter: Option<&dyn Mounter>,
    ) -> CsiResult<Self> {
        let tmpfs = paths.tmpfs();
        if !tmpfs.exists() {
            std::fs::create_dir_all(&tmpfs)?;
            set_mode(&tmpfs, TMPFS_MODE)?;
        }

        if let Some(mounter) = mounter {
            if mounter.is_mount_point(&tmpfs)? {
                tracing::info!(path = %tmpfs.display(), "Existing tmpfs mount found");
            } else {
                tracing::info!(path = %tmpfs.display(), "Creating tmpfs mount");
                mounter.mount_tmpfs(&tmpfs)?;
            }
        }

        let mut inner = Inner::default();
        for entry in std::fs::read_dir(&tmpfs)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let metadata = load_record(&paths, codec.as_ref(), &name)?;
            tracing::info!(volume_id = %name, bundle = %metadata.bundle, "Found existing volume");
            inner.insert(metadata);
        }

        tracing::debug!(
            volumes = inner.volumes.len(),
            bundles = inner.index.len(),
            "Loaded volume state"
        );

        Ok(Self {
            paths,
            codec,
            inner: RwLock::new(inner),
        })
    }

    /// Paths the store works below.
    #[must_use]
    pub const fn paths(&self) -> &DriverPaths {
        &self.paths
    }

    /// Persist `metadata` and make the volume eligible for resync.
    ///
    /// The record is on disk before it becomes visible in the index.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing the record fails; the
    /// in-memory state is unchanged in that case.
    pub fn track(&self, metadata: VolumeMetadata) -> CsiResult<()> {
        let data = self.codec.encode(&metadata)?;
        let path = self.paths.volume_metadata(metadata.volume_id.as_str());
        write_record(&path, &data)?;

        tracing::debug!(
            volume_id = %metadata.volume_id,
            bundle = %metadata.bundle,
            path = %path.display(),
            "Tracking volume"
        );

        self.inner.write().insert(metadata);
        Ok(())
    }

    /// Stop resyncing a volume. The persisted record is left in place.
    ///
    /// Unknown volumes are ignored.
    pub fn stop_sync(&self, volume_id: &VolumeId) {
        let mut inner = self.inner.write();
        if let Some(metadata) = inner.volumes.remove(volume_id) {
            inner.index.remove(&metadata.bundle, volume_id);
            tracing::debug!(volume_id = %volume_id, bundle = %metadata.bundle, "Stopped syncing volume");
        }
    }

    /// Snapshot of every record tracking `bundle`.
    #[must_use]
    pub fn metadata_for_bundle(&self, bundle: &str) -> Vec<VolumeMetadata> {
        let inner = self.inner.read();
        inner
            .index
            .volumes(bundle)
            .iter()
            .filter_map(|id| inner.volumes.get(id).cloned())
            .collect()
    }

    /// Record of one volume.
    #[must_use]
    pub fn get(&self, volume_id: &VolumeId) -> Option<VolumeMetadata> {
        self.inner.read().volumes.get(volume_id).cloned()
    }

    /// IDs of every tracked volume, sorted.
    #[must_use]
    pub fn volume_ids(&self) -> Vec<VolumeId> {
        let mut ids: Vec<VolumeId> = self.inner.read().volumes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Names of every tracked bundle, sorted.
    #[must_use]
    pub fn bundles(&self) -> Vec<String> {
        self.inner.read().index.bundles()
    }
}

fn load_record(
    paths: &DriverPaths,
    codec: &dyn MetadataCodec,
    name: &str,
) -> CsiResult<VolumeMetadata> {
    let corrupt = |message: String| CsiError::CorruptRecord {
        volume_id: name.to_string(),
        message,
    };

    let data = std::fs::read(paths.volume_metadata(name))
        .map_err(|e| corrupt(format!("could not read record: {e}")))?;
    let metadata = codec
        .decode(&data)
        .map_err(|e| corrupt(format!("could not decode record: {e}")))?;

    if metadata.volume_id.as_str() != name {
        return Err(corrupt(format!(
            "record belongs to volume {}",
            metadata.volume_id
        )));
    }

    Ok(metadata)
}

fn write_record(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);
    set_mode(path, RECORD_MODE)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
