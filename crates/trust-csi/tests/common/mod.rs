//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;
use trust_csi::config::DriverConfig;
use trust_csi::driver::Driver;
use trust_csi::filesystem::Mounter;
use trust_csi::source::DirectoryBundleSource;
use trust_csi_common::{CsiError, CsiResult};

pub const ENTRUST_ROOT: &str = include_str!("../data/entrust_root_g4.pem");
pub const EXAMPLE_ROOT_A: &str = include_str!("../data/example_root_a.pem");
pub const EXAMPLE_ROOT_B: &str = include_str!("../data/example_root_b.pem");

/// One call made against a [`RecordingMounter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountCall {
    Tmpfs(PathBuf),
    Bind { source: PathBuf, target: PathBuf },
    Unmount(PathBuf),
}

/// Mounter that only records what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingMounter {
    mounted: Mutex<BTreeSet<PathBuf>>,
    calls: Mutex<Vec<MountCall>>,
    fail_bind: bool,
}

impl RecordingMounter {
    pub fn failing_bind() -> Self {
        Self {
            fail_bind: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<MountCall> {
        self.calls.lock().clone()
    }

    pub fn binds(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MountCall::Bind { .. }))
            .count()
    }

    pub fn is_mounted(&self, path: &Path) -> bool {
        self.mounted.lock().contains(path)
    }
}

impl Mounter for RecordingMounter {
    fn is_mount_point(&self, path: &Path) -> CsiResult<bool> {
        Ok(self.is_mounted(path))
    }

    fn mount_tmpfs(&self, target: &Path) -> CsiResult<()> {
        self.calls.lock().push(MountCall::Tmpfs(target.to_path_buf()));
        self.mounted.lock().insert(target.to_path_buf());
        Ok(())
    }

    fn bind_read_only(&self, source: &Path, target: &Path) -> CsiResult<()> {
        self.calls.lock().push(MountCall::Bind {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
        });
        if self.fail_bind {
            return Err(CsiError::Mount {
                target: target.display().to_string(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            });
        }
        self.mounted.lock().insert(target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> CsiResult<()> {
        self.calls.lock().push(MountCall::Unmount(target.to_path_buf()));
        self.mounted.lock().remove(target);
        Ok(())
    }
}

/// A data root, a bundle directory and a place for pod targets.
pub struct Fixture {
    pub temp: TempDir,
    pub mounter: Arc<RecordingMounter>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_mounter(RecordingMounter::default())
    }

    pub fn with_mounter(mounter: RecordingMounter) -> Self {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("bundles")).unwrap();
        std::fs::create_dir_all(temp.path().join("pods")).unwrap();
        Self {
            temp,
            mounter: Arc::new(mounter),
        }
    }

    pub fn config(&self) -> DriverConfig {
        DriverConfig::default()
            .with_node_id("node-a")
            .with_root(self.temp.path().join("root"))
            .with_bundle_dir(self.temp.path().join("bundles"))
    }

    pub fn driver(&self) -> Driver {
        let config = self.config();
        let source = Arc::new(DirectoryBundleSource::new(config.bundle_dir.clone()));
        Driver::initialize(config, source, self.mounter.clone()).unwrap()
    }

    pub fn set_bundle(&self, namespace: &str, bundle: &str, content: &str) {
        let dir = self.temp.path().join("bundles").join(namespace);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(bundle), content).unwrap();
    }

    pub fn remove_bundle(&self, namespace: &str, bundle: &str) {
        std::fs::remove_file(self.temp.path().join("bundles").join(namespace).join(bundle)).unwrap();
    }

    pub fn target(&self, pod: &str) -> PathBuf {
        self.temp.path().join("pods").join(pod).join("volume")
    }
}
