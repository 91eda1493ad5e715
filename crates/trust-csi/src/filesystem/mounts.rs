//! Mount operations.

use std::fmt;
use std::io;
use std::path::Path;

use trust_csi_common::{CsiError, CsiResult};

/// Mount operations the node agent needs.
///
/// [`SystemMounter`] performs real mounts; tests substitute a recorder.
pub trait Mounter: Send + Sync + fmt::Debug {
    /// Whether `path` is currently a mount point. A missing path is not.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table cannot be consulted.
    fn is_mount_point(&self, path: &Path) -> CsiResult<bool>;

    /// Mount a private tmpfs with mode 0700 on `target`.
    ///
    /// # Errors
    ///
    /// Returns [`CsiError::Mount`] if the mount fails.
    fn mount_tmpfs(&self, target: &Path) -> CsiResult<()>;

    /// Bind `source` onto `target` read-only.
    ///
    /// # Errors
    ///
    /// Returns [`CsiError::Mount`] if either the bind or the read-only remount
    /// fails. A failed remount leaves nothing mounted.
    fn bind_read_only(&self, source: &Path, target: &Path) -> CsiResult<()>;

    /// Unmount `target`.
    ///
    /// # Errors
    ///
    /// Returns [`CsiError::Mount`] if the unmount fails.
    fn unmount(&self, target: &Path) -> CsiResult<()>;
}

/// Mounter backed by the `mount(2)` family of syscalls.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMounter;

fn mount_error(target: &Path, source: impl Into<io::Error>) -> CsiError {
    CsiError::Mount {
        target: target.display().to_string(),
        source: source.into(),
    }
}

#[cfg(target_os = "linux")]
impl Mounter for SystemMounter {
    fn is_mount_point(&self, path: &Path) -> CsiResult<bool> {
        super::mountinfo::is_mount_point(path)
    }

    fn mount_tmpfs(&self, target: &Path) -> CsiResult<()> {
        use rustix::mount::{MountFlags, mount};

        tracing::debug!(target = %target.display(), "Mounting tmpfs");

        mount(
            "tmpfs",
            target,
            "tmpfs",
            MountFlags::NOSUID | MountFlags::NODEV,
            c"mode=0700",
        )
        .map_err(|e| mount_error(target, e))
    }

    fn bind_read_only(&self, source: &Path, target: &Path) -> CsiResult<()> {
        use rustix::mount::{MountFlags, UnmountFlags, mount_bind, mount_remount, unmount};

        tracing::debug!(
            source = %source.display(),
            target = %target.display(),
            "Creating read-only bind mount"
        );

        mount_bind(source, target).map_err(|e| mount_error(target, e))?;

        // The read-only flag only takes effect on a remount of the bind.
        if let Err(e) = mount_remount(target, MountFlags::BIND | MountFlags::RDONLY, "") {
            if let Err(undo) = unmount(target, UnmountFlags::empty()) {
                tracing::warn!(
                    target = %target.display(),
                    error = %undo,
                    "Failed to undo bind mount"
                );
            }
            return Err(mount_error(target, e));
        }

        Ok(())
    }

    fn unmount(&self, target: &Path) -> CsiResult<()> {
        use rustix::mount::{UnmountFlags, unmount};

        tracing::debug!(target = %target.display(), "Unmounting");

        unmount(target, UnmountFlags::empty()).map_err(|e| mount_error(target, e))
    }
}

#[cfg(not(target_os = "linux"))]
impl Mounter for SystemMounter {
    fn is_mount_point(&self, _path: &Path) -> CsiResult<bool> {
        Ok(false)
    }

    fn mount_tmpfs(&self, _target: &Path) -> CsiResult<()> {
        Err(CsiError::Unsupported {
            feature: "tmpfs mounts".to_string(),
        })
    }

    fn bind_read_only(&self, _source: &Path, _target: &Path) -> CsiResult<()> {
        Err(CsiError::Unsupported {
            feature: "bind mounts".to_string(),
        })
    }

    fn unmount(&self, _target: &Path) -> CsiResult<()> {
        Err(CsiError::Unsupported {
            feature: "unmount".to_string(),
        })
    }
}
