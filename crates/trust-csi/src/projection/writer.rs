//! The double-symlink atomic writer.
//!
//! The publish instant is a `rename(2)` of `..data_tmp` over `..data`. On
//! platforms where renaming onto an existing symlink is not atomic the link
//! is removed and recreated instead, which leaves a short window in which
//! `..data` does not exist. Readers on those platforms must tolerate a
//! transient `NotFound`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, error, info, warn};
use trust_csi_common::{CsiError, CsiResult};
use walkdir::WalkDir;

use super::path::canonicalize;
use super::{FileProjection, Payload};

/// Name of the symlink that points at the current snapshot.
pub const DATA_DIR_NAME: &str = "..data";

/// Name of the staging symlink renamed over [`DATA_DIR_NAME`].
pub const NEW_DATA_DIR_NAME: &str = "..data_tmp";

/// Callback run against a fully written snapshot before it is published.
///
/// It receives the snapshot directory name, relative to the target directory.
pub type SetPermsHook<'a> = &'a dyn Fn(&str) -> CsiResult<()>;

type CleanPayload<'a> = BTreeMap<String, &'a FileProjection>;

/// Result of a successful [`AtomicWriter::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new snapshot was written and published.
    Published {
        /// Name of the new snapshot directory.
        snapshot: String,
    },
    /// The current snapshot already matched the payload.
    Unchanged,
}

impl WriteOutcome {
    /// Whether a new snapshot was published.
    #[must_use]
    pub const fn is_published(&self) -> bool {
        matches!(self, Self::Published { .. })
    }
}

/// Projects payloads into a single target directory.
///
/// The writer holds no locks. Callers must make sure only one write runs
/// against a given target directory at a time; writes to different
/// directories are independent.
#[derive(Debug, Clone)]
pub struct AtomicWriter {
    target_dir: PathBuf,
}

impl AtomicWriter {
    /// Create a writer for an existing directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `target_dir` does not exist or is not a directory.
    pub fn new(target_dir: impl Into<PathBuf>) -> CsiResult<Self> {
        let target_dir = target_dir.into();
        let meta = fs::metadata(&target_dir)
            .map_err(|e| CsiError::projection("opening target directory", e))?;
        if !meta.is_dir() {
            return Err(CsiError::projection(
                "opening target directory",
                io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("{} is not a directory", target_dir.display()),
                ),
            ));
        }

        Ok(Self { target_dir })
    }

    /// The directory this writer projects into.
    #[must_use]
    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Name of the snapshot `..data` currently points at, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the link exists but cannot be read.
    pub fn current_snapshot(&self) -> CsiResult<Option<String>> {
        match fs::read_link(self.target_dir.join(DATA_DIR_NAME)) {
            Ok(target) => Ok(Some(target.to_string_lossy().into_owned())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CsiError::projection("reading data link", e)),
        }
    }

    /// Make the target directory hold exactly `payload`.
    ///
    /// Files that differ from the current snapshot are written into a new
    /// snapshot which is then published by swapping `..data`. When nothing
    /// changed no snapshot is written, but missing user-visible entries are
    /// still recreated.
    ///
    /// # Errors
    ///
    /// Returns [`CsiError::InvalidPath`] before touching the disk if any key is
    /// invalid, and [`CsiError::Projection`] naming the failed step for I/O
    /// errors. A failure before the swap leaves the published state untouched.
    pub fn write(
        &self,
        payload: &Payload,
        set_perms: Option<SetPermsHook<'_>>,
    ) -> CsiResult<WriteOutcome> {
        let payload = clean_payload(payload).inspect_err(|err| {
            error!(dir = %self.target_dir.display(), %err, "Invalid payload");
        })?;

        let previous = self
            .current_snapshot()?
            .and_then(|link| self.owned_snapshot(&link));

        let mut removable = BTreeSet::new();
        let mut retired = None;
        let mut changed = true;
        if let Some(old_path) = previous {
            removable = paths_to_remove(&payload, &old_path)?;
            if !should_write_payload(&payload, &old_path)? && removable.is_empty() {
                debug!(
                    dir = %self.target_dir.display(),
                    snapshot = %old_path.display(),
                    "Write not required for data directory"
                );
                changed = false;
            } else {
                retired = Some(old_path);
            }
        }

        let outcome = if changed {
            let snapshot = self.publish_snapshot(&payload, set_perms)?;
            WriteOutcome::Published { snapshot }
        } else {
            WriteOutcome::Unchanged
        };

        self.create_user_visible_entries(&payload)?;
        self.remove_user_visible_paths(&removable)?;

        if let Some(old_path) = retired {
            match fs::remove_dir_all(&old_path) {
                Ok(()) => debug!(snapshot = %old_path.display(), "Removed previous snapshot"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    error!(snapshot = %old_path.display(), err = %e, "Unable to remove previous snapshot");
                    return Err(CsiError::projection("removing previous snapshot", e));
                }
            }
        }

        Ok(outcome)
    }

    /// Resolve a `..data` link target to a snapshot inside the target directory.
    fn owned_snapshot(&self, link: &str) -> Option<PathBuf> {
        let mut components = Path::new(link).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None)
                if name.to_string_lossy().starts_with(super::RESERVED_PREFIX) =>
            {
                Some(self.target_dir.join(name))
            }
            _ => {
                warn!(
                    dir = %self.target_dir.display(),
                    link,
                    "Data link does not point at a snapshot, ignoring previous state"
                );
                None
            }
        }
    }

    fn publish_snapshot(
        &self,
        payload: &CleanPayload<'_>,
        set_perms: Option<SetPermsHook<'_>>,
    ) -> CsiResult<String> {
        let snapshot = self.new_snapshot_dir()?;
        let name = snapshot
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let staged = write_payload_to_dir(payload, &snapshot)
            .and_then(|()| set_perms.map_or(Ok(()), |hook| hook(&name)));
        if let Err(err) = staged {
            error!(snapshot = %snapshot.display(), %err, "Unable to stage snapshot");
            discard(&snapshot);
            return Err(err);
        }
        debug!(snapshot = %snapshot.display(), files = payload.len(), "Wrote payload to snapshot");

        let staging_link = self.target_dir.join(NEW_DATA_DIR_NAME);
        if let Err(e) = remove_link_if_exists(&staging_link) {
            discard(&snapshot);
            return Err(CsiError::projection("removing stale temporary data link", e));
        }
        if let Err(e) = platform::symlink(Path::new(&name), &staging_link) {
            discard(&snapshot);
            return Err(CsiError::projection("creating temporary data link", e));
        }

        let data_link = self.target_dir.join(DATA_DIR_NAME);
        if let Err(e) = platform::replace_link(&staging_link, &data_link, Path::new(&name)) {
            if let Err(cleanup) = remove_link_if_exists(&staging_link) {
                warn!(link = %staging_link.display(), err = %cleanup, "Unable to remove temporary data link");
            }
            discard(&snapshot);
            return Err(CsiError::projection("renaming data link", e));
        }

        if let Err(e) = platform::sync_dir(&self.target_dir) {
            warn!(dir = %self.target_dir.display(), err = %e, "Unable to sync target directory");
        }

        info!(dir = %self.target_dir.display(), snapshot = %name, "Published snapshot");
        Ok(name)
    }

    fn new_snapshot_dir(&self) -> CsiResult<PathBuf> {
        let prefix = chrono::Utc::now()
            .format("..%Y_%m_%d_%H_%M_%S.")
            .to_string();
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(&self.target_dir)
            .map_err(|e| CsiError::projection("creating snapshot directory", e))?
            .keep();

        // Readable by the consuming workload regardless of umask.
        if let Err(e) = platform::set_mode(&dir, 0o755) {
            discard(&dir);
            return Err(CsiError::projection("setting snapshot directory mode", e));
        }

        Ok(dir)
    }

    fn create_user_visible_entries(&self, payload: &CleanPayload<'_>) -> CsiResult<()> {
        let top_level: BTreeSet<&str> = payload
            .keys()
            .filter_map(|path| path.split('/').next())
            .collect();

        for name in top_level {
            let visible = self.target_dir.join(name);
            match fs::symlink_metadata(&visible) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    platform::symlink(&Path::new(DATA_DIR_NAME).join(name), &visible)
                        .map_err(|e| CsiError::projection("creating user-visible entry", e))?;
                    debug!(entry = %visible.display(), "Created user-visible entry");
                }
                Err(e) => return Err(CsiError::projection("inspecting user-visible entry", e)),
            }
        }

        Ok(())
    }

    fn remove_user_visible_paths(&self, removable: &BTreeSet<String>) -> CsiResult<()> {
        let mut last_err = None;
        for name in removable.iter().filter(|path| !path.contains('/')) {
            let visible = self.target_dir.join(name);
            match remove_link_if_exists(&visible) {
                Ok(()) => debug!(entry = %visible.display(), "Pruned user-visible entry"),
                Err(e) => {
                    error!(entry = %visible.display(), err = %e, "Unable to prune user-visible entry");
                    last_err = Some(e);
                }
            }
        }

        last_err.map_or(Ok(()), |e| {
            Err(CsiError::projection("pruning user-visible entries", e))
        })
    }
}

fn clean_payload(payload: &Payload) -> CsiResult<CleanPayload<'_>> {
    payload
        .iter()
        .map(|(path, file)| Ok((canonicalize(path)?, file)))
        .collect()
}

/// Paths present in the previous snapshot that the new payload does not
/// cover, neither as a file nor as an ancestor directory of one.
fn paths_to_remove(payload: &CleanPayload<'_>, old_snapshot: &Path) -> CsiResult<BTreeSet<String>> {
    match fs::symlink_metadata(old_snapshot) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(e) => return Err(CsiError::projection("inspecting previous snapshot", e)),
    }

    let mut on_disk = BTreeSet::new();
    for entry in WalkDir::new(old_snapshot).min_depth(1) {
        let entry = entry.map_err(|e| CsiError::projection("walking previous snapshot", e.into()))?;
        if let Ok(relative) = entry.path().strip_prefix(old_snapshot) {
            on_disk.insert(slash_path(relative));
        }
    }

    let mut wanted = BTreeSet::new();
    for path in payload.keys() {
        let mut current = path.as_str();
        loop {
            wanted.insert(current.to_string());
            match current.rfind('/') {
                Some(idx) => current = &current[..idx],
                None => break,
            }
        }
    }

    Ok(on_disk.difference(&wanted).cloned().collect())
}

fn should_write_payload(payload: &CleanPayload<'_>, old_snapshot: &Path) -> CsiResult<bool> {
    for (path, file) in payload {
        match fs::read(old_snapshot.join(path)) {
            Ok(content) if content == file.data => {}
            Ok(_) => return Ok(true),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound
                        | io::ErrorKind::IsADirectory
                        | io::ErrorKind::NotADirectory
                ) =>
            {
                return Ok(true);
            }
            Err(e) => return Err(CsiError::projection("comparing payload", e)),
        }
    }

    Ok(false)
}

fn write_payload_to_dir(payload: &CleanPayload<'_>, dir: &Path) -> CsiResult<()> {
    for (path, file) in payload {
        let full = dir.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CsiError::projection("creating snapshot subdirectory", e))?;
        }

        let mut handle = platform::create_new(&full, file.mode)
            .map_err(|e| CsiError::projection("writing snapshot file", e))?;
        handle
            .write_all(&file.data)
            .and_then(|()| handle.sync_all())
            .map_err(|e| CsiError::projection("writing snapshot file", e))?;

        // open(2) applies the umask, so set the exact bits afterwards.
        platform::set_mode(&full, file.mode)
            .map_err(|e| CsiError::projection("setting file mode", e))?;

        if file.uid.is_some() || file.gid.is_some() {
            platform::chown(&full, file.uid, file.gid)
                .map_err(|e| CsiError::projection("changing file owner", e))?;
        }
    }

    Ok(())
}

fn discard(snapshot: &Path) {
    if let Err(e) = fs::remove_dir_all(snapshot) {
        error!(snapshot = %snapshot.display(), err = %e, "Unable to remove unpublished snapshot");
    }
}

fn remove_link_if_exists(path: &Path) -> io::Result<()> {
    match platform::remove_link(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
mod platform {
    use std::fs::{self, File, OpenOptions};
    use std::io;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    use std::path::Path;

    pub fn symlink(original: &Path, link: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(original, link)
    }

    pub fn replace_link(staged: &Path, link: &Path, _original: &Path) -> io::Result<()> {
        fs::rename(staged, link)
    }

    pub fn remove_link(path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    pub fn create_new(path: &Path, mode: u32) -> io::Result<File> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(path)
    }

    pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }

    pub fn chown(path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        use rustix::fs::{Gid, Uid};

        rustix::fs::chown(path, uid.map(Uid::from_raw), gid.map(Gid::from_raw))
            .map_err(io::Error::from)
    }

    pub fn sync_dir(path: &Path) -> io::Result<()> {
        File::open(path)?.sync_all()
    }
}

#[cfg(not(unix))]
mod platform {
    use std::fs::{self, File, OpenOptions};
    use std::io;
    use std::path::Path;

    pub fn symlink(original: &Path, link: &Path) -> io::Result<()> {
        let resolved = link.parent().map_or_else(|| original.to_path_buf(), |p| p.join(original));
        if resolved.is_dir() {
            std::os::windows::fs::symlink_dir(original, link)
        } else {
            std::os::windows::fs::symlink_file(original, link)
        }
    }

    /// Not atomic: `..data` is briefly absent between the two calls.
    pub fn replace_link(staged: &Path, link: &Path, original: &Path) -> io::Result<()> {
        match remove_link(link) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
        symlink(original, link)?;
        remove_link(staged)
    }

    pub fn remove_link(path: &Path) -> io::Result<()> {
        fs::remove_file(path).or_else(|_| fs::remove_dir(path))
    }

    pub fn create_new(path: &Path, _mode: u32) -> io::Result<File> {
        OpenOptions::new().write(true).create_new(true).open(path)
    }

    pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_readonly(mode & 0o200 == 0);
        fs::set_permissions(path, perms)
    }

    pub fn chown(path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        tracing::warn!(path = %path.display(), ?uid, ?gid, "File ownership is not supported on this platform");
        Ok(())
    }

    pub fn sync_dir(_path: &Path) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn payload(entries: &[(&str, &str)]) -> Payload {
        entries
            .iter()
            .map(|(path, data)| ((*path).to_string(), FileProjection::new(*data, 0o644)))
            .collect()
    }

    #[test]
    fn missing_target_is_rejected() {
        let temp = tempdir().unwrap();
        let err = AtomicWriter::new(temp.path().join("absent")).unwrap_err();
        assert!(matches!(err, CsiError::Projection { .. }));
    }

    #[test]
    fn first_write_lays_out_links() {
        let temp = tempdir().unwrap();
        let writer = AtomicWriter::new(temp.path()).unwrap();

        let outcome = writer
            .write(&payload(&[("ca.pem", "pem"), ("certs/abc.0", "cert")]), None)
            .unwrap();
        assert!(outcome.is_published());

        let snapshot = writer.current_snapshot().unwrap().unwrap();
        assert!(snapshot.starts_with(".."));
        assert_eq!(
            fs::read_link(temp.path().join("ca.pem")).unwrap(),
            Path::new("..data/ca.pem")
        );
        assert_eq!(
            fs::read_link(temp.path().join("certs")).unwrap(),
            Path::new("..data/certs")
        );
        assert_eq!(fs::read_to_string(temp.path().join("certs/abc.0")).unwrap(), "cert");
        assert!(!temp.path().join(NEW_DATA_DIR_NAME).exists());
    }

    #[test]
    fn modes_are_exact() {
        let temp = tempdir().unwrap();
        let writer = AtomicWriter::new(temp.path()).unwrap();
        let mut files = Payload::new();
        files.insert("ro.pem".into(), FileProjection::new("x", 0o440));
        files.insert("rw.pem".into(), FileProjection::new("y", 0o666));
        writer.write(&files, None).unwrap();

        let mode = |p: &str| fs::metadata(temp.path().join(p)).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode("ro.pem"), 0o440);
        assert_eq!(mode("rw.pem"), 0o666);

        let snapshot = writer.current_snapshot().unwrap().unwrap();
        assert_eq!(mode(snapshot.as_str()), 0o755);
    }

    #[test]
    fn hook_sees_snapshot_name() {
        let temp = tempdir().unwrap();
        let writer = AtomicWriter::new(temp.path()).unwrap();
        let seen = std::cell::RefCell::new(String::new());
        let hook = |name: &str| -> CsiResult<()> {
            *seen.borrow_mut() = name.to_string();
            Ok(())
        };

        writer.write(&payload(&[("a", "1")]), Some(&hook)).unwrap();
        assert_eq!(Some(seen.into_inner()), writer.current_snapshot().unwrap());
    }

    #[test]
    fn hook_failure_discards_snapshot() {
        let temp = tempdir().unwrap();
        let writer = AtomicWriter::new(temp.path()).unwrap();
        let hook = |_: &str| -> CsiResult<()> { Err(CsiError::invalid_request("policy refused")) };

        assert!(writer.write(&payload(&[("a", "1")]), Some(&hook)).is_err());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn ownership_can_be_set_to_current_ids() {
        let temp = tempdir().unwrap();
        let writer = AtomicWriter::new(temp.path()).unwrap();
        let uid = rustix::process::getuid().as_raw();
        let gid = rustix::process::getgid().as_raw();
        let mut files = Payload::new();
        files.insert(
            "owned.pem".into(),
            FileProjection::new("x", 0o440).with_owner(Some(uid), Some(gid)),
        );

        writer.write(&files, None).unwrap();

        use std::os::unix::fs::MetadataExt;
        let meta = fs::metadata(temp.path().join("owned.pem")).unwrap();
        assert_eq!(meta.uid(), uid);
        assert_eq!(meta.gid(), gid);
    }

    #[test]
    fn foreign_data_link_is_not_followed() {
        let temp = tempdir().unwrap();
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("keep"), "precious").unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join(DATA_DIR_NAME)).unwrap();

        let writer = AtomicWriter::new(temp.path()).unwrap();
        writer.write(&payload(&[("a", "1")]), None).unwrap();

        assert_eq!(fs::read_to_string(outside.path().join("keep")).unwrap(), "precious");
        assert_eq!(fs::read_to_string(temp.path().join("a")).unwrap(), "1");
    }

    #[test]
    fn file_replaced_by_directory() {
        let temp = tempdir().unwrap();
        let writer = AtomicWriter::new(temp.path()).unwrap();
        writer.write(&payload(&[("a", "file")]), None).unwrap();

        let outcome = writer.write(&payload(&[("a/b", "nested")]), None).unwrap();
        assert!(outcome.is_published());
        assert_eq!(fs::read_to_string(temp.path().join("a/b")).unwrap(), "nested");
    }
}
