//! Integration tests for atomic directory projection.

use std::fs;
use std::io::Read;
use std::path::Path;

use tempfile::tempdir;
use trust_csi::projection::{
    AtomicWriter, DATA_DIR_NAME, FileProjection, NEW_DATA_DIR_NAME, Payload, WriteOutcome,
};
use trust_csi_common::CsiError;

fn payload(entries: &[(&str, &str)]) -> Payload {
    entries
        .iter()
        .map(|(path, data)| ((*path).to_string(), FileProjection::new(*data, 0o440)))
        .collect()
}

/// Snapshot directories, excluding the reserved links.
fn snapshots(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("..") && n != DATA_DIR_NAME && n != NEW_DATA_DIR_NAME)
        .collect();
    names.sort();
    names
}

fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap().path().strip_prefix(dir).unwrap().display().to_string())
        .collect();
    names.sort();
    names
}

#[test_log::test]
fn second_identical_write_is_a_no_op() {
    let temp = tempdir().unwrap();
    let writer = AtomicWriter::new(temp.path()).unwrap();
    let files = payload(&[("ca.pem", "bundle"), ("certs/abc.0", "cert")]);

    assert!(writer.write(&files, None).unwrap().is_published());
    let first = snapshots(temp.path());
    let content = fs::read(temp.path().join("ca.pem")).unwrap();

    assert_eq!(writer.write(&files, None).unwrap(), WriteOutcome::Unchanged);
    assert_eq!(snapshots(temp.path()), first);
    assert_eq!(first.len(), 1);
    assert_eq!(fs::read(temp.path().join("ca.pem")).unwrap(), content);
}

#[test]
fn open_descriptor_keeps_old_content() {
    let temp = tempdir().unwrap();
    let writer = AtomicWriter::new(temp.path()).unwrap();
    writer.write(&payload(&[("ca.pem", "old")]), None).unwrap();

    let mut before = fs::File::open(temp.path().join(DATA_DIR_NAME).join("ca.pem")).unwrap();

    writer.write(&payload(&[("ca.pem", "new")]), None).unwrap();

    let mut old = String::new();
    before.read_to_string(&mut old).unwrap();
    assert_eq!(old, "old");
    assert_eq!(fs::read_to_string(temp.path().join("ca.pem")).unwrap(), "new");
    assert_eq!(snapshots(temp.path()).len(), 1);
}

#[test_log::test]
fn recovers_from_interrupted_publish() {
    let temp = tempdir().unwrap();
    let writer = AtomicWriter::new(temp.path()).unwrap();
    writer.write(&payload(&[("ca.pem", "v1")]), None).unwrap();

    // Crash after staging a snapshot and its temporary link, before the rename.
    let orphan = temp.path().join("..2001_01_01_00_00_00.crash");
    fs::create_dir(&orphan).unwrap();
    fs::write(orphan.join("ca.pem"), "partial").unwrap();
    std::os::unix::fs::symlink("..2001_01_01_00_00_00.crash", temp.path().join(NEW_DATA_DIR_NAME))
        .unwrap();
    assert_eq!(fs::read_to_string(temp.path().join("ca.pem")).unwrap(), "v1");

    writer.write(&payload(&[("ca.pem", "v2")]), None).unwrap();

    assert_eq!(fs::read_to_string(temp.path().join("ca.pem")).unwrap(), "v2");
    assert!(fs::symlink_metadata(temp.path().join(NEW_DATA_DIR_NAME)).is_err());
    let current = writer.current_snapshot().unwrap().unwrap();
    assert_ne!(current, "..2001_01_01_00_00_00.crash");
    assert!(temp.path().join(&current).join("ca.pem").exists());
}

#[test]
fn failed_hook_leaves_previous_state_published() {
    let temp = tempdir().unwrap();
    let writer = AtomicWriter::new(temp.path()).unwrap();
    writer.write(&payload(&[("ca.pem", "v1")]), None).unwrap();
    let published = writer.current_snapshot().unwrap();

    let refuse = |_: &str| -> trust_csi_common::CsiResult<()> {
        Err(CsiError::invalid_request("simulated crash"))
    };
    assert!(writer.write(&payload(&[("ca.pem", "v2")]), Some(&refuse)).is_err());
    assert_eq!(writer.current_snapshot().unwrap(), published);
    assert_eq!(fs::read_to_string(temp.path().join("ca.pem")).unwrap(), "v1");
    assert_eq!(snapshots(temp.path()).len(), 1);

    writer.write(&payload(&[("ca.pem", "v2")]), None).unwrap();
    assert_eq!(fs::read_to_string(temp.path().join("ca.pem")).unwrap(), "v2");
    assert_eq!(snapshots(temp.path()).len(), 1);
}

#[test]
fn invalid_paths_touch_nothing() {
    let temp = tempdir().unwrap();
    let writer = AtomicWriter::new(temp.path()).unwrap();
    writer.write(&payload(&[("ca.pem", "v1")]), None).unwrap();
    let before = listing(temp.path());

    let long_segment = "s".repeat(300);
    let long_path = "a/".repeat(2500);
    for bad in ["../x", "/abs/x", long_segment.as_str(), long_path.as_str()] {
        let mut files = payload(&[("ca.pem", "v2")]);
        files.insert(bad.to_string(), FileProjection::new("evil", 0o440));

        let err = writer.write(&files, None).unwrap_err();
        assert!(matches!(err, CsiError::InvalidPath { .. }), "{bad:.20}: {err}");
        assert_eq!(listing(temp.path()), before);
    }
    assert_eq!(fs::read_to_string(temp.path().join("ca.pem")).unwrap(), "v1");
}

#[test]
fn dropped_top_level_entries_are_removed() {
    let temp = tempdir().unwrap();
    let writer = AtomicWriter::new(temp.path()).unwrap();
    writer.write(&payload(&[("a", "1"), ("b/c", "2")]), None).unwrap();
    assert!(temp.path().join("a").exists());

    writer.write(&payload(&[("b/c", "2")]), None).unwrap();

    assert!(fs::symlink_metadata(temp.path().join("a")).is_err());
    assert!(fs::symlink_metadata(temp.path().join("b")).is_ok());
    assert_eq!(fs::read_to_string(temp.path().join("b/c")).unwrap(), "2");
    assert_eq!(snapshots(temp.path()).len(), 1);
}

#[test]
fn nested_removals_only_change_the_snapshot() {
    let temp = tempdir().unwrap();
    let writer = AtomicWriter::new(temp.path()).unwrap();
    writer
        .write(&payload(&[("certs/a.0", "a"), ("certs/b.0", "b")]), None)
        .unwrap();

    let outcome = writer.write(&payload(&[("certs/a.0", "a")]), None).unwrap();

    assert!(outcome.is_published());
    assert!(temp.path().join("certs/a.0").exists());
    assert!(!temp.path().join("certs/b.0").exists());
}

#[test]
fn missing_visible_entry_is_restored_without_rewrite() {
    let temp = tempdir().unwrap();
    let writer = AtomicWriter::new(temp.path()).unwrap();
    let files = payload(&[("ca.pem", "v1")]);
    writer.write(&files, None).unwrap();

    // Crash after the swap but before the visible links were created.
    fs::remove_file(temp.path().join("ca.pem")).unwrap();

    assert_eq!(writer.write(&files, None).unwrap(), WriteOutcome::Unchanged);
    assert_eq!(fs::read_to_string(temp.path().join("ca.pem")).unwrap(), "v1");
}
