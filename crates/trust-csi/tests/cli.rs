//! Integration tests for the command line interface.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

const ENTRUST_ROOT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/entrust_root_g4.pem");
const EXAMPLE_ROOTS: [&str; 2] = [
    concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/example_root_a.pem"),
    concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/example_root_b.pem"),
];

fn trust_csi() -> Command {
    let mut cmd = Command::cargo_bin("trust-csi").unwrap();
    for var in [
        "TRUST_CSI_DATA_ROOT",
        "TRUST_CSI_NODE_ID",
        "TRUST_CSI_DRIVER_NAME",
        "TRUST_CSI_BUNDLE_DIR",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn hash_prints_subject_hash() {
    trust_csi()
        .args(["hash", ENTRUST_ROOT])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("5e98733a  C=US, O=Entrust, Inc."));
}

#[test]
fn hash_rejects_garbage() {
    let temp = tempdir().unwrap();
    let file = temp.path().join("bad.pem");
    std::fs::write(&file, "-----BEGIN CERTIFICATE-----\nnot base64!\n-----END CERTIFICATE-----\n")
        .unwrap();

    trust_csi()
        .args(["hash"])
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid certificate"));
}

#[test]
fn render_writes_rehash_directory() {
    let temp = tempdir().unwrap();
    let bundle = temp.path().join("bundle.pem");
    let content: String = EXAMPLE_ROOTS
        .iter()
        .map(|p| std::fs::read_to_string(p).unwrap())
        .collect();
    std::fs::write(&bundle, content).unwrap();
    let out = temp.path().join("out");

    trust_csi()
        .arg("render")
        .arg(&bundle)
        .args(["--rehash", "/certs", "--concatenated", "ca.pem", "--out"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote 3 files"));

    assert!(out.join("certs/e1a33f53.0").exists());
    assert!(out.join("certs/e1a33f53.1").exists());
    assert!(out.join("ca.pem").exists());

    trust_csi()
        .arg("render")
        .arg(&bundle)
        .args(["--rehash", "/certs", "--concatenated", "ca.pem", "--out"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("up to date"));
}

#[test]
fn render_needs_an_output() {
    let temp = tempdir().unwrap();
    trust_csi()
        .args(["render", ENTRUST_ROOT, "--out"])
        .arg(temp.path())
        .assert()
        .failure();
}

#[test]
fn list_on_empty_root() {
    let temp = tempdir().unwrap();
    trust_csi()
        .arg("--data-root")
        .arg(temp.path())
        .args(["--no-tmpfs", "list"])
        .assert()
        .success()
        .stdout(predicate::str::diff("VOLUME\tNAMESPACE\tBUNDLE\tOUTPUTS\n"));

    trust_csi()
        .arg("--data-root")
        .arg(temp.path())
        .args(["--no-tmpfs", "list", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::diff("[]\n"));
}

#[test]
fn info_reports_driver_name() {
    trust_csi()
        .args(["--node-id", "node-a", "info"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"name\": \"trust-manager-csi-driver\""))
        .stdout(predicate::str::contains("\"nodeId\": \"node-a\""));
}
