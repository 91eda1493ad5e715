//! Bundle rendering.
//!
//! Turns a PEM bundle into a [`Payload`] for the [`AtomicWriter`] according
//! to a volume's requested outputs:
//!
//! - `ConcatenatedFile`: one file holding every certificate, each preceded
//!   by a `# <subject>` comment line
//! - `OpenSSLRehash`: a directory of `<subject hash>.<n>` files, one
//!   certificate each, as laid out by `c_rehash`
//!
//! [`AtomicWriter`]: crate::projection::AtomicWriter

pub mod hash;
pub mod pem;

use std::collections::HashMap;

use trust_csi_common::CsiResult;

pub use hash::{certificate_subject_hash, subject_hash};
pub use pem::{BundleCertificate, encode_pem, parse_bundle};

use crate::metadata::{Output, OutputFormat};
use crate::projection::{FileProjection, Payload};

/// Mode of every rendered file.
pub const OUTPUT_FILE_MODE: u32 = 0o440;

/// Renders bundles into projection payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct BundleRenderer;

impl BundleRenderer {
    /// Create a renderer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Render `bundle` for every output.
    ///
    /// When two outputs produce the same key the later one wins.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundle holds a malformed certificate.
    pub fn render(&self, bundle: &[u8], outputs: &[Output]) -> CsiResult<Payload> {
        let certificates = parse_bundle(bundle)?;
        Ok(self.render_parsed(&certificates, outputs))
    }

    /// Render already parsed certificates.
    #[must_use]
    pub fn render_parsed(&self, certificates: &[BundleCertificate], outputs: &[Output]) -> Payload {
        let mut payload = Payload::new();

        for output in outputs {
            match output.format {
                OutputFormat::ConcatenatedFile => {
                    let key = output.path.trim_start_matches('/').to_string();
                    payload.insert(key, owned(concatenate(certificates), output));
                }
                OutputFormat::OpensslRehash => {
                    for (name, pem) in rehash_names(certificates) {
                        let key = join_key(&output.path, &name);
                        payload.insert(key, owned(pem.as_bytes().to_vec(), output));
                    }
                }
            }
        }

        tracing::debug!(
            certificates = certificates.len(),
            files = payload.len(),
            "Rendered bundle"
        );
        payload
    }
}

fn owned(data: Vec<u8>, output: &Output) -> FileProjection {
    FileProjection::new(data, OUTPUT_FILE_MODE).with_owner(output.uid, output.gid)
}

fn concatenate(certificates: &[BundleCertificate]) -> Vec<u8> {
    let mut out = String::new();
    for cert in certificates {
        out.push_str("\n# ");
        out.push_str(&cert.subject);
        out.push('\n');
        out.push_str(&cert.pem);
    }

    let mut out = out.trim().to_string();
    out.push('\n');
    out.into_bytes()
}

/// `<hash>.<n>` names in bundle order, `n` counting up per colliding hash.
fn rehash_names(certificates: &[BundleCertificate]) -> Vec<(String, &str)> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    certificates
        .iter()
        .map(|cert| {
            let n = seen.entry(cert.subject_hash.as_str()).or_default();
            let name = format!("{}.{n}", cert.subject_hash);
            *n += 1;
            (name, cert.pem.as_str())
        })
        .collect()
}

fn join_key(dir: &str, name: &str) -> String {
    let dir = dir.trim_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}
