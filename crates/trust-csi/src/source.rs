//! Where bundle content comes from.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use trust_csi_common::{CsiError, CsiResult};

/// Default directory read by [`DirectoryBundleSource`].
pub const DEFAULT_BUNDLE_DIR: &str = "/etc/trust-csi/bundles";

/// Supplies the current content of a bundle.
pub trait BundleSource: Send + Sync + fmt::Debug {
    /// PEM content of `bundle` as seen from `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`CsiError::BundleNotFound`] if the bundle has no content for
    /// the namespace.
    fn load(&self, namespace: &str, bundle: &str) -> CsiResult<Vec<u8>>;

    /// Every `(namespace, bundle)` pair with content, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be enumerated.
    fn list(&self) -> CsiResult<Vec<(String, String)>>;
}

/// Reads bundles from `<root>/<namespace>/<bundle>` files.
///
/// The directory is typically populated by a sidecar that mirrors the
/// bundle's target ConfigMaps or Secrets.
#[derive(Debug, Clone)]
pub struct DirectoryBundleSource {
    root: PathBuf,
}

impl DirectoryBundleSource {
    /// Create a source rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding `bundle` for `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`CsiError::InvalidRequest`] if either name is not a single
    /// path segment.
    pub fn bundle_path(&self, namespace: &str, bundle: &str) -> CsiResult<PathBuf> {
        check_segment("namespace", namespace)?;
        check_segment("bundle", bundle)?;
        Ok(self.root.join(namespace).join(bundle))
    }
}

fn check_segment(kind: &str, value: &str) -> CsiResult<()> {
    if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\0']) {
        return Err(CsiError::invalid_request(format!(
            "{kind} {value:?} is not a valid name"
        )));
    }
    Ok(())
}

impl BundleSource for DirectoryBundleSource {
    fn load(&self, namespace: &str, bundle: &str) -> CsiResult<Vec<u8>> {
        let path = self.bundle_path(namespace, bundle)?;
        match std::fs::read(&path) {
            Ok(data) => {
                tracing::debug!(
                    namespace,
                    bundle,
                    path = %path.display(),
                    bytes = data.len(),
                    "Loaded bundle"
                );
                Ok(data)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CsiError::BundleNotFound {
                namespace: namespace.to_string(),
                bundle: bundle.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> CsiResult<Vec<(String, String)>> {
        let mut found = Vec::new();
        if !self.root.is_dir() {
            return Ok(found);
        }

        for namespace in std::fs::read_dir(&self.root)? {
            let namespace = namespace?;
            if !namespace.file_type()?.is_dir() {
                continue;
            }
            let namespace_name = namespace.file_name().to_string_lossy().into_owned();

            for bundle in std::fs::read_dir(namespace.path())? {
                let bundle = bundle?;
                let name = bundle.file_name().to_string_lossy().into_owned();
                // Mirrors commonly write through hidden temp files.
                if name.starts_with('.') || !bundle.path().is_file() {
                    continue;
                }
                found.push((namespace_name.clone(), name));
            }
        }

        found.sort();
        Ok(found)
    }
}
