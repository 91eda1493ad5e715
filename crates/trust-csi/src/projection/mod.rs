//! Atomic projection of file trees into a directory.
//!
//! A projection directory looks like this after a write of
//! `{"ca.pem", "certs/5e98733a.0"}`:
//!
//! ```text
//! ca.pem    -> ..data/ca.pem
//! certs     -> ..data/certs
//! ..data    -> ..2024_05_01_10_00_00.Xy7Qa2
//! ..2024_05_01_10_00_00.Xy7Qa2/ca.pem
//! ..2024_05_01_10_00_00.Xy7Qa2/certs/5e98733a.0
//! ```
//!
//! Every write lands in a fresh snapshot directory. The `..data` link is then
//! swapped with a single `rename(2)`. Readers resolving paths through the
//! visible entries see the complete old tree or the complete new tree, and
//! file descriptors opened before the swap keep reading the old snapshot.

mod path;
mod writer;

use std::collections::BTreeMap;

pub use path::{
    MAX_PATH_LENGTH, MAX_SEGMENT_LENGTH, RESERVED_PREFIX, canonicalize, clean_path, validate_path,
};
pub use writer::{AtomicWriter, DATA_DIR_NAME, NEW_DATA_DIR_NAME, SetPermsHook, WriteOutcome};

/// Content and attributes of one projected file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileProjection {
    /// File content.
    pub data: Vec<u8>,
    /// Exact permission bits, applied regardless of the process umask.
    pub mode: u32,
    /// Owning user, if the file should be chowned.
    pub uid: Option<u32>,
    /// Owning group, if the file should be chowned.
    pub gid: Option<u32>,
}

impl FileProjection {
    /// A file with the given content and mode and no ownership change.
    #[must_use]
    pub fn new(data: impl Into<Vec<u8>>, mode: u32) -> Self {
        Self {
            data: data.into(),
            mode,
            uid: None,
            gid: None,
        }
    }

    /// Set the owning user and group.
    #[must_use]
    pub const fn with_owner(mut self, uid: Option<u32>, gid: Option<u32>) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }
}

/// Relative path to file mapping for one write.
pub type Payload = BTreeMap<String, FileProjection>;
