//! Per-volume metadata.
//!
//! [`VolumeMetadata`] is the unversioned shape the driver works with. On disk
//! it is stored through a [`MetadataCodec`] as a versioned YAML document; see
//! [`v1alpha1`] for the current storage schema.

pub mod codec;
pub mod v1alpha1;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use trust_csi_common::{CsiError, VolumeId};

pub use codec::{MetadataCodec, StorageVersion, VersionedCodec};

/// How a bundle is laid out inside a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OutputFormat {
    /// All certificates in one PEM file.
    #[serde(rename = "ConcatenatedFile")]
    ConcatenatedFile,
    /// One file per certificate named by OpenSSL subject hash.
    #[serde(rename = "OpenSSLRehash")]
    OpensslRehash,
}

impl OutputFormat {
    /// Wire name of the format.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConcatenatedFile => "ConcatenatedFile",
            Self::OpensslRehash => "OpenSSLRehash",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = CsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ConcatenatedFile" => Ok(Self::ConcatenatedFile),
            "OpenSSLRehash" => Ok(Self::OpensslRehash),
            other => Err(CsiError::Serialization(format!(
                "unknown output format {other:?}"
            ))),
        }
    }
}

/// One requested rendering of the bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Output {
    /// Layout of the rendered files.
    pub format: OutputFormat,
    /// Absolute path inside the volume: a file for `ConcatenatedFile`, a
    /// directory for `OpenSSLRehash`.
    pub path: String,
    /// Owner applied to the rendered files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    /// Group applied to the rendered files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
}

/// Everything the driver needs to re-render a published volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMetadata {
    /// Volume the record belongs to.
    pub volume_id: VolumeId,
    /// Namespace of the pod the volume is mounted into.
    pub pod_namespace: String,
    /// Name of the bundle projected into the volume.
    pub bundle: String,
    /// Requested outputs, in request order.
    pub outputs: Vec<Output>,
}
