//! `metadata.trust.cert-manager.io/v1alpha1` storage schema.

use serde::{Deserialize, Serialize};
use trust_csi_common::{CsiError, CsiResult, VolumeId};

/// API version written into every record of this schema.
pub const API_VERSION: &str = "metadata.trust.cert-manager.io/v1alpha1";

/// Kind written into every record of this schema.
pub const KIND: &str = "Metadata";

/// Stored volume record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Always [`API_VERSION`].
    pub api_version: String,
    /// Always [`KIND`].
    pub kind: String,
    /// Volume ID as sent by the kubelet.
    #[serde(rename = "volumeID")]
    pub volume_id: String,
    /// Pod namespace.
    pub pod_namespace: String,
    /// Bundle name.
    pub bundle: String,
    /// Requested outputs.
    #[serde(default)]
    pub outputs: Vec<Output>,
}

/// Stored output entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    /// Output layout.
    pub format: OutputFormat,
    /// File owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<i64>,
    /// File group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<i64>,
    /// Path inside the volume. Older records spell the key in lower case.
    #[serde(rename = "Path", alias = "path")]
    pub path: String,
}

/// Stored output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum OutputFormat {
    #[serde(rename = "ConcatenatedFile")]
    ConcatenatedFile,
    #[serde(rename = "OpenSSLRehash")]
    OpensslRehash,
}

impl super::VolumeMetadata {
    /// Convert to the `v1alpha1` storage shape.
    #[must_use]
    pub fn to_storage(&self) -> Metadata {
        Metadata {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            volume_id: self.volume_id.to_string(),
            pod_namespace: self.pod_namespace.clone(),
            bundle: self.bundle.clone(),
            outputs: self
                .outputs
                .iter()
                .map(|output| Output {
                    format: match output.format {
                        super::OutputFormat::ConcatenatedFile => OutputFormat::ConcatenatedFile,
                        super::OutputFormat::OpensslRehash => OutputFormat::OpensslRehash,
                    },
                    uid: output.uid.map(i64::from),
                    gid: output.gid.map(i64::from),
                    path: output.path.clone(),
                })
                .collect(),
        }
    }

    /// Convert from the `v1alpha1` storage shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the volume ID is invalid or an owner ID does not
    /// fit a `u32`.
    pub fn from_storage(record: Metadata) -> CsiResult<Self> {
        let volume_id: VolumeId = record.volume_id.parse()?;
        let outputs = record
            .outputs
            .into_iter()
            .map(|output| {
                Ok(super::Output {
                    format: match output.format {
                        OutputFormat::ConcatenatedFile => super::OutputFormat::ConcatenatedFile,
                        OutputFormat::OpensslRehash => super::OutputFormat::OpensslRehash,
                    },
                    uid: owner_id("uid", output.uid)?,
                    gid: owner_id("gid", output.gid)?,
                    path: output.path,
                })
            })
            .collect::<CsiResult<Vec<_>>>()?;

        Ok(Self {
            volume_id,
            pod_namespace: record.pod_namespace,
            bundle: record.bundle,
            outputs,
        })
    }
}

fn owner_id(field: &str, value: Option<i64>) -> CsiResult<Option<u32>> {
    value
        .map(|id| {
            u32::try_from(id)
                .ok()
                .filter(|id| *id != u32::MAX)
                .ok_or_else(|| CsiError::Serialization(format!("{field} {id} is out of range")))
        })
        .transpose()
}
