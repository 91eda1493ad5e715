//! Versioned metadata encoding.

use std::fmt;

use serde::Deserialize;
use trust_csi_common::{CsiError, CsiResult};

use super::{VolumeMetadata, v1alpha1};

/// Encodes and decodes volume metadata records.
pub trait MetadataCodec: Send + Sync + fmt::Debug {
    /// Encode a record in the codec's target storage version.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    fn encode(&self, metadata: &VolumeMetadata) -> CsiResult<Vec<u8>>;

    /// Decode a record of any supported storage version.
    ///
    /// # Errors
    ///
    /// Returns [`CsiError::UnsupportedVersion`] for unknown versions and a
    /// serialization error for malformed records.
    fn decode(&self, data: &[u8]) -> CsiResult<VolumeMetadata>;
}

/// Storage schemas the driver can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageVersion {
    /// `metadata.trust.cert-manager.io/v1alpha1`.
    #[default]
    V1Alpha1,
}

impl StorageVersion {
    /// Version new records are written in.
    pub const CURRENT: Self = Self::V1Alpha1;

    /// Every readable version.
    pub const ALL: &'static [Self] = &[Self::V1Alpha1];

    /// `apiVersion` field value.
    #[must_use]
    pub const fn api_version(self) -> &'static str {
        match self {
            Self::V1Alpha1 => v1alpha1::API_VERSION,
        }
    }

    /// `kind` field value.
    #[must_use]
    pub const fn kind(self) -> &'static str {
        match self {
            Self::V1Alpha1 => v1alpha1::KIND,
        }
    }

    fn lookup(api_version: &str, kind: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|v| v.api_version() == api_version && v.kind() == kind)
    }
}

#[derive(Deserialize)]
struct TypeMeta {
    #[serde(rename = "apiVersion", default)]
    api_version: String,
    #[serde(default)]
    kind: String,
}

/// YAML codec that writes one storage version and reads all of them.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionedCodec {
    target: StorageVersion,
}

impl VersionedCodec {
    /// Codec writing [`StorageVersion::CURRENT`].
    #[must_use]
    pub const fn new() -> Self {
        Self::with_target(StorageVersion::CURRENT)
    }

    /// Codec writing `target`.
    #[must_use]
    pub const fn with_target(target: StorageVersion) -> Self {
        Self { target }
    }
}

impl MetadataCodec for VersionedCodec {
    fn encode(&self, metadata: &VolumeMetadata) -> CsiResult<Vec<u8>> {
        let text = match self.target {
            StorageVersion::V1Alpha1 => {
                serde_yaml::to_string(&metadata.to_storage())?
            }
        };
        Ok(text.into_bytes())
    }

    fn decode(&self, data: &[u8]) -> CsiResult<VolumeMetadata> {
        let meta: TypeMeta = serde_yaml::from_slice(data)?;
        match StorageVersion::lookup(&meta.api_version, &meta.kind) {
            Some(StorageVersion::V1Alpha1) => {
                VolumeMetadata::from_storage(serde_yaml::from_slice::<v1alpha1::Metadata>(data)?)
            }
            None => Err(CsiError::UnsupportedVersion {
                api_version: meta.api_version,
                kind: meta.kind,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Output, OutputFormat};

    fn sample() -> VolumeMetadata {
        VolumeMetadata {
            volume_id: "csi-1".parse().unwrap(),
            pod_namespace: "default".to_string(),
            bundle: "roots".to_string(),
            outputs: vec![
                Output {
                    format: OutputFormat::ConcatenatedFile,
                    path: "/etc/ssl/ca.pem".to_string(),
                    uid: None,
                    gid: Some(2000),
                },
                Output {
                    format: OutputFormat::OpensslRehash,
                    path: "/etc/ssl/certs".to_string(),
                    uid: None,
                    gid: Some(2000),
                },
            ],
        }
    }

    #[test]
    fn encodes_current_version() {
        let data = VersionedCodec::new().encode(&sample()).unwrap();
        let text = String::from_utf8(data).unwrap();
        insta::assert_snapshot!(text.trim_end(), @r"
        apiVersion: metadata.trust.cert-manager.io/v1alpha1
        kind: Metadata
        volumeID: csi-1
        podNamespace: default
        bundle: roots
        outputs:
        - format: ConcatenatedFile
          gid: 2000
          Path: /etc/ssl/ca.pem
        - format: OpenSSLRehash
          gid: 2000
          Path: /etc/ssl/certs
        ");
    }

    #[test]
    fn decodes_hand_written_record() {
        let record = "\
apiVersion: metadata.trust.cert-manager.io/v1alpha1
kind: Metadata
volumeID: csi-7
podNamespace: team-a
bundle: corp-roots
outputs:
- format: OpenSSLRehash
  uid: 1000
  path: /certs
";
        let metadata = VersionedCodec::new().decode(record.as_bytes()).unwrap();
        assert_eq!(metadata.volume_id.to_string(), "csi-7");
        assert_eq!(metadata.pod_namespace, "team-a");
        assert_eq!(metadata.bundle, "corp-roots");
        assert_eq!(metadata.outputs[0].format, OutputFormat::OpensslRehash);
        assert_eq!(metadata.outputs[0].uid, Some(1000));
        assert_eq!(metadata.outputs[0].path, "/certs");
    }

    #[test]
    fn unknown_version_is_rejected() {
        let record = "apiVersion: metadata.trust.cert-manager.io/v2\nkind: Metadata\n";
        let err = VersionedCodec::new().decode(record.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            CsiError::UnsupportedVersion { ref api_version, .. } if api_version.ends_with("/v2")
        ));

        let record = "apiVersion: metadata.trust.cert-manager.io/v1alpha1\nkind: Volume\n";
        assert!(matches!(
            VersionedCodec::new().decode(record.as_bytes()),
            Err(CsiError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(VersionedCodec::new().decode(b"\x00\x01not yaml: [").is_err());
        assert!(VersionedCodec::new().decode(b"").is_err());
    }
}
