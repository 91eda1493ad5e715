//! Publish and unpublish requests.

use std::collections::BTreeMap;
use std::path::PathBuf;

use trust_csi_common::{CsiError, CsiResult, VolumeId};

use crate::metadata::{Output, OutputFormat, VolumeMetadata};
use crate::projection::validate_path;

/// Volume context key marking an inline ephemeral volume.
pub const EPHEMERAL_KEY: &str = "csi.storage.k8s.io/ephemeral";
/// Volume context key holding the pod namespace.
pub const POD_NAMESPACE_KEY: &str = "csi.storage.k8s.io/pod.namespace";
/// Volume context key naming the bundle.
pub const BUNDLE_KEY: &str = "trust.cert-manager.io/bundle";
/// Volume context key listing concatenated file paths.
pub const CONCATENATED_FILES_KEY: &str = "trust.cert-manager.io/concatenated-files";
/// Volume context key listing rehash directory paths.
pub const OPENSSL_REHASH_KEY: &str = "trust.cert-manager.io/openssl-rehash";

/// Request to make a volume available at a target path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishRequest {
    /// Volume ID chosen by the kubelet.
    pub volume_id: String,
    /// Where the pod expects the volume.
    pub target_path: PathBuf,
    /// Whether the pod mounts the volume read-only.
    pub readonly: bool,
    /// Volume attributes from the pod spec plus the kubelet's pod info.
    pub volume_context: BTreeMap<String, String>,
    /// fsGroup delegated by the kubelet, if any.
    pub volume_mount_group: Option<String>,
}

/// Request to tear a volume down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpublishRequest {
    /// Volume ID.
    pub volume_id: String,
    /// Target path the volume was published at.
    pub target_path: PathBuf,
}

/// A publish request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPublish {
    /// Target path.
    pub target_path: PathBuf,
    /// Record to sync and track.
    pub metadata: VolumeMetadata,
}

impl PublishRequest {
    /// Create a request for an inline ephemeral volume.
    pub fn ephemeral(
        volume_id: impl Into<String>,
        target_path: impl Into<PathBuf>,
        namespace: &str,
        bundle: &str,
    ) -> Self {
        let mut volume_context = BTreeMap::new();
        volume_context.insert(EPHEMERAL_KEY.to_string(), "true".to_string());
        volume_context.insert(POD_NAMESPACE_KEY.to_string(), namespace.to_string());
        volume_context.insert(BUNDLE_KEY.to_string(), bundle.to_string());

        Self {
            volume_id: volume_id.into(),
            target_path: target_path.into(),
            readonly: true,
            volume_context,
            volume_mount_group: None,
        }
    }

    /// Set a context attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.volume_context.insert(key.to_string(), value.into());
        self
    }

    /// Set the delegated fsGroup.
    #[must_use]
    pub fn with_mount_group(mut self, group: impl Into<String>) -> Self {
        self.volume_mount_group = Some(group.into());
        self
    }

    /// Check the request and build the volume record.
    ///
    /// # Errors
    ///
    /// Returns [`CsiError::InvalidRequest`] or [`CsiError::InvalidVolumeId`]
    /// describing the first problem found.
    pub fn validate(&self) -> CsiResult<ValidatedPublish> {
        let volume_id = VolumeId::new(self.volume_id.clone())?;
        if self.target_path.as_os_str().is_empty() {
            return Err(CsiError::invalid_request("target path is not set"));
        }

        if self.attribute(EPHEMERAL_KEY) != Some("true") {
            return Err(CsiError::invalid_request(
                "only ephemeral volume types are supported",
            ));
        }
        if !self.readonly {
            return Err(CsiError::invalid_request(
                "pod.spec.volumes[].csi.readOnly must be set to 'true'",
            ));
        }

        let pod_namespace = self
            .attribute(POD_NAMESPACE_KEY)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CsiError::invalid_request("namespace is not set in volume context"))?;
        let bundle = self
            .attribute(BUNDLE_KEY)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CsiError::invalid_request("bundle is not set in volume context"))?;

        let gid = parse_mount_group(self.volume_mount_group.as_deref())?;

        let mut outputs = Vec::new();
        for path in self.list_attribute(CONCATENATED_FILES_KEY)? {
            let path = clean_absolute(&path);
            if path == "/" {
                return Err(CsiError::invalid_request(
                    "concatenated-files entries must name a file",
                ));
            }
            outputs.push(Output {
                format: OutputFormat::ConcatenatedFile,
                path,
                uid: None,
                gid,
            });
        }
        for path in self.list_attribute(OPENSSL_REHASH_KEY)? {
            outputs.push(Output {
                format: OutputFormat::OpensslRehash,
                path: clean_absolute(&path),
                uid: None,
                gid,
            });
        }
        if outputs.is_empty() {
            return Err(CsiError::invalid_request("no outputs specified"));
        }
        check_outputs(&outputs)?;

        Ok(ValidatedPublish {
            target_path: self.target_path.clone(),
            metadata: VolumeMetadata {
                volume_id,
                pod_namespace: pod_namespace.to_string(),
                bundle: bundle.to_string(),
                outputs,
            },
        })
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        self.volume_context.get(key).map(String::as_str)
    }

    fn list_attribute(&self, key: &str) -> CsiResult<Vec<String>> {
        split_list(self.attribute(key).unwrap_or_default())
            .map_err(|reason| CsiError::invalid_request(format!("could not parse {key}: {reason}")))
    }
}

/// Reject output paths the writer would refuse, and concatenated files that
/// would have to be a directory for another output.
fn check_outputs(outputs: &[Output]) -> CsiResult<()> {
    for output in outputs {
        let relative = output.path.trim_start_matches('/');
        if !relative.is_empty() {
            validate_path(relative)?;
        }
    }

    let files = outputs
        .iter()
        .filter(|o| o.format == OutputFormat::ConcatenatedFile);
    for file in files {
        let nested = format!("{}/", file.path);
        let conflict = outputs.iter().find(|other| {
            let is_dir = other.format == OutputFormat::OpensslRehash;
            (is_dir && other.path == file.path) || other.path.starts_with(&nested)
        });
        if let Some(other) = conflict {
            return Err(CsiError::invalid_request(format!(
                "concatenated file {} overlaps {} output {}",
                file.path, other.format, other.path
            )));
        }
    }
    Ok(())
}

fn parse_mount_group(group: Option<&str>) -> CsiResult<Option<u32>> {
    match group {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse::<u32>()
            .ok()
            .filter(|gid| *gid != u32::MAX)
            .map(Some)
            .ok_or_else(|| {
                CsiError::invalid_request(format!("could not parse volume_mount_group {value:?}"))
            }),
    }
}

/// Split one comma separated record.
///
/// Fields may be double quoted, with `""` standing for a literal quote.
/// Leading whitespace of each field is dropped. Input after the first line
/// break is ignored. An empty input has no fields.
pub fn split_list(input: &str) -> Result<Vec<String>, String> {
    let line = input.split('\n').next().unwrap_or_default();
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let mut field = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') if chars.peek() == Some(&'"') => {
                        chars.next();
                        field.push('"');
                    }
                    Some('"') => break,
                    Some(c) => field.push(c),
                    None => return Err("unterminated quoted field".to_string()),
                }
            }
            match chars.next() {
                None => {
                    fields.push(field);
                    return Ok(fields);
                }
                Some(',') => fields.push(field),
                Some(c) => return Err(format!("unexpected {c:?} after quoted field")),
            }
        } else {
            loop {
                match chars.next() {
                    None => {
                        fields.push(field);
                        return Ok(fields);
                    }
                    Some(',') => break,
                    Some('"') => return Err("bare quote in unquoted field".to_string()),
                    Some(c) => field.push(c),
                }
            }
            fields.push(field);
        }
    }
}

/// Lexically clean `path` as if joined onto `/`, so `..` cannot climb above
/// the volume root.
#[must_use]
pub fn clean_absolute(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}
