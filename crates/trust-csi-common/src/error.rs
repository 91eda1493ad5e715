//! Common error types for trust-csi.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`CsiError`].
pub type CsiResult<T> = Result<T, CsiError>;

/// Errors raised by the node agent.
#[derive(Error, Diagnostic, Debug)]
pub enum CsiError {
    /// A payload path failed validation.
    #[error("Invalid path {path:?}: {reason}")]
    #[diagnostic(
        code(trust_csi::projection::invalid_path),
        help("Payload paths must be relative, free of '..' segments and must not start with '..'")
    )]
    InvalidPath {
        /// The rejected path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A volume identifier cannot be used as a directory name.
    #[error("Invalid volume ID: {id:?}")]
    #[diagnostic(
        code(trust_csi::volume::invalid_id),
        help("Volume IDs must be a single path segment of 1-255 bytes")
    )]
    InvalidVolumeId {
        /// The rejected identifier.
        id: String,
    },

    /// A publish or unpublish request is malformed.
    #[error("Invalid request: {message}")]
    #[diagnostic(code(trust_csi::node::invalid_request))]
    InvalidRequest {
        /// What is wrong with the request.
        message: String,
    },

    /// A certificate in a bundle could not be parsed.
    #[error("Invalid certificate in bundle: {message}")]
    #[diagnostic(
        code(trust_csi::render::invalid_certificate),
        help("Every CERTIFICATE block in a bundle must hold a DER encoded X.509 certificate")
    )]
    InvalidCertificate {
        /// Parser error message.
        message: String,
    },

    /// The bundle source has no content for a bundle.
    #[error("Bundle {bundle} not found in namespace {namespace}")]
    #[diagnostic(code(trust_csi::source::not_found))]
    BundleNotFound {
        /// Namespace the bundle was requested for.
        namespace: String,
        /// Bundle name.
        bundle: String,
    },

    /// A persisted volume record could not be read back.
    #[error("Corrupt metadata record for volume {volume_id}: {message}")]
    #[diagnostic(
        code(trust_csi::state::corrupt_record),
        help("Inspect or remove the volume directory below the data root, then restart")
    )]
    CorruptRecord {
        /// Volume whose record is corrupt.
        volume_id: String,
        /// Decoder error message.
        message: String,
    },

    /// A record was written with an unknown schema version.
    #[error("Unsupported metadata version: {api_version}/{kind}")]
    #[diagnostic(code(trust_csi::metadata::unsupported_version))]
    UnsupportedVersion {
        /// Declared `apiVersion`.
        api_version: String,
        /// Declared `kind`.
        kind: String,
    },

    /// A step of an atomic directory write failed.
    #[error("Projection failed while {phase}: {source}")]
    #[diagnostic(code(trust_csi::projection::io))]
    Projection {
        /// The step that failed.
        phase: &'static str,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A mount or unmount call failed.
    #[error("Mount operation on {target} failed: {source}")]
    #[diagnostic(
        code(trust_csi::mount),
        help("Mounting requires CAP_SYS_ADMIN; run with --no-tmpfs when testing unprivileged")
    )]
    Mount {
        /// Mount target.
        target: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(trust_csi::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(trust_csi::serialization))]
    Serialization(String),

    /// Feature not supported on this platform.
    #[error("Feature not supported: {feature}")]
    #[diagnostic(code(trust_csi::unsupported), help("This feature requires Linux"))]
    Unsupported {
        /// The unsupported feature.
        feature: String,
    },
}

impl CsiError {
    /// Build an [`CsiError::InvalidRequest`].
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Wrap an I/O error with the projection step it came from.
    #[must_use]
    pub const fn projection(phase: &'static str, source: std::io::Error) -> Self {
        Self::Projection { phase, source }
    }

    /// Whether the error was caused by caller input rather than the system.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidPath { .. } | Self::InvalidVolumeId { .. } | Self::InvalidRequest { .. }
        )
    }
}

impl From<serde_json::Error> for CsiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for CsiError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
