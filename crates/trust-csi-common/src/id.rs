//! Volume identifier validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CsiError, CsiResult};

/// A validated volume identifier.
///
/// Volume IDs are chosen by the caller and become directory names below
/// the data root, so they must:
/// - Be 1-255 bytes long
/// - Not be `.` or `..` or start with the reserved `..` prefix
/// - Not contain `/` or NUL
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VolumeId(String);

impl VolumeId {
    /// Maximum length of a volume ID in bytes.
    pub const MAX_LENGTH: usize = 255;

    /// Create a new volume ID, validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID cannot be used as a directory name.
    pub fn new(id: impl Into<String>) -> CsiResult<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Get the volume ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> CsiResult<()> {
        let invalid = || CsiError::InvalidVolumeId { id: id.to_string() };

        if id.is_empty() || id.len() > Self::MAX_LENGTH {
            return Err(invalid());
        }
        if id == "." || id.starts_with("..") {
            return Err(invalid());
        }
        if id.contains(['/', '\0']) {
            return Err(invalid());
        }

        Ok(())
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VolumeId {
    type Err = CsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for VolumeId {
    type Error = CsiError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VolumeId> for String {
    fn from(id: VolumeId) -> Self {
        id.0
    }
}

impl AsRef<str> for VolumeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_volume_ids() {
        assert!(VolumeId::new("csi-0123456789abcdef").is_ok());
        assert!(VolumeId::new("a").is_ok());
        assert!(VolumeId::new("vol.with.dots").is_ok());
        assert!(VolumeId::new("x".repeat(255)).is_ok());
    }

    #[test]
    fn invalid_volume_ids() {
        assert!(VolumeId::new("").is_err());
        assert!(VolumeId::new(".").is_err());
        assert!(VolumeId::new("..").is_err());
        assert!(VolumeId::new("..data").is_err());
        assert!(VolumeId::new("a/b").is_err());
        assert!(VolumeId::new("nul\0byte").is_err());
        assert!(VolumeId::new("x".repeat(256)).is_err());
    }

    #[test]
    fn serde_rejects_invalid() {
        let ok: VolumeId = serde_json::from_str("\"csi-1\"").unwrap();
        assert_eq!(ok.as_str(), "csi-1");
        assert!(serde_json::from_str::<VolumeId>("\"../escape\"").is_err());
    }

    proptest::proptest! {
        #[test]
        fn single_segments_accepted(id in "[a-zA-Z0-9_-][a-zA-Z0-9._-]{0,100}") {
            proptest::prop_assert!(VolumeId::new(id).is_ok());
        }

        #[test]
        fn nested_ids_rejected(a in "[a-z0-9]{1,20}", b in "[a-z0-9]{1,20}") {
            let nested = format!("{a}/{b}");
            proptest::prop_assert!(VolumeId::new(nested).is_err());
        }
    }
}
