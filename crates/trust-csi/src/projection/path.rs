//! Payload path validation.
//!
//! Every key of a [`Payload`](super::Payload) must name a location strictly
//! inside the projection directory and must not collide with the reserved
//! `..` names the writer uses for its own bookkeeping.

use trust_csi_common::{CsiError, CsiResult};

/// Maximum length of a payload path in bytes.
pub const MAX_PATH_LENGTH: usize = 4096;

/// Maximum length of a single path segment in bytes.
pub const MAX_SEGMENT_LENGTH: usize = 255;

/// Prefix reserved for writer-internal names.
pub const RESERVED_PREFIX: &str = "..";

/// Check that `path` may be used as a payload key.
///
/// # Errors
///
/// Returns [`CsiError::InvalidPath`] if the path is empty, absolute, too
/// long, contains a `..` segment or an oversized segment, or starts with
/// the reserved prefix.
pub fn validate_path(path: &str) -> CsiResult<()> {
    let reject = |reason: &str| {
        Err(CsiError::InvalidPath {
            path: truncate(path),
            reason: reason.to_string(),
        })
    };

    if path.is_empty() {
        return reject("must not be empty");
    }
    if path.starts_with('/') {
        return reject("must be a relative path");
    }
    if path.len() > MAX_PATH_LENGTH {
        return reject("must be at most 4096 bytes");
    }

    for segment in path.split('/') {
        if segment == ".." {
            return reject("must not contain '..'");
        }
        if segment.len() > MAX_SEGMENT_LENGTH {
            return reject("path segments must be at most 255 bytes");
        }
    }

    let cleaned = clean_path(path);
    if cleaned.is_empty() {
        return reject("must name a file");
    }
    let first = cleaned.split('/').next().unwrap_or_default();
    if first.starts_with(RESERVED_PREFIX) && first.len() > RESERVED_PREFIX.len() {
        return reject("must not start with '..'");
    }

    Ok(())
}

/// Lexically clean a relative path.
///
/// Repeated separators and `.` segments are dropped, as is a trailing
/// separator. The path must already have passed [`validate_path`]'s `..`
/// check; this function never resolves parent references.
#[must_use]
pub fn clean_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Validate and clean in one step.
///
/// # Errors
///
/// Returns [`CsiError::InvalidPath`] as [`validate_path`] does.
pub fn canonicalize(path: &str) -> CsiResult<String> {
    validate_path(path)?;
    Ok(clean_path(path))
}

fn truncate(path: &str) -> String {
    const SHOWN: usize = 64;
    if path.len() <= SHOWN {
        return path.to_string();
    }
    let mut end = SHOWN;
    while !path.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &path[..end])
}
