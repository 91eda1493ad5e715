//! `/proc/self/mountinfo` parsing.

use std::io;
use std::path::{Path, PathBuf};

use trust_csi_common::CsiResult;

/// Mount table of the calling process.
pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// One line of a mountinfo table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfoEntry {
    /// Unique mount ID.
    pub mount_id: u32,
    /// ID of the parent mount.
    pub parent_id: u32,
    /// Root of the mount within its filesystem.
    pub root: PathBuf,
    /// Mount point relative to the process root.
    pub mount_point: PathBuf,
    /// Per-mount options.
    pub options: String,
    /// Filesystem type.
    pub fs_type: String,
    /// Mount source.
    pub source: String,
}

/// Parse a mountinfo table, skipping lines that do not have the expected
/// shape.
#[must_use]
pub fn parse_mountinfo(text: &str) -> Vec<MountInfoEntry> {
    text.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<MountInfoEntry> {
    let mut fields = line.split(' ');
    let mount_id = fields.next()?.parse().ok()?;
    let parent_id = fields.next()?.parse().ok()?;
    let _device = fields.next()?;
    let root = unescape(fields.next()?);
    let mount_point = unescape(fields.next()?);
    let options = fields.next()?.to_string();

    // Optional fields run up to a lone "-".
    fields.by_ref().find(|field| *field == "-")?;
    let fs_type = fields.next()?.to_string();
    let source = fields.next()?.to_string();

    Some(MountInfoEntry {
        mount_id,
        parent_id,
        root: PathBuf::from(root),
        mount_point: PathBuf::from(mount_point),
        options,
        fs_type,
        source,
    })
}

/// Undo the kernel's octal escaping of space, tab, newline and backslash.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if let Some(byte) = bytes.get(i + 1..i + 4).and_then(octal) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn octal(digits: &[u8]) -> Option<u8> {
    if !digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
        return None;
    }
    let value = digits
        .iter()
        .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
    u8::try_from(value).ok()
}

/// Whether `path` is a mount point according to `table`.
///
/// `path` is compared as given; callers resolve symlinks first.
#[must_use]
pub fn is_mount_point_in(table: &[MountInfoEntry], path: &Path) -> bool {
    table.iter().any(|entry| entry.mount_point == path)
}

/// Whether `path` is a mount point of the calling process.
///
/// A path that does not exist is not a mount point.
///
/// # Errors
///
/// Returns an error if the path cannot be resolved or the mount table cannot
/// be read.
pub fn is_mount_point(path: &Path) -> CsiResult<bool> {
    let resolved = match std::fs::canonicalize(path) {
        Ok(resolved) => resolved,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    let text = std::fs::read_to_string(MOUNTINFO_PATH)?;
    Ok(is_mount_point_in(&parse_mountinfo(&text), &resolved))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
22 1 259:2 / / rw,relatime shared:1 - ext4 /dev/nvme0n1p2 rw
36 22 0:32 / /var/run/trust-csi/tmpfs rw,nosuid,nodev master:7 - tmpfs tmpfs rw,mode=700
41 22 0:32 /vol-1/data /var/lib/kubelet/pods/p\\040q/volumes/ca ro,relatime - tmpfs tmpfs rw
garbage line
";

    #[test]
    fn parses_fields() {
        let table = parse_mountinfo(SAMPLE);
        assert_eq!(table.len(), 3);

        let tmpfs = &table[1];
        assert_eq!(tmpfs.mount_id, 36);
        assert_eq!(tmpfs.parent_id, 22);
        assert_eq!(tmpfs.mount_point, Path::new("/var/run/trust-csi/tmpfs"));
        assert_eq!(tmpfs.fs_type, "tmpfs");
        assert_eq!(tmpfs.options, "rw,nosuid,nodev");
    }

    #[test]
    fn unescapes_octal() {
        let table = parse_mountinfo(SAMPLE);
        assert_eq!(
            table[2].mount_point,
            Path::new("/var/lib/kubelet/pods/p q/volumes/ca")
        );
        assert_eq!(table[2].root, Path::new("/vol-1/data"));
        assert_eq!(unescape(r"a\134b\011c"), "a\\b\tc");
        assert_eq!(unescape(r"trailing\04"), r"trailing\04");
        assert_eq!(unescape(r"\999"), r"\999");
    }

    #[test]
    fn lookup() {
        let table = parse_mountinfo(SAMPLE);
        assert!(is_mount_point_in(&table, Path::new("/")));
        assert!(is_mount_point_in(&table, Path::new("/var/run/trust-csi/tmpfs")));
        assert!(!is_mount_point_in(&table, Path::new("/var/run/trust-csi")));
    }

    #[test]
    fn missing_path_is_not_mounted() {
        let temp = tempfile::tempdir().unwrap();
        assert!(!is_mount_point(&temp.path().join("absent")).unwrap());
    }
}
