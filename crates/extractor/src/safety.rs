//! Mapping of archive entry names onto the output tree.
//!
//! Entry names come straight from the archive and cannot be trusted: a name
//! such as `../../etc/passwd` must never resolve outside the output root.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Why an entry name was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnsafePath {
    /// Name is rooted or carries a drive prefix.
    #[error("absolute path not allowed: {0}")]
    Absolute(String),

    /// Name walks up out of the output root.
    #[error("path traversal attempt: {0}")]
    Traversal(String),
}

/// Normalise an entry name into a relative path.
///
/// `.` components and repeated separators are dropped. Absolute names and
/// names containing `..` are rejected. A name such as `./` that names the
/// archive root normalises to the empty path.
///
/// ```
/// use std::path::Path;
/// use extractor::safety::normalize_entry_name;
///
/// assert_eq!(normalize_entry_name("./dir//file.txt").unwrap(), Path::new("dir/file.txt"));
/// assert!(normalize_entry_name("../../etc/passwd").is_err());
/// assert!(normalize_entry_name("/etc/passwd").is_err());
/// assert_eq!(normalize_entry_name("./").unwrap(), Path::new(""));
/// ```
pub fn normalize_entry_name(name: &str) -> Result<PathBuf, UnsafePath> {
    let path = Path::new(name);
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => continue,
            Component::ParentDir => return Err(UnsafePath::Traversal(name.to_string())),
            Component::RootDir | Component::Prefix(_) => {
                return Err(UnsafePath::Absolute(name.to_string()))
            }
        }
    }

    Ok(normalized)
}

/// Destination of an entry under `root`.
pub fn entry_target(root: &Path, name: &str) -> Result<PathBuf, UnsafePath> {
    Ok(root.join(normalize_entry_name(name)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_plain_names() {
        assert_eq!(normalize_entry_name("file.txt").unwrap(), Path::new("file.txt"));
        assert_eq!(
            normalize_entry_name("dir/subdir/file.txt").unwrap(),
            Path::new("dir/subdir/file.txt")
        );
        assert_eq!(normalize_entry_name("dir/").unwrap(), Path::new("dir"));
        assert_eq!(normalize_entry_name("./././file.txt").unwrap(), Path::new("file.txt"));
    }

    #[test]
    fn test_normalize_rejects_traversal() {
        for name in [
            "../etc/passwd",
            "dir/../../etc/passwd",
            "./../secret",
            "dir/..",
        ] {
            assert!(
                matches!(normalize_entry_name(name), Err(UnsafePath::Traversal(_))),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_normalize_rejects_absolute() {
        assert!(matches!(
            normalize_entry_name("/etc/passwd"),
            Err(UnsafePath::Absolute(_))
        ));
    }

    #[test]
    fn test_root_names_map_to_output_root() {
        for name in ["./", ".", "", ".//./"] {
            assert_eq!(normalize_entry_name(name).unwrap(), Path::new(""), "{name:?}");
        }
        assert_eq!(entry_target(Path::new("/out"), "./").unwrap(), Path::new("/out"));
    }

    #[test]
    fn test_entry_target_joins_root() {
        let root = Path::new("/out");
        assert_eq!(
            entry_target(root, "日本語/ファイル.txt").unwrap(),
            Path::new("/out/日本語/ファイル.txt")
        );
    }
}
