//! Store-path joining and local staging paths.

use crate::core::error::{AvError, AvResult};

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A `/`-separated path inside an object store.
///
/// Segments are trimmed of surrounding separators and empty segments are
/// dropped, so joins never produce `//`, a leading `/` or a trailing `/`.
///
/// ```rust
/// use bucket_antivirus::core::StorePath;
///
/// let path = StorePath::new("clamav_defs/").join("/main.cvd");
/// assert_eq!(path.as_str(), "clamav_defs/main.cvd");
/// assert_eq!(StorePath::new("").join("main.cvd").as_str(), "main.cvd");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath(String);

impl StorePath {
    /// Creates a path from a prefix, normalizing separators.
    pub fn new(prefix: &str) -> Self {
        Self::default().join(prefix)
    }

    /// Appends one or more `/`-separated segments.
    pub fn join(&self, segment: &str) -> Self {
        let mut joined = self.0.clone();
        for part in segment.split('/').filter(|part| !part.is_empty()) {
            if !joined.is_empty() {
                joined.push('/');
            }
            joined.push_str(part);
        }
        Self(joined)
    }

    /// Returns the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the root path.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<StorePath> for String {
    fn from(path: StorePath) -> Self {
        path.0
    }
}

/// Maps an object key onto a path below `root`.
///
/// Every `/`-separated segment becomes one path component. Keys that are
/// absolute or contain empty, `.` or `..` segments are rejected, so a hostile
/// key cannot write outside the staging area and two distinct keys never
/// share a staging file. [`key_for_local_path`] inverts the mapping exactly.
pub fn local_path_for_key(root: &Path, key: &str) -> AvResult<PathBuf> {
    let unsafe_key = || AvError::UnsafeKey {
        key: key.to_string(),
        root: root.to_path_buf(),
    };
    if key.is_empty() {
        return Err(unsafe_key());
    }
    let mut path = root.to_path_buf();
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
            return Err(unsafe_key());
        }
        path.push(segment);
    }
    Ok(path)
}

/// Turns a path below `root` back into a `/`-separated key.
///
/// Returns `None` when `path` is not below `root`.
pub fn key_for_local_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<_>>()?;
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_path_join() {
        let prefix = StorePath::new("/clamav_defs//");
        assert_eq!(prefix.as_str(), "clamav_defs");
        assert_eq!(prefix.join("daily.cld").as_str(), "clamav_defs/daily.cld");
        assert_eq!(prefix.join("a//b/").as_str(), "clamav_defs/a/b");
        assert!(StorePath::new("").is_empty());
    }

    #[test]
    fn test_local_path_for_key() {
        let root = Path::new("/tmp/scandir");
        assert_eq!(
            local_path_for_key(root, "dir/a.txt").unwrap(),
            PathBuf::from("/tmp/scandir/dir/a.txt")
        );
        assert!(local_path_for_key(root, "../etc/passwd").is_err());
        assert!(local_path_for_key(root, "/etc/passwd").is_err());
        assert!(local_path_for_key(root, "").is_err());
    }

    #[test]
    fn test_local_path_rejects_keys_that_normalise() {
        let root = Path::new("/tmp/scandir");
        for key in ["a/b.txt/", "a//b.txt", "./a/b.txt", "a/./b.txt", "a\\b.txt"] {
            assert!(local_path_for_key(root, key).is_err(), "{key} accepted");
        }
    }

    #[test]
    fn test_accepted_keys_round_trip() {
        let root = Path::new("/tmp/scandir");
        for key in ["a/b.txt", "report 2024-01-01T10:00:00.csv", "x/y/z..bin", ".hidden"] {
            let path = local_path_for_key(root, key).unwrap();
            assert_eq!(key_for_local_path(root, &path).as_deref(), Some(key));
        }
    }

    #[test]
    fn test_key_for_local_path() {
        let root = Path::new("/tmp/scandir");
        assert_eq!(
            key_for_local_path(root, Path::new("/tmp/scandir/dir/a.txt")),
            Some("dir/a.txt".to_string())
        );
        assert_eq!(key_for_local_path(root, Path::new("/var/a.txt")), None);
        assert_eq!(key_for_local_path(root, root), None);
    }
}
