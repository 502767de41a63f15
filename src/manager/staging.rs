//! Per-invocation staging directories.

use crate::core::{local_path_for_key, AvResult};

use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A directory owned by one scan invocation.
///
/// Created as a uuid-named child of the staging root so concurrent
/// invocations never share files. [`StagingDir::remove`] deletes it
/// recursively; dropping an unremoved directory removes it as well.
#[derive(Debug)]
pub struct StagingDir {
    path: PathBuf,
    removed: bool,
}

impl StagingDir {
    /// Creates a fresh directory below `root`.
    pub async fn create(root: &Path) -> AvResult<Self> {
        let path = root.join(Uuid::new_v4().simple().to_string());
        tokio::fs::create_dir_all(&path).await?;
        tracing::debug!(path = %path.display(), "Staging directory created");
        Ok(Self {
            path,
            removed: false,
        })
    }

    /// Returns the directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns where `key` is staged, rejecting keys that would escape.
    pub fn path_for_key(&self, key: &str) -> AvResult<PathBuf> {
        local_path_for_key(&self.path, key)
    }

    /// Removes the directory and everything in it.
    ///
    /// Failures are logged and reported as `false`, never raised.
    pub async fn remove(mut self) -> bool {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "Staging directory removed");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove staging directory"
                );
                false
            }
        }
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_and_remove() {
        let root = TempDir::new().unwrap();
        let staging = StagingDir::create(root.path()).await.unwrap();
        let path = staging.path().to_path_buf();
        assert!(path.is_dir());
        assert_eq!(path.parent(), Some(root.path()));

        let file = staging.path_for_key("dir/a.txt").unwrap();
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"x").unwrap();

        assert!(staging.remove().await);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_drop_removes() {
        let root = TempDir::new().unwrap();
        let path = {
            let staging = StagingDir::create(root.path()).await.unwrap();
            staging.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_escaping_key_rejected() {
        let root = TempDir::new().unwrap();
        let staging = StagingDir::create(root.path()).await.unwrap();
        assert!(staging.path_for_key("../outside").is_err());
        assert!(staging.path_for_key("/etc/passwd").is_err());
        staging.remove().await;
    }
}
