//! Filesystem-backed object store.

use crate::core::{
    local_path_for_key, ObjectHead, ObjectRef, ObjectVersion, StoreError, StoreErrorCode, TagSet,
    VersioningStatus,
};
use crate::store::traits::ObjectStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// An object store laid out on a local directory tree.
///
/// Each bucket is a directory. Object content lives under `objects/` at the
/// path named by its key, and everything else about the object is kept in a
/// JSON sidecar whose file name is the URL-encoded key.
///
/// # Directory Structure
///
/// ```text
/// root/
/// └── {bucket}/
///     ├── bucket.json          # Versioning status
///     ├── objects/
///     │   └── {key}            # Current content
///     └── meta/
///         └── {encoded key}.json
/// ```
///
/// Only the current content is retained; the sidecar records the id and
/// time of every version written while versioning was enabled.
#[derive(Debug)]
pub struct FilesystemObjectStore {
    root: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BucketFile {
    #[serde(default)]
    versioning: VersioningStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionEntry {
    version_id: String,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    content_type: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    tags: TagSet,
    #[serde(default)]
    versions: Vec<VersionEntry>,
}

impl FilesystemObjectStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| StoreError::io("open", root.display().to_string(), e))?;
        Ok(Self { root })
    }

    /// Creates `bucket` with the given versioning status.
    pub fn create_bucket(&self, bucket: &str, versioning: VersioningStatus) -> Result<(), StoreError> {
        let dir = self.root.join(bucket);
        for sub in ["objects", "meta"] {
            std::fs::create_dir_all(dir.join(sub))
                .map_err(|e| StoreError::io("create_bucket", bucket, e))?;
        }
        write_json("create_bucket", &dir.join("bucket.json"), &BucketFile { versioning })
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, operation: &str, bucket: &str) -> Result<PathBuf, StoreError> {
        let dir = self.root.join(bucket);
        if dir.join("bucket.json").is_file() {
            Ok(dir)
        } else {
            Err(StoreError::no_such_bucket(operation, bucket))
        }
    }

    fn bucket_file(&self, operation: &str, bucket: &str) -> Result<BucketFile, StoreError> {
        let dir = self.bucket_dir(operation, bucket)?;
        read_json(operation, &dir.join("bucket.json"))
    }

    fn data_path(&self, operation: &str, object: &ObjectRef) -> Result<PathBuf, StoreError> {
        let objects = self.bucket_dir(operation, &object.bucket)?.join("objects");
        local_path_for_key(&objects, &object.key).map_err(|e| {
            StoreError::new(
                operation,
                object.to_string(),
                StoreErrorCode::Other("InvalidObjectName".into()),
                e.to_string(),
            )
        })
    }

    fn meta_path(&self, operation: &str, object: &ObjectRef) -> Result<PathBuf, StoreError> {
        let meta = self.bucket_dir(operation, &object.bucket)?.join("meta");
        Ok(meta.join(format!("{}.json", urlencoding::encode(&object.key))))
    }

    /// Loads the sidecar of an existing object.
    fn load(&self, operation: &str, object: &ObjectRef) -> Result<Sidecar, StoreError> {
        let data = self.data_path(operation, object)?;
        if !data.is_file() {
            return Err(StoreError::no_such_key(operation, object.to_string()));
        }
        let meta = self.meta_path(operation, object)?;
        if meta.is_file() {
            read_json(operation, &meta)
        } else {
            Ok(Sidecar::default())
        }
    }

    fn save(&self, operation: &str, object: &ObjectRef, sidecar: &Sidecar) -> Result<(), StoreError> {
        write_json(operation, &self.meta_path(operation, object)?, sidecar)
    }

    /// Appends a version entry for a new write.
    fn record_write(
        &self,
        operation: &str,
        object: &ObjectRef,
        sidecar: &mut Sidecar,
    ) -> Result<(), StoreError> {
        let versioning = self.bucket_file(operation, &object.bucket)?.versioning;
        let entry = VersionEntry {
            version_id: uuid::Uuid::new_v4().simple().to_string(),
            last_modified: Utc::now(),
        };
        if versioning != VersioningStatus::Enabled {
            sidecar.versions.clear();
        }
        sidecar.versions.push(entry);
        Ok(())
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(operation: &str, path: &Path) -> Result<T, StoreError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| StoreError::io(operation, path.display().to_string(), e))?;
    serde_json::from_str(&content).map_err(|e| {
        StoreError::new(
            operation,
            path.display().to_string(),
            StoreErrorCode::Other("CorruptSidecar".into()),
            e.to_string(),
        )
    })
}

fn write_json<T: Serialize>(operation: &str, path: &Path, value: &T) -> Result<(), StoreError> {
    let content = serde_json::to_string_pretty(value).map_err(|e| {
        StoreError::new(
            operation,
            path.display().to_string(),
            StoreErrorCode::Other("SerializationFailed".into()),
            e.to_string(),
        )
    })?;
    std::fs::write(path, content).map_err(|e| StoreError::io(operation, path.display().to_string(), e))
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn download(&self, object: &ObjectRef, dest: &Path) -> Result<(), StoreError> {
        let src = self.data_path("download", object)?;
        if !src.is_file() {
            return Err(StoreError::no_such_key("download", object.to_string()));
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io("download", dest.display().to_string(), e))?;
        }
        tokio::fs::copy(&src, dest)
            .await
            .map_err(|e| StoreError::io("download", object.to_string(), e))?;
        Ok(())
    }

    async fn upload(&self, object: &ObjectRef, src: &Path) -> Result<(), StoreError> {
        let dest = self.data_path("upload", object)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io("upload", object.to_string(), e))?;
        }
        tokio::fs::copy(src, &dest)
            .await
            .map_err(|e| StoreError::io("upload", src.display().to_string(), e))?;

        // A fresh upload replaces tags and metadata but keeps version history.
        let meta = self.meta_path("upload", object)?;
        let previous: Sidecar = if meta.is_file() {
            read_json("upload", &meta)?
        } else {
            Sidecar::default()
        };
        let mut sidecar = Sidecar {
            versions: previous.versions,
            ..Sidecar::default()
        };
        self.record_write("upload", object, &mut sidecar)?;
        self.save("upload", object, &sidecar)?;

        tracing::debug!(object = %object, "Stored object");
        Ok(())
    }

    async fn head(&self, object: &ObjectRef) -> Result<ObjectHead, StoreError> {
        let sidecar = self.load("head", object).map_err(|mut e| {
            if e.code == StoreErrorCode::NoSuchKey {
                e.code = StoreErrorCode::NotFound;
            }
            e
        })?;
        let data = self.data_path("head", object)?;
        let size = std::fs::metadata(&data)
            .map_err(|e| StoreError::io("head", object.to_string(), e))?
            .len();
        let versioning = self.bucket_file("head", &object.bucket)?.versioning;
        let current = sidecar.versions.last();
        Ok(ObjectHead {
            content_type: sidecar.content_type.clone(),
            metadata: sidecar.metadata.clone(),
            last_modified: current.map_or_else(Utc::now, |v| v.last_modified),
            version_id: match versioning {
                VersioningStatus::Disabled => None,
                _ => current.map(|v| v.version_id.clone()),
            },
            size,
        })
    }

    async fn get_tags(&self, object: &ObjectRef) -> Result<TagSet, StoreError> {
        Ok(self.load("get_tags", object)?.tags)
    }

    async fn put_tags(&self, object: &ObjectRef, tags: &TagSet) -> Result<(), StoreError> {
        let mut sidecar = self.load("put_tags", object)?;
        sidecar.tags = tags.clone();
        self.save("put_tags", object, &sidecar)
    }

    async fn replace_metadata(
        &self,
        object: &ObjectRef,
        content_type: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> Result<(), StoreError> {
        let mut sidecar = self.load("replace_metadata", object)?;
        sidecar.content_type = content_type.map(str::to_string);
        sidecar.metadata = metadata.clone();
        self.record_write("replace_metadata", object, &mut sidecar)?;
        self.save("replace_metadata", object, &sidecar)
    }

    async fn versioning_status(&self, bucket: &str) -> Result<VersioningStatus, StoreError> {
        Ok(self.bucket_file("versioning_status", bucket)?.versioning)
    }

    async fn list_versions(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectVersion>, StoreError> {
        let mut listing = Vec::new();
        for key in self.list_keys(bucket).await? {
            if !key.starts_with(prefix) {
                continue;
            }
            let sidecar = self.load("list_versions", &ObjectRef::new(bucket, key.as_str()))?;
            let latest = sidecar.versions.len().saturating_sub(1);
            for (index, version) in sidecar.versions.into_iter().enumerate() {
                listing.push(ObjectVersion {
                    key: key.clone(),
                    version_id: version.version_id,
                    is_latest: index == latest,
                    last_modified: version.last_modified,
                });
            }
        }
        Ok(listing)
    }

    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        let objects = self.bucket_dir("list_keys", bucket)?.join("objects");
        let mut keys = Vec::new();
        for entry in WalkDir::new(&objects).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                StoreError::new(
                    "list_keys",
                    bucket,
                    StoreErrorCode::Other("IoError".into()),
                    e.to_string(),
                )
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(key) = crate::core::key_for_local_path(&objects, entry.path()) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn delete(&self, object: &ObjectRef) -> Result<(), StoreError> {
        let data = self.data_path("delete", object)?;
        match tokio::fs::remove_file(&data).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io("delete", object.to_string(), e)),
        }
        let meta = self.meta_path("delete", object)?;
        match tokio::fs::remove_file(&meta).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io("delete", object.to_string(), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Tag;
    use tempfile::TempDir;

    fn setup(versioning: VersioningStatus) -> (TempDir, FilesystemObjectStore) {
        let temp = TempDir::new().unwrap();
        let store = FilesystemObjectStore::new(temp.path().join("store")).unwrap();
        store.create_bucket("uploads", versioning).unwrap();
        (temp, store)
    }

    #[tokio::test]
    async fn test_upload_download_and_list() {
        let (temp, store) = setup(VersioningStatus::Disabled);
        let src = temp.path().join("src.txt");
        std::fs::write(&src, b"hello").unwrap();

        let object = ObjectRef::new("uploads", "dir/a b.txt");
        store.upload(&object, &src).await.unwrap();

        let dest = temp.path().join("out/a.txt");
        store.download(&object, &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");

        assert_eq!(store.list_keys("uploads").await.unwrap(), vec!["dir/a b.txt"]);
        let head = store.head(&object).await.unwrap();
        assert_eq!(head.size, 5);
        assert_eq!(head.version_id, None);
    }

    #[tokio::test]
    async fn test_tags_persist_in_sidecar() {
        let (temp, store) = setup(VersioningStatus::Disabled);
        let src = temp.path().join("src.txt");
        std::fs::write(&src, b"x").unwrap();
        let object = ObjectRef::new("uploads", "a.txt");
        store.upload(&object, &src).await.unwrap();

        let tags: TagSet = vec![Tag::new("av-status", "CLEAN")].into();
        store.put_tags(&object, &tags).await.unwrap();

        let reopened = FilesystemObjectStore::new(store.root()).unwrap();
        assert_eq!(reopened.get_tags(&object).await.unwrap(), tags);
    }

    #[tokio::test]
    async fn test_missing_object_and_bucket() {
        let (_temp, store) = setup(VersioningStatus::Disabled);
        let err = store.head(&ObjectRef::new("uploads", "missing")).await.unwrap_err();
        assert_eq!(err.code, StoreErrorCode::NotFound);
        let err = store.get_tags(&ObjectRef::new("uploads", "missing")).await.unwrap_err();
        assert_eq!(err.code, StoreErrorCode::NoSuchKey);
        let err = store.versioning_status("other").await.unwrap_err();
        assert_eq!(err.code, StoreErrorCode::NoSuchBucket);
    }

    #[tokio::test]
    async fn test_versions_recorded_when_enabled() {
        let (temp, store) = setup(VersioningStatus::Enabled);
        let src = temp.path().join("src.txt");
        std::fs::write(&src, b"x").unwrap();
        let object = ObjectRef::new("uploads", "a.txt");
        store.upload(&object, &src).await.unwrap();
        store.upload(&object, &src).await.unwrap();

        let versions = store.list_versions("uploads", "a.txt").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert!(store.head(&object).await.unwrap().version_id.is_some());
    }

    #[tokio::test]
    async fn test_unsafe_key_rejected() {
        let (temp, store) = setup(VersioningStatus::Disabled);
        let src = temp.path().join("src.txt");
        std::fs::write(&src, b"x").unwrap();
        let err = store
            .upload(&ObjectRef::new("uploads", "../escape.txt"), &src)
            .await
            .unwrap_err();
        assert_eq!(err.code, StoreErrorCode::Other("InvalidObjectName".into()));
    }
}
