//! In-memory object store.
//!
//! Keeps buckets, object versions, tags and metadata in process memory.
//! Useful for tests and demos, and as a reference for the semantics the
//! pipelines expect from a real provider. Faults can be injected per
//! operation and key to exercise soft-failure paths.

use crate::core::{
    ObjectHead, ObjectRef, ObjectVersion, StoreError, StoreErrorCode, TagSet, VersioningStatus,
};
use crate::store::traits::ObjectStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Operation names used for fault injection and call counting.
pub mod ops {
    /// [`super::ObjectStore::download`]
    pub const DOWNLOAD: &str = "download";
    /// [`super::ObjectStore::upload`]
    pub const UPLOAD: &str = "upload";
    /// [`super::ObjectStore::head`]
    pub const HEAD: &str = "head";
    /// [`super::ObjectStore::get_tags`]
    pub const GET_TAGS: &str = "get_tags";
    /// [`super::ObjectStore::put_tags`]
    pub const PUT_TAGS: &str = "put_tags";
    /// [`super::ObjectStore::replace_metadata`]
    pub const REPLACE_METADATA: &str = "replace_metadata";
    /// [`super::ObjectStore::versioning_status`]
    pub const VERSIONING_STATUS: &str = "versioning_status";
    /// [`super::ObjectStore::list_versions`]
    pub const LIST_VERSIONS: &str = "list_versions";
    /// [`super::ObjectStore::list_keys`]
    pub const LIST_KEYS: &str = "list_keys";
    /// [`super::ObjectStore::delete`]
    pub const DELETE: &str = "delete";
}

#[derive(Debug, Clone)]
struct StoredVersion {
    version_id: String,
    data: Vec<u8>,
    content_type: Option<String>,
    metadata: HashMap<String, String>,
    tags: TagSet,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct BucketState {
    versioning: VersioningStatus,
    // Oldest first; the last entry is the current version.
    objects: BTreeMap<String, Vec<StoredVersion>>,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashMap<String, BucketState>,
    faults: HashMap<(String, String), StoreErrorCode>,
    calls: Vec<(String, String)>,
}

/// An object store held entirely in memory.
///
/// # Examples
///
/// ```rust
/// use bucket_antivirus::store::InMemoryObjectStore;
///
/// let store = InMemoryObjectStore::new().with_bucket("uploads");
/// store.put_object("uploads", "a.txt", b"hello".to_vec());
/// assert!(store.exists("uploads", "a.txt"));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    state: RwLock<State>,
}

impl InMemoryObjectStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `bucket` if it does not exist.
    pub fn with_bucket(self, bucket: &str) -> Self {
        self.write().buckets.entry(bucket.to_string()).or_default();
        self
    }

    /// Sets the versioning status of `bucket`, creating it if needed.
    pub fn set_versioning(&self, bucket: &str, status: VersioningStatus) {
        self.write()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .versioning = status;
    }

    /// Writes an object, creating the bucket if needed.
    pub fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>) {
        self.put_object_with(bucket, key, data, None, TagSet::new());
    }

    /// Writes an object with a content type and initial tags.
    pub fn put_object_with(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: Option<&str>,
        tags: TagSet,
    ) {
        let mut state = self.write();
        let bucket_state = state.buckets.entry(bucket.to_string()).or_default();
        let version = StoredVersion {
            version_id: uuid::Uuid::new_v4().simple().to_string(),
            data,
            content_type: content_type.map(str::to_string),
            metadata: HashMap::new(),
            tags,
            last_modified: Utc::now(),
        };
        push_version(bucket_state, key, version);
    }

    /// Overrides the modification time of the current version.
    pub fn set_last_modified(&self, bucket: &str, key: &str, at: DateTime<Utc>) {
        let mut state = self.write();
        if let Some(current) = state
            .buckets
            .get_mut(bucket)
            .and_then(|b| b.objects.get_mut(key))
            .and_then(|versions| versions.last_mut())
        {
            current.last_modified = at;
        }
    }

    /// Replaces the user metadata of the current version without creating a
    /// new version.
    pub fn set_metadata(&self, bucket: &str, key: &str, metadata: HashMap<String, String>) {
        let mut state = self.write();
        if let Some(current) = state
            .buckets
            .get_mut(bucket)
            .and_then(|b| b.objects.get_mut(key))
            .and_then(|versions| versions.last_mut())
        {
            current.metadata = metadata;
        }
    }

    /// Makes every future `operation` on `key` fail with `code`.
    ///
    /// Bucket-level operations use the bucket name as the key.
    pub fn fail(&self, operation: &str, key: &str, code: StoreErrorCode) {
        self.write()
            .faults
            .insert((operation.to_string(), key.to_string()), code);
    }

    /// Removes every injected fault.
    pub fn clear_faults(&self) {
        self.write().faults.clear();
    }

    /// Returns `true` if `key` currently exists in `bucket`.
    pub fn exists(&self, bucket: &str, key: &str) -> bool {
        self.current(bucket, key).is_some()
    }

    /// Returns the content of the current version.
    pub fn object_data(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.current(bucket, key).map(|v| v.data)
    }

    /// Returns the tags of the current version.
    pub fn tags_of(&self, bucket: &str, key: &str) -> Option<TagSet> {
        self.current(bucket, key).map(|v| v.tags)
    }

    /// Returns the metadata of the current version.
    pub fn metadata_of(&self, bucket: &str, key: &str) -> Option<HashMap<String, String>> {
        self.current(bucket, key).map(|v| v.metadata)
    }

    /// Returns the content type of the current version.
    pub fn content_type_of(&self, bucket: &str, key: &str) -> Option<String> {
        self.current(bucket, key).and_then(|v| v.content_type)
    }

    /// Returns how many versions of `key` are stored.
    pub fn version_count(&self, bucket: &str, key: &str) -> usize {
        self.read()
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map_or(0, Vec::len)
    }

    /// Returns how many times `operation` was called, across all keys.
    pub fn call_count(&self, operation: &str) -> usize {
        self.read()
            .calls
            .iter()
            .filter(|(op, _)| op == operation)
            .count()
    }

    /// Returns how many times `operation` was called for `key`.
    pub fn call_count_for(&self, operation: &str, key: &str) -> usize {
        self.read()
            .calls
            .iter()
            .filter(|(op, k)| op == operation && k == key)
            .count()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current(&self, bucket: &str, key: &str) -> Option<StoredVersion> {
        self.read()
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .and_then(|versions| versions.last())
            .cloned()
    }

    /// Records the call and returns an injected fault, if any.
    fn enter(&self, operation: &str, key: &str) -> Result<(), StoreError> {
        let mut state = self.write();
        state.calls.push((operation.to_string(), key.to_string()));
        match state.faults.get(&(operation.to_string(), key.to_string())) {
            Some(code) => Err(StoreError::new(
                operation,
                key,
                code.clone(),
                "injected fault",
            )),
            None => Ok(()),
        }
    }

    fn with_current<T>(
        &self,
        operation: &str,
        object: &ObjectRef,
        missing: StoreErrorCode,
        f: impl FnOnce(&StoredVersion) -> T,
    ) -> Result<T, StoreError> {
        let state = self.read();
        let bucket = state
            .buckets
            .get(&object.bucket)
            .ok_or_else(|| StoreError::no_such_bucket(operation, &object.bucket))?;
        let current = bucket
            .objects
            .get(&object.key)
            .and_then(|versions| versions.last())
            .ok_or_else(|| {
                StoreError::new(operation, object.to_string(), missing, "object does not exist")
            })?;
        Ok(f(current))
    }

    fn with_current_mut<T>(
        &self,
        operation: &str,
        object: &ObjectRef,
        f: impl FnOnce(&mut BucketState) -> T,
    ) -> Result<T, StoreError> {
        let mut state = self.write();
        let bucket = state
            .buckets
            .get_mut(&object.bucket)
            .ok_or_else(|| StoreError::no_such_bucket(operation, &object.bucket))?;
        if !bucket.objects.contains_key(&object.key) {
            return Err(StoreError::no_such_key(operation, object.to_string()));
        }
        Ok(f(bucket))
    }
}

fn push_version(bucket: &mut BucketState, key: &str, version: StoredVersion) {
    let versions = bucket.objects.entry(key.to_string()).or_default();
    if bucket.versioning != VersioningStatus::Enabled {
        versions.clear();
    }
    versions.push(version);
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn download(&self, object: &ObjectRef, dest: &Path) -> Result<(), StoreError> {
        self.enter(ops::DOWNLOAD, &object.key)?;
        let data = self.with_current(ops::DOWNLOAD, object, StoreErrorCode::NoSuchKey, |v| {
            v.data.clone()
        })?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(ops::DOWNLOAD, dest.display().to_string(), e))?;
        }
        tokio::fs::write(dest, data)
            .await
            .map_err(|e| StoreError::io(ops::DOWNLOAD, dest.display().to_string(), e))
    }

    async fn upload(&self, object: &ObjectRef, src: &Path) -> Result<(), StoreError> {
        self.enter(ops::UPLOAD, &object.key)?;
        let data = tokio::fs::read(src)
            .await
            .map_err(|e| StoreError::io(ops::UPLOAD, src.display().to_string(), e))?;
        let mut state = self.write();
        let bucket = state
            .buckets
            .get_mut(&object.bucket)
            .ok_or_else(|| StoreError::no_such_bucket(ops::UPLOAD, &object.bucket))?;
        let version = StoredVersion {
            version_id: uuid::Uuid::new_v4().simple().to_string(),
            data,
            content_type: None,
            metadata: HashMap::new(),
            tags: TagSet::new(),
            last_modified: Utc::now(),
        };
        push_version(bucket, &object.key, version);
        Ok(())
    }

    async fn head(&self, object: &ObjectRef) -> Result<ObjectHead, StoreError> {
        self.enter(ops::HEAD, &object.key)?;
        let versioned = self.read().buckets.get(&object.bucket).map(|b| b.versioning);
        self.with_current(ops::HEAD, object, StoreErrorCode::NotFound, |v| ObjectHead {
            content_type: v.content_type.clone(),
            metadata: v.metadata.clone(),
            last_modified: v.last_modified,
            version_id: match versioned {
                Some(VersioningStatus::Disabled) | None => None,
                _ => Some(v.version_id.clone()),
            },
            size: v.data.len() as u64,
        })
    }

    async fn get_tags(&self, object: &ObjectRef) -> Result<TagSet, StoreError> {
        self.enter(ops::GET_TAGS, &object.key)?;
        self.with_current(ops::GET_TAGS, object, StoreErrorCode::NoSuchKey, |v| {
            v.tags.clone()
        })
    }

    async fn put_tags(&self, object: &ObjectRef, tags: &TagSet) -> Result<(), StoreError> {
        self.enter(ops::PUT_TAGS, &object.key)?;
        self.with_current_mut(ops::PUT_TAGS, object, |bucket| {
            if let Some(current) = bucket
                .objects
                .get_mut(&object.key)
                .and_then(|versions| versions.last_mut())
            {
                current.tags = tags.clone();
            }
        })
    }

    async fn replace_metadata(
        &self,
        object: &ObjectRef,
        content_type: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> Result<(), StoreError> {
        self.enter(ops::REPLACE_METADATA, &object.key)?;
        self.with_current_mut(ops::REPLACE_METADATA, object, |bucket| {
            let copy = bucket
                .objects
                .get(&object.key)
                .and_then(|versions| versions.last())
                .map(|current| StoredVersion {
                    version_id: uuid::Uuid::new_v4().simple().to_string(),
                    data: current.data.clone(),
                    content_type: content_type.map(str::to_string),
                    metadata: metadata.clone(),
                    tags: current.tags.clone(),
                    last_modified: Utc::now(),
                });
            if let Some(copy) = copy {
                push_version(bucket, &object.key, copy);
            }
        })
    }

    async fn versioning_status(&self, bucket: &str) -> Result<VersioningStatus, StoreError> {
        self.enter(ops::VERSIONING_STATUS, bucket)?;
        self.read()
            .buckets
            .get(bucket)
            .map(|b| b.versioning)
            .ok_or_else(|| StoreError::no_such_bucket(ops::VERSIONING_STATUS, bucket))
    }

    async fn list_versions(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectVersion>, StoreError> {
        self.enter(ops::LIST_VERSIONS, prefix)?;
        let state = self.read();
        let bucket_state = state
            .buckets
            .get(bucket)
            .ok_or_else(|| StoreError::no_such_bucket(ops::LIST_VERSIONS, bucket))?;
        let mut listing = Vec::new();
        for (key, versions) in bucket_state
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
        {
            let latest = versions.len().saturating_sub(1);
            for (index, version) in versions.iter().enumerate() {
                listing.push(ObjectVersion {
                    key: key.clone(),
                    version_id: version.version_id.clone(),
                    is_latest: index == latest,
                    last_modified: version.last_modified,
                });
            }
        }
        Ok(listing)
    }

    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        self.enter(ops::LIST_KEYS, bucket)?;
        self.read()
            .buckets
            .get(bucket)
            .map(|b| b.objects.keys().cloned().collect())
            .ok_or_else(|| StoreError::no_such_bucket(ops::LIST_KEYS, bucket))
    }

    async fn delete(&self, object: &ObjectRef) -> Result<(), StoreError> {
        self.enter(ops::DELETE, &object.key)?;
        let mut state = self.write();
        let bucket = state
            .buckets
            .get_mut(&object.bucket)
            .ok_or_else(|| StoreError::no_such_bucket(ops::DELETE, &object.bucket))?;
        bucket.objects.remove(&object.key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Tag;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_download_and_upload() {
        let store = InMemoryObjectStore::new();
        store.put_object("defs", "clamav_defs/main.cvd", b"main".to_vec());

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("nested/main.cvd");
        let object = ObjectRef::new("defs", "clamav_defs/main.cvd");
        store.download(&object, &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"main");

        std::fs::write(&dest, b"main-v2").unwrap();
        store.upload(&object, &dest).await.unwrap();
        assert_eq!(store.object_data("defs", "clamav_defs/main.cvd").unwrap(), b"main-v2");
    }

    #[tokio::test]
    async fn test_missing_object_codes() {
        let store = InMemoryObjectStore::new().with_bucket("defs");
        let object = ObjectRef::new("defs", "missing");

        let err = store.head(&object).await.unwrap_err();
        assert_eq!(err.code, StoreErrorCode::NotFound);
        let err = store.get_tags(&object).await.unwrap_err();
        assert_eq!(err.code, StoreErrorCode::NoSuchKey);

        let err = store
            .get_tags(&ObjectRef::new("nope", "missing"))
            .await
            .unwrap_err();
        assert_eq!(err.code, StoreErrorCode::NoSuchBucket);
    }

    #[tokio::test]
    async fn test_injected_fault() {
        let store = InMemoryObjectStore::new();
        store.put_object("defs", "main.cvd", b"x".to_vec());
        store.fail(ops::GET_TAGS, "main.cvd", StoreErrorCode::AccessDenied);

        let err = store
            .get_tags(&ObjectRef::new("defs", "main.cvd"))
            .await
            .unwrap_err();
        assert_eq!(err.code, StoreErrorCode::AccessDenied);
        assert_eq!(store.call_count(ops::GET_TAGS), 1);

        store.clear_faults();
        assert!(store.get_tags(&ObjectRef::new("defs", "main.cvd")).await.is_ok());
    }

    #[tokio::test]
    async fn test_versions_accumulate_only_when_enabled() {
        let store = InMemoryObjectStore::new();
        store.put_object("uploads", "a.txt", b"1".to_vec());
        store.put_object("uploads", "a.txt", b"2".to_vec());
        assert_eq!(store.version_count("uploads", "a.txt"), 1);

        store.set_versioning("uploads", VersioningStatus::Enabled);
        store.put_object("uploads", "a.txt", b"3".to_vec());
        assert_eq!(store.version_count("uploads", "a.txt"), 2);

        let versions = store.list_versions("uploads", "a.txt").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions[1].is_latest);
    }

    #[tokio::test]
    async fn test_tags_and_metadata_copy() {
        let store = InMemoryObjectStore::new();
        store.put_object_with(
            "uploads",
            "a.pdf",
            b"%PDF".to_vec(),
            Some("application/pdf"),
            vec![Tag::new("owner", "team-a")].into(),
        );
        let object = ObjectRef::new("uploads", "a.pdf");

        let mut metadata = HashMap::new();
        metadata.insert("av-status".to_string(), "CLEAN".to_string());
        store
            .replace_metadata(&object, Some("application/pdf"), &metadata)
            .await
            .unwrap();

        let head = store.head(&object).await.unwrap();
        assert_eq!(head.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(head.metadata.get("av-status").map(String::as_str), Some("CLEAN"));
        assert_eq!(store.tags_of("uploads", "a.pdf").unwrap().get("owner"), Some("team-a"));
    }
}
