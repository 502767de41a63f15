//! Object store trait definition.

use crate::core::{ObjectHead, ObjectRef, ObjectVersion, StoreError, TagSet, VersioningStatus};

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::Path;

/// The object-store capabilities the scan and sync pipelines rely on.
///
/// Implementations wrap a concrete provider. Every failure is reported as a
/// [`StoreError`] carrying the provider's error code, so callers can treat
/// expected codes (missing objects, denied access) as soft failures.
///
/// # Example Implementation
///
/// ```rust,ignore
/// use bucket_antivirus::store::ObjectStore;
/// use async_trait::async_trait;
///
/// #[derive(Debug)]
/// struct MyStore { /* provider client */ }
///
/// #[async_trait]
/// impl ObjectStore for MyStore {
///     async fn download(&self, object: &ObjectRef, dest: &Path) -> Result<(), StoreError> {
///         todo!()
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait ObjectStore: Send + Sync + Debug {
    /// Downloads the current version of `object` to `dest`, creating parent
    /// directories as needed.
    async fn download(&self, object: &ObjectRef, dest: &Path) -> Result<(), StoreError>;

    /// Uploads the file at `src` as a new version of `object`.
    async fn upload(&self, object: &ObjectRef, src: &Path) -> Result<(), StoreError>;

    /// Returns content type, metadata, modification time, version and size.
    async fn head(&self, object: &ObjectRef) -> Result<ObjectHead, StoreError>;

    /// Returns the tag set of `object`.
    async fn get_tags(&self, object: &ObjectRef) -> Result<TagSet, StoreError>;

    /// Replaces the tag set of `object`.
    async fn put_tags(&self, object: &ObjectRef, tags: &TagSet) -> Result<(), StoreError>;

    /// Rewrites the metadata of `object` by copying it onto itself.
    ///
    /// The content type is set to `content_type` and the metadata is
    /// replaced with `metadata`.
    async fn replace_metadata(
        &self,
        object: &ObjectRef,
        content_type: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> Result<(), StoreError>;

    /// Returns the versioning status of `bucket`.
    async fn versioning_status(&self, bucket: &str) -> Result<VersioningStatus, StoreError>;

    /// Lists every version of every key starting with `prefix`.
    async fn list_versions(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectVersion>, StoreError>;

    /// Lists the keys currently present in `bucket`.
    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>, StoreError>;

    /// Deletes `object`.
    async fn delete(&self, object: &ObjectRef) -> Result<(), StoreError>;
}

/// A shared, type-erased object store.
pub type ArcObjectStore = std::sync::Arc<dyn ObjectStore>;
