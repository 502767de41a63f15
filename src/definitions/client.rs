//! Access to definition files in the shared store.

use crate::core::{AvResult, ObjectRef, StoreErrorCode, StorePath, Tag, TagSet};
use crate::definitions::catalog::CHECKSUM_TAG;
use crate::store::ArcObjectStore;

use chrono::{DateTime, Utc};
use std::path::Path;

/// Result of looking up a remote attribute that may legitimately be absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    /// The attribute was read.
    Found(T),
    /// The object exists but does not carry the attribute.
    Absent,
    /// The store answered with an expected error code.
    Unavailable(StoreErrorCode),
}

impl<T> Lookup<T> {
    /// Returns the value when found.
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            _ => None,
        }
    }

    /// Returns `true` when the store reported an expected error.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Error codes that mean "no checksum known" when reading tags.
fn checksum_soft(code: &StoreErrorCode) -> bool {
    matches!(
        code,
        StoreErrorCode::NotFound
            | StoreErrorCode::NoSuchKey
            | StoreErrorCode::AccessDenied
            | StoreErrorCode::MethodNotAllowed
    )
}

/// Error codes that mean "no modification time known" on head.
fn time_soft(code: &StoreErrorCode) -> bool {
    matches!(
        code,
        StoreErrorCode::NotFound | StoreErrorCode::NoSuchKey | StoreErrorCode::AccessDenied
    )
}

/// Reads and writes definition files under a prefix of one bucket.
#[derive(Debug, Clone)]
pub struct DefinitionStoreClient {
    store: ArcObjectStore,
    bucket: String,
    prefix: StorePath,
}

impl DefinitionStoreClient {
    /// Creates a client for `bucket`, with files stored below `prefix`.
    pub fn new(store: ArcObjectStore, bucket: impl Into<String>, prefix: &str) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: StorePath::new(prefix),
        }
    }

    /// Returns the key prefix.
    pub fn prefix(&self) -> &StorePath {
        &self.prefix
    }

    /// Returns the bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object(&self, remote_path: &StorePath) -> ObjectRef {
        ObjectRef::new(self.bucket.clone(), remote_path.as_str())
    }

    /// Reads the checksum tag of a remote file.
    pub async fn remote_checksum(&self, remote_path: &StorePath) -> AvResult<Lookup<String>> {
        match self.store.get_tags(&self.object(remote_path)).await {
            Ok(tags) => Ok(tags
                .get(CHECKSUM_TAG)
                .map_or(Lookup::Absent, |v| Lookup::Found(v.to_string()))),
            Err(e) if checksum_soft(&e.code) => {
                tracing::debug!(path = %remote_path, code = %e.code, "No remote checksum");
                Ok(Lookup::Unavailable(e.code))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reads the modification time of a remote file.
    pub async fn remote_last_modified(
        &self,
        remote_path: &StorePath,
    ) -> AvResult<Lookup<DateTime<Utc>>> {
        match self.store.head(&self.object(remote_path)).await {
            Ok(head) => Ok(Lookup::Found(head.last_modified)),
            Err(e) if time_soft(&e.code) => {
                tracing::debug!(path = %remote_path, code = %e.code, "No remote modification time");
                Ok(Lookup::Unavailable(e.code))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Downloads a remote file to `local_path`.
    pub async fn download(&self, remote_path: &StorePath, local_path: &Path) -> AvResult<()> {
        tracing::info!(
            bucket = %self.bucket,
            path = %remote_path,
            local = %local_path.display(),
            "Downloading definition file"
        );
        self.store
            .download(&self.object(remote_path), local_path)
            .await?;
        Ok(())
    }

    /// Uploads `local_path` and tags the remote copy with `checksum`.
    pub async fn upload(&self, remote_path: &StorePath, local_path: &Path, checksum: &str) -> AvResult<()> {
        let object = self.object(remote_path);
        tracing::info!(
            local = %local_path.display(),
            object = %object,
            "Uploading definition file"
        );
        self.store.upload(&object, local_path).await?;
        let tags: TagSet = vec![Tag::new(CHECKSUM_TAG, checksum)].into();
        self.store.put_tags(&object, &tags).await?;
        Ok(())
    }
}
