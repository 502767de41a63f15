//! Bucket maintenance helpers.
//!
//! Listing objects by scan state, feeding the work queue and marking objects
//! too large to scan.

use crate::core::{
    scan_timestamp, AvResult, EventSource, ObjectEvent, ObjectRef, ScanKeys, ScanStatus, Tag,
};
use crate::publish::has_scan_tags;
use crate::queue::ArcWorkQueue;
use crate::store::ArcObjectStore;

use serde_json::{json, Value};

/// Tag key written on objects marked clean without a scan.
pub const NOTES_TAG: &str = "av-notes";

/// Value of [`NOTES_TAG`] on objects marked clean without a scan.
pub const MANUAL_NOTE: &str = "MANUAL";

/// Builds the object-created event the scan gate accepts for `object`.
pub fn object_created_event(object: &ObjectRef) -> Value {
    json!({
        "Records": [{
            "s3": {
                "bucket": { "name": object.bucket },
                "object": { "key": object.key }
            }
        }]
    })
}

/// Inspects and maintains the scan state of a bucket's objects.
#[derive(Debug, Clone)]
pub struct BucketInventory {
    store: ArcObjectStore,
    keys: ScanKeys,
}

impl BucketInventory {
    /// Creates an inventory reading tags named by `keys`.
    pub fn new(store: ArcObjectStore, keys: ScanKeys) -> Self {
        Self { store, keys }
    }

    /// Keys in `bucket` carrying neither a status nor a timestamp tag.
    pub async fn unscanned_objects(&self, bucket: &str) -> AvResult<Vec<String>> {
        let mut unscanned = Vec::new();
        for key in self.store.list_keys(bucket).await? {
            let tags = self.store.get_tags(&ObjectRef::new(bucket, &key)).await?;
            if !has_scan_tags(&tags, &self.keys) {
                unscanned.push(key);
            }
        }
        Ok(unscanned)
    }

    /// Keys in `bucket` whose status tag is `INFECTED`.
    pub async fn infected_objects(&self, bucket: &str) -> AvResult<Vec<String>> {
        let mut infected = Vec::new();
        for key in self.store.list_keys(bucket).await? {
            let tags = self.store.get_tags(&ObjectRef::new(bucket, &key)).await?;
            if tags.get(&self.keys.status) == Some(ScanStatus::Infected.as_str()) {
                infected.push(key);
            }
        }
        Ok(infected)
    }

    /// Sends every unscanned key in `bucket` to `queue`, at most `limit`.
    ///
    /// Returns the keys sent.
    pub async fn enqueue_unscanned(
        &self,
        bucket: &str,
        queue: &ArcWorkQueue,
        limit: Option<usize>,
    ) -> AvResult<Vec<String>> {
        let mut keys = self.unscanned_objects(bucket).await?;
        if let Some(limit) = limit {
            keys.truncate(limit);
        }
        for key in &keys {
            queue.send(key).await?;
            tracing::info!(bucket = %bucket, key = %key, "Queued for scanning");
        }
        Ok(keys)
    }

    /// Marks never-scanned objects larger than `threshold` bytes as clean.
    ///
    /// The status, timestamp and notes tags are replaced; other tags are
    /// kept. Empty objects are left alone. Failures on one object are logged
    /// and do not stop the pass. Returns the keys tagged.
    pub async fn tag_oversized_objects(
        &self,
        bucket: &str,
        threshold: u64,
        limit: Option<usize>,
    ) -> AvResult<Vec<String>> {
        let mut candidates = self.unscanned_objects(bucket).await?;
        if let Some(limit) = limit {
            candidates.truncate(limit);
        }

        let mut tagged = Vec::new();
        for key in candidates {
            let object = ObjectRef::new(bucket, &key);
            match self.mark_if_oversized(&object, threshold).await {
                Ok(true) => tagged.push(key),
                Ok(false) => {}
                Err(e) => tracing::warn!(object = %object, error = %e, "Failed to tag oversized object"),
            }
        }
        Ok(tagged)
    }

    async fn mark_if_oversized(&self, object: &ObjectRef, threshold: u64) -> AvResult<bool> {
        let head = self.store.head(object).await?;
        if head.size == 0 || head.size <= threshold {
            return Ok(false);
        }
        tracing::info!(object = %object, size = head.size, "Tagging oversized object as clean");

        let mut tags = self.store.get_tags(object).await?;
        tags.remove_keys(&[self.keys.status.as_str(), self.keys.timestamp.as_str(), NOTES_TAG]);
        tags.push(Tag::new(&self.keys.status, ScanStatus::Clean.as_str()));
        tags.push(Tag::new(&self.keys.timestamp, scan_timestamp()));
        tags.push(Tag::new(NOTES_TAG, MANUAL_NOTE));
        self.store.put_tags(object, &tags).await?;
        Ok(true)
    }
}

/// Parses an inbound event and queues the key it names.
///
/// This is the ingest step in front of the batch pipeline. Returns the
/// queued message id.
pub async fn forward_event(queue: &ArcWorkQueue, event: &Value, source: EventSource) -> AvResult<String> {
    let event = ObjectEvent::parse(event, source)?;
    let id = queue.send(&event.object.key).await?;
    tracing::info!(object = %event.object, message_id = %id, "Event forwarded to queue");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;
    use crate::store::memory::ops;
    use crate::store::InMemoryObjectStore;
    use crate::core::StoreErrorCode;
    use std::sync::Arc;

    const BUCKET: &str = "uploads";

    fn store() -> Arc<InMemoryObjectStore> {
        let store = Arc::new(InMemoryObjectStore::new().with_bucket(BUCKET));
        store.put_object_with(
            BUCKET,
            "clean.txt",
            b"c".to_vec(),
            None,
            vec![Tag::new("av-status", "CLEAN")].into(),
        );
        store.put_object_with(
            BUCKET,
            "bad.exe",
            b"b".to_vec(),
            None,
            vec![Tag::new("av-status", "INFECTED")].into(),
        );
        store.put_object_with(
            BUCKET,
            "stamped.txt",
            b"s".to_vec(),
            None,
            vec![Tag::new("av-timestamp", "2019/01/01 00:00:00 UTC")].into(),
        );
        store.put_object(BUCKET, "new.txt", b"new".to_vec());
        store.put_object(BUCKET, "big.iso", vec![7u8; 64]);
        store.put_object(BUCKET, "empty.txt", Vec::new());
        store
    }

    #[tokio::test]
    async fn test_unscanned_and_infected() {
        let inventory = BucketInventory::new(store(), ScanKeys::default());
        assert_eq!(
            inventory.unscanned_objects(BUCKET).await.unwrap(),
            vec!["big.iso", "empty.txt", "new.txt"]
        );
        assert_eq!(inventory.infected_objects(BUCKET).await.unwrap(), vec!["bad.exe"]);
    }

    #[tokio::test]
    async fn test_enqueue_unscanned_with_limit() {
        let inventory = BucketInventory::new(store(), ScanKeys::default());
        let memory = Arc::new(InMemoryQueue::new());
        let queue: ArcWorkQueue = memory.clone();

        let sent = inventory
            .enqueue_unscanned(BUCKET, &queue, Some(2))
            .await
            .unwrap();
        assert_eq!(sent, vec!["big.iso", "empty.txt"]);
        assert_eq!(memory.bodies(), sent);
    }

    #[tokio::test]
    async fn test_tag_oversized_objects() {
        let store = store();
        let inventory = BucketInventory::new(store.clone(), ScanKeys::default());

        let tagged = inventory.tag_oversized_objects(BUCKET, 10, None).await.unwrap();
        assert_eq!(tagged, vec!["big.iso"]);

        let tags = store.tags_of(BUCKET, "big.iso").unwrap();
        assert_eq!(tags.get("av-status"), Some("CLEAN"));
        assert_eq!(tags.get(NOTES_TAG), Some(MANUAL_NOTE));
        assert!(tags.contains_key("av-timestamp"));
        assert!(store.tags_of(BUCKET, "empty.txt").unwrap().is_empty());
        assert!(store.tags_of(BUCKET, "new.txt").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_failure_does_not_stop_pass() {
        let store = store();
        store.put_object(BUCKET, "huge.bin", vec![1u8; 128]);
        store.fail(ops::PUT_TAGS, "big.iso", StoreErrorCode::AccessDenied);
        let inventory = BucketInventory::new(store.clone(), ScanKeys::default());

        let tagged = inventory.tag_oversized_objects(BUCKET, 10, None).await.unwrap();
        assert_eq!(tagged, vec!["huge.bin"]);
    }

    #[tokio::test]
    async fn test_forward_event() {
        let memory = Arc::new(InMemoryQueue::new());
        let queue: ArcWorkQueue = memory.clone();
        let event = object_created_event(&ObjectRef::new(BUCKET, "dir/new file.txt"));

        forward_event(&queue, &event, EventSource::S3).await.unwrap();
        assert_eq!(memory.bodies(), vec!["dir/new file.txt"]);
    }
}
