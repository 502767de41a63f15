//! Writing scan results back to the store and announcing them.

use crate::audit;
use crate::core::{AvResult, ObjectRef, ScanKeys, ScanResult, ScanStatus, TagSet};
use crate::publish::notify::{ArcTopic, Notification, NotificationBuilder, NotifySubject};
use crate::publish::tags::{merge_scan_metadata, merge_scan_tags};
use crate::store::ArcObjectStore;

/// Which results are written where.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Names of the reserved keys.
    pub keys: ScanKeys,
    /// Write results as tags.
    pub set_tags: bool,
    /// Write results into object metadata.
    pub set_metadata: bool,
    /// Topic receiving scan-start messages.
    pub scan_start_topic: Option<String>,
    /// Topic receiving result and skip messages.
    pub status_topic: Option<String>,
    /// Topic receiving clean results only.
    pub clean_topic: Option<String>,
    /// Topic receiving deletion messages.
    pub delete_topic: Option<String>,
    /// Publish clean results to the status topic.
    pub publish_clean: bool,
    /// Publish infected results to the status topic.
    pub publish_infected: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            keys: ScanKeys::default(),
            set_tags: true,
            set_metadata: false,
            scan_start_topic: None,
            status_topic: None,
            clean_topic: None,
            delete_topic: None,
            publish_clean: true,
            publish_infected: true,
        }
    }
}

impl PublisherConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reserved key names.
    pub fn with_keys(mut self, keys: ScanKeys) -> Self {
        self.keys = keys;
        self
    }

    /// Enables or disables tag writes.
    pub fn with_set_tags(mut self, enabled: bool) -> Self {
        self.set_tags = enabled;
        self
    }

    /// Enables or disables metadata rewrites.
    pub fn with_set_metadata(mut self, enabled: bool) -> Self {
        self.set_metadata = enabled;
        self
    }

    /// Sets the scan-start topic.
    pub fn with_scan_start_topic(mut self, topic: impl Into<String>) -> Self {
        self.scan_start_topic = Some(topic.into());
        self
    }

    /// Sets the status topic.
    pub fn with_status_topic(mut self, topic: impl Into<String>) -> Self {
        self.status_topic = Some(topic.into());
        self
    }

    /// Sets the clean-only topic.
    pub fn with_clean_topic(mut self, topic: impl Into<String>) -> Self {
        self.clean_topic = Some(topic.into());
        self
    }

    /// Sets the deletion topic.
    pub fn with_delete_topic(mut self, topic: impl Into<String>) -> Self {
        self.delete_topic = Some(topic.into());
        self
    }

    /// Sets which statuses reach the status topic.
    pub fn with_publish_toggles(mut self, clean: bool, infected: bool) -> Self {
        self.publish_clean = clean;
        self.publish_infected = infected;
        self
    }

    fn publishes(&self, status: ScanStatus) -> bool {
        match status {
            ScanStatus::Clean => self.publish_clean,
            ScanStatus::Infected => self.publish_infected,
        }
    }
}

/// Merges scan results into stored objects and publishes notifications.
///
/// Tag and metadata writes are read-modify-write against the store with no
/// caching between objects.
#[derive(Debug, Clone)]
pub struct ResultPublisher {
    store: ArcObjectStore,
    topic: ArcTopic,
    builder: NotificationBuilder,
    config: PublisherConfig,
}

impl ResultPublisher {
    /// Creates a publisher writing to `store` and publishing through `topic`.
    pub fn new(store: ArcObjectStore, topic: ArcTopic, config: PublisherConfig) -> Self {
        Self {
            store,
            topic,
            builder: NotificationBuilder::new(config.keys.clone()),
            config,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Returns the reserved key names.
    pub fn keys(&self) -> &ScanKeys {
        &self.config.keys
    }

    /// Replaces the scan-result tags of `object`, keeping every other tag.
    pub async fn set_tags(
        &self,
        object: &ObjectRef,
        result: &ScanResult,
        timestamp: &str,
    ) -> AvResult<TagSet> {
        let existing = self.store.get_tags(object).await?;
        let merged = merge_scan_tags(&existing, result, timestamp, &self.config.keys);
        self.store.put_tags(object, &merged).await?;
        tracing::debug!(object = %object, status = %result.status, "Scan tags written");
        Ok(merged)
    }

    /// Writes the scan result into the metadata of `object`.
    ///
    /// Existing metadata and the content type are preserved.
    pub async fn set_metadata(
        &self,
        object: &ObjectRef,
        result: &ScanResult,
        timestamp: &str,
    ) -> AvResult<()> {
        let head = self.store.head(object).await?;
        let merged = merge_scan_metadata(&head.metadata, result, timestamp, &self.config.keys);
        self.store
            .replace_metadata(object, head.content_type.as_deref(), &merged)
            .await?;
        tracing::debug!(object = %object, status = %result.status, "Scan metadata written");
        Ok(())
    }

    /// Writes tags and metadata as configured.
    pub async fn record(
        &self,
        object: &ObjectRef,
        result: &ScanResult,
        timestamp: &str,
    ) -> AvResult<()> {
        if self.config.set_tags {
            self.set_tags(object, result, timestamp).await?;
        }
        if self.config.set_metadata {
            self.set_metadata(object, result, timestamp).await?;
        }
        Ok(())
    }

    /// Announces that a scan is starting.
    pub async fn notify_start(&self, subject: &NotifySubject, timestamp: &str) -> AvResult<Option<String>> {
        let notification = self.builder.start(subject, timestamp);
        self.send(self.config.scan_start_topic.as_deref(), &notification)
            .await
    }

    /// Announces that scanning was skipped.
    pub async fn notify_skip(&self, subject: &NotifySubject, timestamp: &str) -> AvResult<Option<String>> {
        let notification = self.builder.skip(subject, timestamp);
        self.send(self.config.status_topic.as_deref(), &notification)
            .await
    }

    /// Announces a scan result.
    ///
    /// The status topic receives it when the status toggle allows. Clean
    /// results additionally go to the clean-only topic. Returns the number
    /// of messages published.
    pub async fn notify_result(
        &self,
        subject: &NotifySubject,
        result: &ScanResult,
        timestamp: &str,
    ) -> AvResult<usize> {
        let notification = self.builder.result(subject, result, timestamp);
        let mut sent = 0;
        if self.config.publishes(result.status)
            && self
                .send(self.config.status_topic.as_deref(), &notification)
                .await?
                .is_some()
        {
            sent += 1;
        }
        if result.is_clean()
            && self
                .send(self.config.clean_topic.as_deref(), &notification)
                .await?
                .is_some()
        {
            sent += 1;
        }
        Ok(sent)
    }

    /// Announces that an infected object was deleted.
    pub async fn notify_deleted(
        &self,
        subject: &NotifySubject,
        result: &ScanResult,
        timestamp: &str,
    ) -> AvResult<Option<String>> {
        let notification = self.builder.deleted(subject, result, timestamp);
        self.send(self.config.delete_topic.as_deref(), &notification)
            .await
    }

    /// Deletes an infected object.
    pub async fn delete_object(&self, object: &ObjectRef, result: &ScanResult) -> AvResult<()> {
        self.store.delete(object).await?;
        audit::emit_object_deleted(object, result);
        Ok(())
    }

    async fn send(&self, topic: Option<&str>, notification: &Notification) -> AvResult<Option<String>> {
        let Some(topic) = topic else {
            return Ok(None);
        };
        let id = self.topic.publish(topic, notification).await?;
        tracing::debug!(topic = %topic, message_id = %id, "Notification published");
        Ok(Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{StoreErrorCode, Tag};
    use crate::publish::MemoryTopic;
    use crate::store::memory::{ops, InMemoryObjectStore};
    use std::sync::Arc;

    const TS: &str = "2019/01/01 00:00:00 UTC";

    fn setup(config: PublisherConfig) -> (Arc<InMemoryObjectStore>, Arc<MemoryTopic>, ResultPublisher) {
        let store = Arc::new(InMemoryObjectStore::new().with_bucket("uploads"));
        store.put_object_with(
            "uploads",
            "a.txt",
            b"hello".to_vec(),
            Some("text/plain"),
            vec![Tag::new("owner", "team-a")].into(),
        );
        let topic = Arc::new(MemoryTopic::new());
        let publisher = ResultPublisher::new(store.clone(), topic.clone(), config);
        (store, topic, publisher)
    }

    fn object() -> ObjectRef {
        ObjectRef::new("uploads", "a.txt")
    }

    #[tokio::test]
    async fn test_clean_round_trip() {
        let (store, _, publisher) = setup(PublisherConfig::new());
        publisher.record(&object(), &ScanResult::clean(), TS).await.unwrap();

        let tags = store.tags_of("uploads", "a.txt").unwrap();
        assert_eq!(tags.get("av-status"), Some("CLEAN"));
        assert_eq!(tags.get("av-signature"), Some("OK"));
        assert_eq!(tags.get("owner"), Some("team-a"));
        assert_eq!(store.call_count(ops::REPLACE_METADATA), 0);
    }

    #[tokio::test]
    async fn test_metadata_rewrite_preserves_content_type() {
        let (store, _, publisher) = setup(PublisherConfig::new().with_set_tags(false).with_set_metadata(true));
        publisher
            .record(&object(), &ScanResult::infected("X FOUND"), TS)
            .await
            .unwrap();

        let metadata = store.metadata_of("uploads", "a.txt").unwrap();
        assert_eq!(metadata["av-status"], "INFECTED");
        assert_eq!(metadata["av-signature"], "X FOUND");
        assert_eq!(store.content_type_of("uploads", "a.txt").as_deref(), Some("text/plain"));
        assert!(store.tags_of("uploads", "a.txt").unwrap().get("av-status").is_none());
    }

    #[tokio::test]
    async fn test_tag_write_failure_propagates() {
        let (store, _, publisher) = setup(PublisherConfig::new());
        store.fail(ops::PUT_TAGS, "a.txt", StoreErrorCode::AccessDenied);
        let err = publisher
            .set_tags(&object(), &ScanResult::clean(), TS)
            .await
            .unwrap_err();
        assert_eq!(err.store_code(), Some(&StoreErrorCode::AccessDenied));
    }

    #[tokio::test]
    async fn test_result_toggles_and_clean_topic() {
        let config = PublisherConfig::new()
            .with_status_topic("status")
            .with_clean_topic("clean")
            .with_publish_toggles(false, true);
        let (_, topic, publisher) = setup(config);
        let subject = NotifySubject::new(object(), None);

        let sent = publisher
            .notify_result(&subject, &ScanResult::clean(), TS)
            .await
            .unwrap();
        assert_eq!(sent, 1);
        assert!(topic.published_to("status").is_empty());
        assert_eq!(topic.published_to("clean").len(), 1);

        let sent = publisher
            .notify_result(&subject, &ScanResult::infected("X FOUND"), TS)
            .await
            .unwrap();
        assert_eq!(sent, 1);
        assert_eq!(topic.published_to("status").len(), 1);
        assert_eq!(topic.published_to("clean").len(), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_topics_publish_nothing() {
        let (_, topic, publisher) = setup(PublisherConfig::new());
        let subject = NotifySubject::new(object(), Some("v1".into()));
        assert_eq!(publisher.notify_start(&subject, TS).await.unwrap(), None);
        assert_eq!(publisher.notify_skip(&subject, TS).await.unwrap(), None);
        assert_eq!(topic.count(), 0);
    }

    #[tokio::test]
    async fn test_delete_object() {
        let (store, _, publisher) = setup(PublisherConfig::new());
        publisher
            .delete_object(&object(), &ScanResult::infected("X FOUND"))
            .await
            .unwrap();
        assert!(!store.exists("uploads", "a.txt"));
    }
}
