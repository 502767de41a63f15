//! Status notifications.
//!
//! Messages are JSON objects published inside a `{"default": "<json>"}`
//! envelope with message structure `json`. Result messages also carry the
//! status and signature as string attributes so subscribers can filter.

use crate::core::{ObjectRef, ScanKeys, ScanResult, StoreError, StoreErrorCode};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Debug;
use std::sync::RwLock;

/// Message structure sent alongside every envelope.
pub const MESSAGE_STRUCTURE: &str = "json";

/// Metadata key prefix copied into message attributes.
///
/// An object with metadata `sns-msg-attr-application=billing` produces the
/// attribute `application=billing` on every message about it.
pub const ATTRIBUTE_METADATA_PREFIX: &str = "sns-msg-attr-";

/// A message ready to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// The message body.
    pub message: Map<String, Value>,
    /// String attributes for subscription filtering.
    pub attributes: BTreeMap<String, String>,
}

impl Notification {
    /// Returns the JSON-encoded message.
    pub fn body(&self) -> String {
        Value::Object(self.message.clone()).to_string()
    }

    /// Returns the published envelope, `{"default": <json-encoded body>}`.
    pub fn envelope(&self) -> String {
        json!({ "default": self.body() }).to_string()
    }

    /// Returns the value of a message field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.message.get(name)
    }
}

/// The object a notification is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifySubject {
    /// The stored object.
    pub object: ObjectRef,
    /// Version id, when known.
    pub version_id: Option<String>,
    /// Attributes derived from object metadata.
    pub attributes: BTreeMap<String, String>,
}

impl NotifySubject {
    /// Creates a subject without extra attributes.
    pub fn new(object: ObjectRef, version_id: Option<String>) -> Self {
        Self {
            object,
            version_id,
            attributes: BTreeMap::new(),
        }
    }

    /// Copies every `sns-msg-attr-*` metadata entry into the attributes.
    pub fn with_metadata(mut self, metadata: &HashMap<String, String>) -> Self {
        for (key, value) in metadata {
            if let Some(name) = key.strip_prefix(ATTRIBUTE_METADATA_PREFIX) {
                if !name.is_empty() {
                    self.attributes.insert(name.to_string(), value.clone());
                }
            }
        }
        self
    }
}

/// Builds the four message kinds from the configured key names.
#[derive(Debug, Clone, Default)]
pub struct NotificationBuilder {
    keys: ScanKeys,
}

impl NotificationBuilder {
    /// Creates a builder using `keys` for message field names.
    pub fn new(keys: ScanKeys) -> Self {
        Self { keys }
    }

    /// Returns the key names in use.
    pub fn keys(&self) -> &ScanKeys {
        &self.keys
    }

    /// A scan is about to start.
    pub fn start(&self, subject: &NotifySubject, timestamp: &str) -> Notification {
        let mut message = base_message(subject);
        message.insert(self.keys.scan_start.clone(), Value::Bool(true));
        message.insert(self.keys.timestamp.clone(), Value::from(timestamp));
        Notification {
            message,
            attributes: subject.attributes.clone(),
        }
    }

    /// The object carried the safe-generation marker and was not scanned.
    pub fn skip(&self, subject: &NotifySubject, timestamp: &str) -> Notification {
        let mut notification = self.start(subject, timestamp);
        notification
            .message
            .insert(self.keys.skipped.clone(), Value::Bool(true));
        notification
    }

    /// A scan finished with `result`.
    pub fn result(&self, subject: &NotifySubject, result: &ScanResult, timestamp: &str) -> Notification {
        let mut message = base_message(subject);
        message.insert(self.keys.signature.clone(), Value::from(result.signature.as_str()));
        message.insert(self.keys.status.clone(), Value::from(result.status.as_str()));
        message.insert(self.keys.timestamp.clone(), Value::from(timestamp));

        let mut attributes = subject.attributes.clone();
        attributes.insert(self.keys.status.clone(), result.status.as_str().to_string());
        attributes.insert(self.keys.signature.clone(), result.signature.clone());
        Notification { message, attributes }
    }

    /// An infected object was deleted.
    pub fn deleted(&self, subject: &NotifySubject, result: &ScanResult, timestamp: &str) -> Notification {
        let mut notification = self.result(subject, result, timestamp);
        notification
            .message
            .insert(self.keys.deleted.clone(), Value::Bool(true));
        notification
    }
}

fn base_message(subject: &NotifySubject) -> Map<String, Value> {
    let mut message = Map::new();
    message.insert("bucket".into(), Value::from(subject.object.bucket.as_str()));
    message.insert("key".into(), Value::from(subject.object.key.as_str()));
    message.insert(
        "version".into(),
        subject
            .version_id
            .as_deref()
            .map(Value::from)
            .unwrap_or(Value::Null),
    );
    message
}

/// A publish/subscribe topic that receives notifications.
#[async_trait]
pub trait NotificationTopic: Send + Sync + Debug {
    /// Publishes `notification` to `topic` and returns the message id.
    async fn publish(&self, topic: &str, notification: &Notification) -> Result<String, StoreError>;
}

/// A shared, type-erased notification topic.
pub type ArcTopic = std::sync::Arc<dyn NotificationTopic>;

/// A notification topic that records every message in memory.
#[derive(Debug, Default)]
pub struct MemoryTopic {
    published: RwLock<Vec<(String, Notification)>>,
    failing: RwLock<HashSet<String>>,
}

impl MemoryTopic {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every publish to `topic` fail with `AuthorizationError`.
    pub fn fail_topic(&self, topic: &str) {
        self.failing
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(topic.to_string());
    }

    /// Returns every `(topic, notification)` pair in publish order.
    pub fn published(&self) -> Vec<(String, Notification)> {
        self.published
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Returns the notifications published to `topic`.
    pub fn published_to(&self, topic: &str) -> Vec<Notification> {
        self.published
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, n)| n.clone())
            .collect()
    }

    /// Returns the number of notifications published to any topic.
    pub fn count(&self) -> usize {
        self.published
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl NotificationTopic for MemoryTopic {
    async fn publish(&self, topic: &str, notification: &Notification) -> Result<String, StoreError> {
        let failing = self
            .failing
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(topic);
        if failing {
            return Err(StoreError::new(
                "publish",
                topic,
                StoreErrorCode::Other("AuthorizationError".into()),
                "publishing to this topic is not allowed",
            ));
        }
        self.published
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((topic.to_string(), notification.clone()));
        Ok(uuid::Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: &str = "2019/01/01 00:00:00 UTC";

    fn subject() -> NotifySubject {
        NotifySubject::new(ObjectRef::new("uploads", "a.txt"), Some("v1".into()))
    }

    #[test]
    fn test_start_message_shape() {
        let builder = NotificationBuilder::default();
        let n = builder.start(&subject(), TS);

        assert_eq!(n.field("bucket"), Some(&json!("uploads")));
        assert_eq!(n.field("key"), Some(&json!("a.txt")));
        assert_eq!(n.field("version"), Some(&json!("v1")));
        assert_eq!(n.field("av-scan-start"), Some(&json!(true)));
        assert_eq!(n.field("av-timestamp"), Some(&json!(TS)));
        assert!(n.attributes.is_empty());
    }

    #[test]
    fn test_skip_is_start_plus_flag() {
        let builder = NotificationBuilder::default();
        let start = builder.start(&subject(), TS);
        let skip = builder.skip(&subject(), TS);

        assert_eq!(skip.field("av-scan-skipped"), Some(&json!(true)));
        assert_eq!(skip.message.len(), start.message.len() + 1);
    }

    #[test]
    fn test_result_attributes() {
        let builder = NotificationBuilder::default();
        let subject = subject().with_metadata(&HashMap::from([
            ("sns-msg-attr-application".to_string(), "billing".to_string()),
            ("uploader".to_string(), "alice".to_string()),
        ]));
        let n = builder.result(&subject, &ScanResult::infected("Eicar-Test-Signature FOUND"), TS);

        assert_eq!(n.field("av-status"), Some(&json!("INFECTED")));
        assert_eq!(n.attributes["av-status"], "INFECTED");
        assert_eq!(n.attributes["av-signature"], "Eicar-Test-Signature FOUND");
        assert_eq!(n.attributes["application"], "billing");
        assert!(!n.attributes.contains_key("uploader"));
    }

    #[test]
    fn test_deleted_flag_and_envelope() {
        let builder = NotificationBuilder::default();
        let n = builder.deleted(&subject(), &ScanResult::infected("X FOUND"), TS);
        assert_eq!(n.field("av-deleted"), Some(&json!(true)));

        let envelope: Value = serde_json::from_str(&n.envelope()).unwrap();
        let inner: Value = serde_json::from_str(envelope["default"].as_str().unwrap()).unwrap();
        assert_eq!(inner["av-signature"], json!("X FOUND"));
        assert_eq!(inner["key"], json!("a.txt"));
    }

    #[test]
    fn test_missing_version_is_null() {
        let builder = NotificationBuilder::default();
        let subject = NotifySubject::new(ObjectRef::new("b", "k"), None);
        assert_eq!(builder.start(&subject, TS).field("version"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_memory_topic_records_and_fails() {
        let topic = MemoryTopic::new();
        let n = NotificationBuilder::default().start(&subject(), TS);

        topic.publish("status", &n).await.unwrap();
        assert_eq!(topic.published_to("status"), vec![n.clone()]);

        topic.fail_topic("delete");
        assert!(topic.publish("delete", &n).await.is_err());
        assert_eq!(topic.count(), 1);
    }
}
