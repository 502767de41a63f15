//! Inbound object events.
//!
//! Object-created notifications arrive either directly from the store or
//! wrapped in a notification-topic envelope whose `Message` field is the
//! original event serialized as a JSON string. Both are parsed here into an
//! [`ObjectEvent`] that names exactly one object.

use crate::core::error::{AvError, AvResult};
use crate::core::types::ObjectRef;

use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

/// Where inbound events come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventSource {
    /// Direct object-store notifications.
    #[default]
    S3,
    /// Object-store notifications relayed through a notification topic.
    Sns,
}

impl FromStr for EventSource {
    type Err = AvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s3" => Ok(Self::S3),
            "sns" => Ok(Self::Sns),
            other => Err(AvError::configuration(format!(
                "unknown event source '{}'",
                other
            ))),
        }
    }
}

/// The object named by an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEvent {
    /// The object that was written.
    pub object: ObjectRef,
    /// The version written, when the event carries one.
    pub version_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Records", default)]
    records: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct SnsRecord {
    #[serde(rename = "Sns")]
    sns: SnsBody,
}

#[derive(Debug, Deserialize)]
struct SnsBody {
    #[serde(rename = "Message")]
    message: String,
}

#[derive(Debug, Deserialize)]
struct S3Record {
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: Option<BucketEntity>,
    object: Option<ObjectEntity>,
}

#[derive(Debug, Deserialize)]
struct BucketEntity {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectEntity {
    key: Option<String>,
    #[serde(rename = "versionId")]
    version_id: Option<String>,
}

impl ObjectEvent {
    /// Parses an event value from the given source.
    pub fn parse(event: &Value, source: EventSource) -> AvResult<Self> {
        match source {
            EventSource::S3 => Self::parse_s3(event),
            EventSource::Sns => {
                let record = first_record(event)?;
                let record: SnsRecord = serde_json::from_value(record).map_err(|e| {
                    AvError::invalid_event(format!("malformed notification record: {}", e))
                })?;
                let inner: Value = serde_json::from_str(&record.sns.message).map_err(|e| {
                    AvError::invalid_event(format!("notification message is not JSON: {}", e))
                })?;
                Self::parse_s3(&inner)
            }
        }
    }

    /// Parses an event from its JSON text.
    pub fn parse_str(event: &str, source: EventSource) -> AvResult<Self> {
        let value: Value = serde_json::from_str(event)
            .map_err(|e| AvError::invalid_event(format!("event is not JSON: {}", e)))?;
        Self::parse(&value, source)
    }

    fn parse_s3(event: &Value) -> AvResult<Self> {
        let record = first_record(event)?;
        let record: S3Record = serde_json::from_value(record)
            .map_err(|e| AvError::invalid_event(format!("malformed object record: {}", e)))?;

        let bucket = record
            .s3
            .bucket
            .ok_or_else(|| AvError::invalid_event("No bucket found in event!"))?
            .name;
        let object = record
            .s3
            .object
            .ok_or_else(|| AvError::invalid_event("No key found in event!"))?;
        let key = object.key.map(|key| decode_key(&key)).transpose()?;

        match (bucket, key) {
            (Some(bucket), Some(key)) if !bucket.is_empty() && !key.is_empty() => Ok(Self {
                object: ObjectRef::new(bucket, key),
                version_id: object.version_id.filter(|v| !v.is_empty()),
            }),
            _ => Err(AvError::invalid_event(format!(
                "Unable to retrieve object from event: {}",
                event
            ))),
        }
    }
}

fn first_record(event: &Value) -> AvResult<Value> {
    let envelope: Envelope = serde_json::from_value(event.clone())
        .map_err(|e| AvError::invalid_event(format!("malformed event: {}", e)))?;
    envelope
        .records
        .into_iter()
        .next()
        .ok_or_else(|| AvError::invalid_event("No records found in event!"))
}

/// Decodes a URL-encoded key where `+` stands for a space.
pub fn decode_key(raw: &str) -> AvResult<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| AvError::invalid_event(format!("key '{}' is not valid UTF-8: {}", raw, e)))
}
