//! Core types used throughout the library.
//!
//! This module defines scan results, tag sets, object references and the
//! object-store metadata shapes shared by the sync and scan pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Signature reported for a clean object.
pub const SIGNATURE_OK: &str = "OK";

/// Signature reported when the engine flags an object without naming it.
pub const SIGNATURE_UNKNOWN: &str = "UNKNOWN";

/// Format of every timestamp written to tags, metadata and notifications.
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S UTC";

/// Returns the current time formatted with [`TIMESTAMP_FORMAT`].
pub fn scan_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Formats a point in time with [`TIMESTAMP_FORMAT`].
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// The status half of a scan result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanStatus {
    /// No threats were detected.
    Clean,
    /// The engine reported an infection.
    Infected,
}

impl ScanStatus {
    /// Returns the value written to the status tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "CLEAN",
            Self::Infected => "INFECTED",
        }
    }

    /// Parses a status tag value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CLEAN" => Some(Self::Clean),
            "INFECTED" => Some(Self::Infected),
            _ => None,
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of scanning one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Clean or infected.
    pub status: ScanStatus,
    /// `OK` when clean, the engine's signature when infected, or
    /// `UNKNOWN` when the engine named none.
    pub signature: String,
}

impl ScanResult {
    /// A clean result with signature `OK`.
    pub fn clean() -> Self {
        Self {
            status: ScanStatus::Clean,
            signature: SIGNATURE_OK.to_string(),
        }
    }

    /// An infected result. An empty signature becomes `UNKNOWN`.
    pub fn infected(signature: impl Into<String>) -> Self {
        let signature = signature.into();
        let signature = if signature.trim().is_empty() {
            SIGNATURE_UNKNOWN.to_string()
        } else {
            signature
        };
        Self {
            status: ScanStatus::Infected,
            signature,
        }
    }

    /// Returns `true` if the object is clean.
    pub fn is_clean(&self) -> bool {
        self.status == ScanStatus::Clean
    }

    /// Returns `true` if the object is infected.
    pub fn is_infected(&self) -> bool {
        self.status == ScanStatus::Infected
    }
}

/// A single key/value annotation on a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Case-sensitive tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

impl Tag {
    /// Creates a new tag.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An ordered collection of tags attached to an object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(Vec<Tag>);

impl TagSet {
    /// Creates an empty tag set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of the first tag with `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|tag| tag.key == key)
            .map(|tag| tag.value.as_str())
    }

    /// Returns `true` if any tag has `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|tag| tag.key == key)
    }

    /// Returns the number of tags with `key`.
    pub fn count_key(&self, key: &str) -> usize {
        self.0.iter().filter(|tag| tag.key == key).count()
    }

    /// Appends a tag without checking for duplicates.
    pub fn push(&mut self, tag: Tag) {
        self.0.push(tag);
    }

    /// Removes every tag whose key is in `keys`.
    pub fn remove_keys(&mut self, keys: &[&str]) {
        self.0.retain(|tag| !keys.contains(&tag.key.as_str()));
    }

    /// Iterates over the tags in order.
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }

    /// Returns the number of tags.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no tags.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the set, returning the tags.
    pub fn into_vec(self) -> Vec<Tag> {
        self.0
    }
}

impl From<Vec<Tag>> for TagSet {
    fn from(tags: Vec<Tag>) -> Self {
        Self(tags)
    }
}

impl FromIterator<Tag> for TagSet {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Names of the reserved tag, metadata and message keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanKeys {
    /// Key holding the scan status.
    pub status: String,
    /// Key holding the signature.
    pub signature: String,
    /// Key holding the scan timestamp.
    pub timestamp: String,
    /// Flag set on scan-start notifications.
    pub scan_start: String,
    /// Flag set on skip notifications.
    pub skipped: String,
    /// Flag set on deletion notifications.
    pub deleted: String,
}

impl Default for ScanKeys {
    fn default() -> Self {
        Self {
            status: "av-status".into(),
            signature: "av-signature".into(),
            timestamp: "av-timestamp".into(),
            scan_start: "av-scan-start".into(),
            skipped: "av-scan-skipped".into(),
            deleted: "av-deleted".into(),
        }
    }
}

impl ScanKeys {
    /// The keys replaced whenever a scan result is written.
    pub fn reserved(&self) -> [&str; 3] {
        [&self.signature, &self.status, &self.timestamp]
    }
}

/// A reference to an object in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Bucket or container name.
    pub bucket: String,
    /// Object key.
    pub key: String,
}

impl ObjectRef {
    /// Creates a new object reference.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// An object selected for scanning together with where it is staged locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    /// The stored object.
    pub object: ObjectRef,
    /// Version id, when known.
    pub version_id: Option<String>,
    /// Where the object is downloaded to.
    pub local_path: PathBuf,
}

impl ScanTarget {
    /// Creates a new scan target.
    pub fn new(object: ObjectRef, version_id: Option<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            object,
            version_id,
            local_path: local_path.into(),
        }
    }
}

/// Result of a head request against a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    /// Content type, if set.
    pub content_type: Option<String>,
    /// User metadata.
    pub metadata: HashMap<String, String>,
    /// When the current version was written.
    pub last_modified: DateTime<Utc>,
    /// Current version id, if the bucket is versioned.
    pub version_id: Option<String>,
    /// Size in bytes.
    pub size: u64,
}

/// One entry of a version listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectVersion {
    /// Object key.
    pub key: String,
    /// Version id.
    pub version_id: String,
    /// Whether this is the current version.
    pub is_latest: bool,
    /// When this version was written.
    pub last_modified: DateTime<Utc>,
}

/// Versioning state of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersioningStatus {
    /// Versioning was never turned on.
    #[default]
    Disabled,
    /// New writes create versions.
    Enabled,
    /// Versioning was turned on and later suspended.
    Suspended,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_scan_result_constructors() {
        let clean = ScanResult::clean();
        assert!(clean.is_clean());
        assert_eq!(clean.signature, "OK");

        let infected = ScanResult::infected("Eicar-Test-Signature FOUND");
        assert!(infected.is_infected());
        assert_eq!(infected.signature, "Eicar-Test-Signature FOUND");

        assert_eq!(ScanResult::infected("  ").signature, SIGNATURE_UNKNOWN);
    }

    #[test]
    fn test_status_round_trip_strings() {
        assert_eq!(ScanStatus::parse("CLEAN"), Some(ScanStatus::Clean));
        assert_eq!(ScanStatus::parse(ScanStatus::Infected.as_str()), Some(ScanStatus::Infected));
        assert_eq!(ScanStatus::parse("clean"), None);
    }

    #[test]
    fn test_tag_set_lookup_and_removal() {
        let mut tags: TagSet = vec![
            Tag::new("owner", "team-a"),
            Tag::new("av-status", "CLEAN"),
            Tag::new("Av-Status", "kept"),
        ]
        .into();

        assert_eq!(tags.get("av-status"), Some("CLEAN"));
        tags.remove_keys(&["av-status"]);
        assert!(!tags.contains_key("av-status"));
        // Keys are case-sensitive.
        assert_eq!(tags.get("Av-Status"), Some("kept"));
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn test_timestamp_format() {
        let at = Utc.with_ymd_and_hms(2019, 1, 1, 8, 5, 3).unwrap();
        assert_eq!(format_timestamp(at), "2019/01/01 08:05:03 UTC");
    }

    #[test]
    fn test_object_ref_display() {
        assert_eq!(ObjectRef::new("uploads", "dir/a.txt").to_string(), "uploads/dir/a.txt");
    }
}
