//! Scan-result tag and metadata merging.
//!
//! Writing a result never touches unrelated tags: the three reserved keys
//! are removed wherever they appear and appended again with the new values,
//! so repeating a write with the same result yields the same tag set.

use crate::core::{ScanKeys, ScanResult, Tag, TagSet};

use std::collections::HashMap;

/// Merges `result` into `existing`.
///
/// Every tag keyed by one of the reserved keys is dropped, the remaining tags
/// keep their order, and signature, status and timestamp are appended in
/// that order.
pub fn merge_scan_tags(
    existing: &TagSet,
    result: &ScanResult,
    timestamp: &str,
    keys: &ScanKeys,
) -> TagSet {
    let mut merged = existing.clone();
    merged.remove_keys(&keys.reserved());
    merged.push(Tag::new(&keys.signature, &result.signature));
    merged.push(Tag::new(&keys.status, result.status.as_str()));
    merged.push(Tag::new(&keys.timestamp, timestamp));
    merged
}

/// Merges `result` into a copy of the object's user metadata.
pub fn merge_scan_metadata(
    existing: &HashMap<String, String>,
    result: &ScanResult,
    timestamp: &str,
    keys: &ScanKeys,
) -> HashMap<String, String> {
    let mut merged = existing.clone();
    merged.insert(keys.signature.clone(), result.signature.clone());
    merged.insert(keys.status.clone(), result.status.as_str().to_string());
    merged.insert(keys.timestamp.clone(), timestamp.to_string());
    merged
}

/// Returns `true` if `tags` show the object was scanned before.
///
/// Either a status or a timestamp tag counts.
pub fn has_scan_tags(tags: &TagSet, keys: &ScanKeys) -> bool {
    tags.contains_key(&keys.status) || tags.contains_key(&keys.timestamp)
}
