//! Audit event emission functions.

use crate::core::{ObjectRef, ScanResult};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a definition transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// Shared store to local directory.
    Download,
    /// Local directory to shared store.
    Upload,
}

impl SyncDirection {
    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Upload => "upload",
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Totals of one batch run, as recorded in the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAuditSummary {
    /// Bucket the batch scanned.
    pub bucket: String,
    /// Messages drained from the queue.
    pub received: usize,
    /// Objects tagged clean.
    pub safe: usize,
    /// Objects tagged infected.
    pub infected: usize,
    /// Objects that could not be downloaded or tagged.
    pub failed: usize,
}

/// Emits an audit event for a scan starting.
pub fn emit_scan_started(object: &ObjectRef, version_id: Option<&str>) {
    tracing::info!(
        target: "bucket_antivirus::audit",
        event_type = "scan_started",
        bucket = %object.bucket,
        key = %object.key,
        version_id = ?version_id,
        "Scan started"
    );
}

/// Emits an audit event for an object that bypassed scanning.
pub fn emit_scan_skipped(object: &ObjectRef, version_id: Option<&str>, marker: &str) {
    tracing::info!(
        target: "bucket_antivirus::audit",
        event_type = "scan_skipped",
        bucket = %object.bucket,
        key = %object.key,
        version_id = ?version_id,
        marker = %marker,
        "Scan skipped"
    );
}

/// Emits an audit event for a completed scan.
pub fn emit_scan_completed(object: &ObjectRef, version_id: Option<&str>, result: &ScanResult, timestamp: &str) {
    tracing::info!(
        target: "bucket_antivirus::audit",
        event_type = "scan_completed",
        bucket = %object.bucket,
        key = %object.key,
        version_id = ?version_id,
        status = %result.status,
        signature = %result.signature,
        timestamp = %timestamp,
        "Scan completed"
    );
}

/// Emits an audit event for an infected object being deleted.
pub fn emit_object_deleted(object: &ObjectRef, result: &ScanResult) {
    tracing::warn!(
        target: "bucket_antivirus::audit",
        event_type = "object_deleted",
        bucket = %object.bucket,
        key = %object.key,
        signature = %result.signature,
        "Infected object deleted"
    );
}

/// Emits an audit event for a definition transfer.
pub fn emit_definitions_synced(direction: SyncDirection, bucket: &str, files: &[String]) {
    tracing::info!(
        target: "bucket_antivirus::audit",
        event_type = "definitions_synced",
        direction = %direction,
        bucket = %bucket,
        files = ?files,
        file_count = files.len(),
        "Definitions synced"
    );
}

/// Emits an audit event for a finished batch.
pub fn emit_batch_completed(summary: &BatchAuditSummary) {
    tracing::info!(
        target: "bucket_antivirus::audit",
        event_type = "batch_completed",
        bucket = %summary.bucket,
        received = summary.received,
        safe = summary.safe,
        infected = summary.infected,
        failed = summary.failed,
        "Batch completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_direction_names() {
        assert_eq!(SyncDirection::Download.to_string(), "download");
        assert_eq!(
            serde_json::to_string(&SyncDirection::Upload).unwrap(),
            "\"upload\""
        );
    }

    #[test]
    fn test_emitters_do_not_panic_without_subscriber() {
        let object = ObjectRef::new("uploads", "a.txt");
        emit_scan_started(&object, Some("v1"));
        emit_scan_completed(&object, None, &ScanResult::clean(), "2019/01/01 00:00:00 UTC");
        emit_batch_completed(&BatchAuditSummary::default());
    }
}
