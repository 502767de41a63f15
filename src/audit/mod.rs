//! Structured audit logging.
//!
//! Every scan decision, deletion and definition transfer is emitted as a
//! `tracing` event on the `bucket_antivirus::audit` target, so a subscriber
//! can route the audit trail separately from diagnostic logs.

mod events;

pub use events::{
    emit_batch_completed, emit_definitions_synced, emit_object_deleted, emit_scan_completed,
    emit_scan_skipped, emit_scan_started, BatchAuditSummary, SyncDirection,
};
