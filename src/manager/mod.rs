//! Scan orchestration.
//!
//! [`ObjectScanGate`] runs the per-object workflow for a single inbound
//! event; [`BatchOrchestrator`] drains a work queue and scans everything it
//! names with one engine invocation. Both stage downloads in a
//! [`StagingDir`] that is removed on every path.

mod batch;
mod gate;
mod retry;
mod staging;

pub use batch::{BatchConfig, BatchFailure, BatchOrchestrator, BatchReport, BatchStage};
pub use gate::{GateConfig, GateState, ObjectScanGate, ScanOutcome};
pub use retry::{retry_async, RetryConfig};
pub use staging::StagingDir;
