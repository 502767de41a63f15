//! # Bucket Antivirus
//!
//! Antivirus scanning for objects uploaded to an object store, with the
//! result recorded as tags and metadata on the object itself.
//!
//! ## Overview
//!
//! The library keeps a local virus-definition directory in step with a
//! shared definitions store and scans uploads in two ways:
//!
//! - One object per inbound event, through the [`ObjectScanGate`], which
//!   enforces version safety, honours a trusted "generated safely" tag,
//!   and can delete infected objects after recording why
//! - Many objects per run, through the [`BatchOrchestrator`], which drains a
//!   work queue, downloads in parallel and invokes the engine once
//!
//! Results are merged into existing tags without touching unrelated ones,
//! so repeating a scan is harmless.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bucket_antivirus::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AvConfig::load()?;
//!     let store = Arc::new(InMemoryObjectStore::new().with_bucket("uploads"));
//!     let topic = Arc::new(MemoryTopic::new());
//!     let engine = Arc::new(MockEngine::new());
//!
//!     let publisher = ResultPublisher::new(store.clone(), topic, config.publisher_config());
//!     let gate = ObjectScanGate::new(store, engine, publisher)
//!         .with_config(config.gate_config());
//!
//!     let outcome = gate.process_event(&event).await?;
//!     println!("{:?}", outcome.result);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `clamav` (default) - ClamAV engine via `clamdscan` and a managed
//!   `clamd` daemon
//!
//! ## Architecture
//!
//! - **Core**: Types, errors, event parsing, store paths and checksums
//! - **Store / Queue**: Object store and work queue capability traits
//! - **Engine**: Antivirus engine adapters and output parsing
//! - **Definitions**: Definition planning, transfer and upstream refresh
//! - **Publish**: Tag merging, metadata rewrites and notifications
//! - **Manager**: The scan gate, the batch orchestrator and staging
//! - **Inventory**: Bucket-wide maintenance helpers
//! - **Audit**: Structured audit events

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod audit;
pub mod config;
pub mod core;
pub mod definitions;
pub mod engine;
pub mod inventory;
pub mod manager;
pub mod publish;
pub mod queue;
pub mod store;

// Re-export commonly used types at the crate root
pub use crate::config::AvConfig;
pub use crate::core::{
    AvError, AvResult, EventSource, ObjectEvent, ObjectRef, ScanKeys, ScanResult, ScanStatus,
    StoreError, StoreErrorCode, Tag, TagSet,
};
pub use crate::definitions::{DefinitionStoreClient, DefinitionSync};
pub use crate::engine::{AvEngine, EngineReport};
pub use crate::manager::{BatchOrchestrator, BatchReport, ObjectScanGate, ScanOutcome};
pub use crate::publish::{NotificationTopic, ResultPublisher};
pub use crate::queue::WorkQueue;
pub use crate::store::ObjectStore;

/// Prelude module for convenient imports.
///
/// ```rust
/// use bucket_antivirus::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::AvConfig;
    pub use crate::core::{
        AvError, AvResult, EventSource, ObjectEvent, ObjectRef, ScanKeys, ScanResult, ScanStatus,
        StoreError, StoreErrorCode, Tag, TagSet,
    };
    pub use crate::definitions::{DefinitionCatalog, DefinitionStoreClient, DefinitionSync};
    pub use crate::engine::{AvEngine, EngineReport, MimeValidation, MockEngine};
    pub use crate::inventory::BucketInventory;
    pub use crate::manager::{
        BatchConfig, BatchOrchestrator, BatchReport, GateConfig, ObjectScanGate, ScanOutcome,
    };
    pub use crate::publish::{MemoryTopic, NotificationTopic, PublisherConfig, ResultPublisher};
    pub use crate::queue::{InMemoryQueue, WorkQueue};
    pub use crate::store::{InMemoryObjectStore, ObjectStore};

    #[cfg(feature = "clamav")]
    pub use crate::engine::{ClamAvConfig, ClamdScan, DaemonHandle};
}
