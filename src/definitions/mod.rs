//! Virus definition synchronization.
//!
//! - [`catalog`] - Definition families, suffixes and extra files
//! - [`client`] - Checksums, timestamps and transfers against the shared store
//! - [`plan`] - Download and upload plans
//! - [`sync`] - Planning, transfer and the full update cycle
//! - [`updater`] - Upstream refresh tools run as subprocesses

pub mod catalog;
pub mod client;
pub mod plan;
pub mod sync;
pub mod updater;

pub use catalog::{DefinitionCatalog, DefinitionFile, CHECKSUM_TAG, EXTRA_FILES, FAMILIES, SUFFIXES};
pub use client::{DefinitionStoreClient, Lookup};
pub use plan::{DownloadPlan, PlannedDownload, PlannedUpload, UploadPlan};
pub use sync::{CycleReport, DefinitionSync, DownloadSummary, UploadSummary};
pub use updater::{
    DefinitionUpdater, ExtraFeedUpdater, FreshclamUpdater, ToolCommand, UpdaterOutcome,
};
