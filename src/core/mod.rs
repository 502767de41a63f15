//! Core types for the bucket-antivirus library.
//!
//! This module provides the building blocks shared by every pipeline:
//!
//! - [`types`] - Scan results, tag sets, object references and store metadata
//! - [`error`] - Structured error types
//! - [`event`] - Typed parsing of inbound object events
//! - [`path`] - Store-path joining and staging-path mapping
//! - [`hasher`] - MD5 checksums for definition files

pub mod error;
pub mod event;
pub mod hasher;
pub mod path;
pub(crate) mod process;
pub mod types;

pub use error::{AvError, AvResult, StoreError, StoreErrorCode};
pub use event::{EventSource, ObjectEvent};
pub use hasher::FileHasher;
pub use path::{key_for_local_path, local_path_for_key, StorePath};
pub use types::{
    format_timestamp, scan_timestamp, ObjectHead, ObjectRef, ObjectVersion, ScanKeys, ScanResult,
    ScanStatus, ScanTarget, Tag, TagSet, VersioningStatus, SIGNATURE_OK, SIGNATURE_UNKNOWN,
    TIMESTAMP_FORMAT,
};
