//! Download and upload plans for one sync pass.

use crate::core::StorePath;

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// A definition file selected for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDownload {
    /// File name, e.g. `daily.cvd`.
    pub filename: String,
    /// Key in the shared store.
    pub remote_path: StorePath,
    /// Destination in the local definitions directory.
    pub local_path: PathBuf,
    /// Checksum tagged on the remote copy.
    pub checksum: String,
    /// Remote modification time, epoch zero when unknown.
    pub remote_time: DateTime<Utc>,
}

/// Files to fetch this pass, keyed by family (or file name for extra files).
///
/// Built fresh for every sync call and never persisted.
#[derive(Debug, Clone, Default)]
pub struct DownloadPlan {
    /// At most one entry per family.
    pub entries: BTreeMap<String, PlannedDownload>,
    /// Files skipped because a newer file of the same family exists.
    pub older_in_series: BTreeSet<String>,
    /// Files skipped because the local checksum matches.
    pub up_to_date: BTreeSet<String>,
    /// Remote lookups answered with an expected error code.
    pub soft_failures: usize,
}

impl DownloadPlan {
    /// Returns `true` when nothing needs fetching.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of files to fetch.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if `filename` is planned for download.
    pub fn includes(&self, filename: &str) -> bool {
        self.entries.values().any(|e| e.filename == filename)
    }

    /// Returns the planned file names, sorted.
    pub fn filenames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.values().map(|e| e.filename.clone()).collect();
        names.sort();
        names
    }
}

/// A local definition file selected for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUpload {
    /// File name.
    pub filename: String,
    /// Source in the local definitions directory.
    pub local_path: PathBuf,
    /// Key in the shared store.
    pub remote_path: StorePath,
    /// Checksum of the local file, tagged after upload.
    pub checksum: String,
}

/// Files to push to the shared store.
#[derive(Debug, Clone, Default)]
pub struct UploadPlan {
    /// Files whose checksum differs from the remote tag.
    pub uploads: Vec<PlannedUpload>,
    /// Files whose checksum matches the remote tag.
    pub up_to_date: BTreeSet<String>,
    /// Expected files that do not exist locally.
    pub missing_locally: BTreeSet<String>,
    /// Remote lookups answered with an expected error code.
    pub soft_failures: usize,
}

impl UploadPlan {
    /// Returns `true` when nothing needs pushing.
    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty()
    }

    /// Returns the file names to upload, in plan order.
    pub fn filenames(&self) -> Vec<&str> {
        self.uploads.iter().map(|u| u.filename.as_str()).collect()
    }
}
