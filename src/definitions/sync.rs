//! Keeping the local definitions directory and the shared store in step.

use crate::audit;
use crate::core::{AvError, AvResult, FileHasher, StoreErrorCode};
use crate::definitions::catalog::{DefinitionCatalog, DefinitionFile};
use crate::definitions::client::DefinitionStoreClient;
use crate::definitions::plan::{DownloadPlan, PlannedDownload, PlannedUpload, UploadPlan};
use crate::definitions::updater::{DefinitionUpdater, UpdaterOutcome};

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File whose appearance means the updater fetched an uncompressed main
/// database.
const MAIN_CUD: &str = "main.cud";
const MAIN_CVD: &str = "main.cvd";

/// What a download pass did.
#[derive(Debug, Clone, Default)]
pub struct DownloadSummary {
    /// The plan that was executed.
    pub plan: DownloadPlan,
    /// Files fetched.
    pub downloaded: Vec<String>,
    /// Files whose download failed with an expected error code.
    pub skipped: Vec<String>,
}

/// What an upload pass did.
#[derive(Debug, Clone, Default)]
pub struct UploadSummary {
    /// The plan that was executed.
    pub plan: UploadPlan,
    /// Files pushed and tagged.
    pub uploaded: Vec<String>,
}

/// What a full update cycle did.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// The initial download from the shared store.
    pub downloads: DownloadSummary,
    /// Every updater run, in order.
    pub updater_runs: Vec<UpdaterOutcome>,
    /// Whether the main database was discarded and fetched again.
    pub main_refetched: bool,
    /// The final upload to the shared store.
    pub uploads: UploadSummary,
}

/// Synchronizes definition files between a local directory, upstream
/// updaters and the shared store.
///
/// # Example
///
/// ```rust,ignore
/// use bucket_antivirus::definitions::{DefinitionStoreClient, DefinitionSync};
///
/// let client = DefinitionStoreClient::new(store, "av-definitions", "clamav_defs");
/// let sync = DefinitionSync::new(client, "/tmp/clamav_defs");
/// let summary = sync.download_stale().await?;
/// ```
#[derive(Debug, Clone)]
pub struct DefinitionSync {
    client: DefinitionStoreClient,
    catalog: DefinitionCatalog,
    local_dir: PathBuf,
    hasher: FileHasher,
    updater: Option<Arc<dyn DefinitionUpdater>>,
    extra_feed: Option<Arc<dyn DefinitionUpdater>>,
    continue_on_updater_failure: bool,
}

impl DefinitionSync {
    /// Creates a sync for the official catalog.
    pub fn new(client: DefinitionStoreClient, local_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            catalog: DefinitionCatalog::new(),
            local_dir: local_dir.into(),
            hasher: FileHasher::new(),
            updater: None,
            extra_feed: None,
            continue_on_updater_failure: false,
        }
    }

    /// Replaces the catalog.
    pub fn with_catalog(mut self, catalog: DefinitionCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Sets the upstream updater run by [`Self::update_cycle`].
    pub fn with_updater(mut self, updater: Arc<dyn DefinitionUpdater>) -> Self {
        self.updater = Some(updater);
        self
    }

    /// Sets the updater for extra files, run when the catalog includes them.
    pub fn with_extra_feed(mut self, updater: Arc<dyn DefinitionUpdater>) -> Self {
        self.extra_feed = Some(updater);
        self
    }

    /// Uploads even when an updater exits unsuccessfully.
    pub fn with_continue_on_updater_failure(mut self, proceed: bool) -> Self {
        self.continue_on_updater_failure = proceed;
        self
    }

    /// Returns the local definitions directory.
    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    /// Returns the catalog.
    pub fn catalog(&self) -> &DefinitionCatalog {
        &self.catalog
    }

    /// Decides which remote files must be fetched.
    ///
    /// Per family, suffixes are visited in priority order. A file older than
    /// one already seen in its family is never planned, and planning a
    /// strictly newer file drops any older one planned before it. Files
    /// whose local checksum matches the remote tag are skipped, as are files
    /// without a remote checksum.
    pub async fn plan_downloads(&self) -> AvResult<DownloadPlan> {
        let mut plan = DownloadPlan::default();
        let prefix = self.client.prefix();

        for family in self.catalog.families() {
            let mut best_time: Option<DateTime<Utc>> = None;
            for file in self.catalog.family_files(family, prefix, &self.local_dir) {
                let (checksum, remote_time) = self.remote_state(&file, &mut plan.soft_failures).await?;

                if let Some(best) = best_time {
                    if remote_time < best {
                        plan.older_in_series.insert(file.filename.clone());
                        continue;
                    }
                    if remote_time > best {
                        if let Some(superseded) = plan.entries.remove(family) {
                            plan.older_in_series.insert(superseded.filename);
                        }
                    }
                }
                best_time = Some(remote_time);

                self.consider(&mut plan, family.clone(), file, checksum, remote_time)
                    .await?;
            }
        }

        for file in self.catalog.extra(prefix, &self.local_dir) {
            let checksum = self.client.remote_checksum(&file.remote_path).await?;
            if checksum.is_unavailable() {
                plan.soft_failures += 1;
            }
            self.consider(&mut plan, file.filename.clone(), file, checksum.found(), epoch())
                .await?;
        }

        if !plan.older_in_series.is_empty() {
            tracing::info!(files = ?plan.older_in_series, "Not downloading older files in series");
        }
        if !plan.up_to_date.is_empty() {
            tracing::info!(files = ?plan.up_to_date, "Not downloading files whose local checksum matches");
        }
        Ok(plan)
    }

    async fn remote_state(
        &self,
        file: &DefinitionFile,
        soft_failures: &mut usize,
    ) -> AvResult<(Option<String>, DateTime<Utc>)> {
        let checksum = self.client.remote_checksum(&file.remote_path).await?;
        let modified = self.client.remote_last_modified(&file.remote_path).await?;
        *soft_failures += usize::from(checksum.is_unavailable()) + usize::from(modified.is_unavailable());
        Ok((checksum.found(), modified.found().unwrap_or_else(epoch)))
    }

    async fn consider(
        &self,
        plan: &mut DownloadPlan,
        key: String,
        file: DefinitionFile,
        checksum: Option<String>,
        remote_time: DateTime<Utc>,
    ) -> AvResult<()> {
        let local = self.hasher.hash_file_async(&file.local_path).await?;
        if local.is_some() && local == checksum {
            plan.up_to_date.insert(file.filename);
            return Ok(());
        }
        if let Some(checksum) = checksum.filter(|c| !c.is_empty()) {
            plan.entries.insert(
                key,
                PlannedDownload {
                    filename: file.filename,
                    remote_path: file.remote_path,
                    local_path: file.local_path,
                    checksum,
                    remote_time,
                },
            );
        }
        Ok(())
    }

    /// Plans and fetches stale files into the local directory.
    ///
    /// Downloads failing with a missing-object or access-denied code are
    /// skipped and reported; other failures abort the pass.
    pub async fn download_stale(&self) -> AvResult<DownloadSummary> {
        tokio::fs::create_dir_all(&self.local_dir).await?;
        let plan = self.plan_downloads().await?;
        let mut summary = DownloadSummary::default();

        for entry in plan.entries.values() {
            match self.client.download(&entry.remote_path, &entry.local_path).await {
                Ok(()) => summary.downloaded.push(entry.filename.clone()),
                Err(AvError::Store(e)) if e.code.is_missing() || e.code == StoreErrorCode::AccessDenied => {
                    tracing::warn!(file = %entry.filename, code = %e.code, "Skipping definition download");
                    summary.skipped.push(entry.filename.clone());
                }
                Err(e) => return Err(e),
            }
        }

        audit::emit_definitions_synced(
            audit::SyncDirection::Download,
            self.client.bucket(),
            &summary.downloaded,
        );
        summary.plan = plan;
        Ok(summary)
    }

    /// Decides which local files must be pushed.
    pub async fn plan_uploads(&self) -> AvResult<UploadPlan> {
        let mut plan = UploadPlan::default();
        for file in self.catalog.all_files(self.client.prefix(), &self.local_dir) {
            let Some(local) = self.hasher.hash_file_async(&file.local_path).await? else {
                plan.missing_locally.insert(file.filename);
                continue;
            };
            let remote = self.client.remote_checksum(&file.remote_path).await?;
            if remote.is_unavailable() {
                plan.soft_failures += 1;
            }
            if remote.found().as_deref() == Some(local.as_str()) {
                plan.up_to_date.insert(file.filename);
                continue;
            }
            plan.uploads.push(PlannedUpload {
                filename: file.filename,
                local_path: file.local_path,
                remote_path: file.remote_path,
                checksum: local,
            });
        }

        if !plan.missing_locally.is_empty() {
            tracing::info!(files = ?plan.missing_locally, "Files do not exist for upload");
        }
        if !plan.up_to_date.is_empty() {
            tracing::info!(files = ?plan.up_to_date, "Checksums match the shared store");
        }
        Ok(plan)
    }

    /// Uploads every changed local file and tags it with its checksum.
    pub async fn upload_changed(&self) -> AvResult<UploadSummary> {
        let plan = self.plan_uploads().await?;
        let mut summary = UploadSummary::default();
        for upload in &plan.uploads {
            self.client
                .upload(&upload.remote_path, &upload.local_path, &upload.checksum)
                .await?;
            summary.uploaded.push(upload.filename.clone());
        }
        audit::emit_definitions_synced(
            audit::SyncDirection::Upload,
            self.client.bucket(),
            &summary.uploaded,
        );
        summary.plan = plan;
        Ok(summary)
    }

    /// Runs a full refresh: pull from the shared store, run the upstream
    /// updater, then push whatever changed.
    ///
    /// When the updater leaves a `main.cud` behind, it and `main.cvd` are
    /// removed and the updater runs again so the compressed main database
    /// is fetched instead.
    pub async fn update_cycle(&self) -> AvResult<CycleReport> {
        let mut report = CycleReport {
            downloads: self.download_stale().await?,
            ..CycleReport::default()
        };

        if let Some(updater) = &self.updater {
            let outcome = updater.update(&self.local_dir).await?;
            self.check_updater(&outcome)?;
            report.updater_runs.push(outcome);

            let cud = self.local_dir.join(MAIN_CUD);
            if tokio::fs::try_exists(&cud).await? {
                tracing::info!("Uncompressed main database found, fetching compressed form");
                tokio::fs::remove_file(&cud).await?;
                remove_if_exists(&self.local_dir.join(MAIN_CVD)).await?;
                let outcome = updater.update(&self.local_dir).await?;
                self.check_updater(&outcome)?;
                report.updater_runs.push(outcome);
                report.main_refetched = true;
            }
        }

        if self.catalog.includes_extra() {
            if let Some(feed) = &self.extra_feed {
                let outcome = feed.update(&self.local_dir).await?;
                self.check_updater(&outcome)?;
                report.updater_runs.push(outcome);
            }
        }

        report.uploads = self.upload_changed().await?;
        Ok(report)
    }

    fn check_updater(&self, outcome: &UpdaterOutcome) -> AvResult<()> {
        match outcome.ensure_success() {
            Err(e) if self.continue_on_updater_failure => {
                tracing::warn!(error = %e, "Updater failed, continuing");
                Ok(())
            }
            other => other,
        }
    }
}

/// Modification time used when the store cannot tell.
fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

async fn remove_if_exists(path: &Path) -> AvResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
