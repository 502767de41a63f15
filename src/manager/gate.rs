//! The single-object scan workflow.

use crate::audit;
use crate::core::{
    scan_timestamp, AvError, AvResult, EventSource, ObjectEvent, ObjectRef, ScanResult,
    VersioningStatus,
};
use crate::definitions::DefinitionSync;
use crate::engine::{ArcEngine, MimeValidation};
use crate::manager::staging::StagingDir;
use crate::publish::{NotifySubject, ResultPublisher};
use crate::store::ArcObjectStore;

use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Where an object is in the scan workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateState {
    /// The event was parsed.
    Received,
    /// Version safety was confirmed, or checking is disabled.
    VersionChecked,
    /// The object carried the safe-generation marker.
    Skipped,
    /// The engine produced a result.
    Scanned,
    /// The result was written to the object.
    Tagged,
    /// The result was published.
    Notified,
    /// Processing finished.
    Done,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "RECEIVED",
            Self::VersionChecked => "VERSION_CHECKED",
            Self::Skipped => "SKIPPED",
            Self::Scanned => "SCANNED",
            Self::Tagged => "TAGGED",
            Self::Notified => "NOTIFIED",
            Self::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Settings for [`ObjectScanGate`].
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Shape of inbound events.
    pub event_source: EventSource,
    /// Refuse to scan unless the bucket is versioned and the key has exactly
    /// one version.
    pub check_versions: bool,
    /// Delete infected objects after tagging and notifying.
    pub delete_infected: bool,
    /// Tag key marking objects produced by a trusted pipeline.
    pub skip_tag_key: String,
    /// Tag value that must accompany [`GateConfig::skip_tag_key`].
    pub skip_tag_value: String,
    /// Parent of the per-scan staging directories.
    pub staging_root: PathBuf,
    /// Content-type check applied to files the engine found clean.
    pub mime_validation: MimeValidation,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            event_source: EventSource::S3,
            check_versions: false,
            delete_infected: false,
            skip_tag_key: "av-generated-safely".to_string(),
            skip_tag_value: "true".to_string(),
            staging_root: PathBuf::from("/tmp/scandir"),
            mime_validation: MimeValidation::Disabled,
        }
    }
}

impl GateConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the inbound event shape.
    pub fn with_event_source(mut self, source: EventSource) -> Self {
        self.event_source = source;
        self
    }

    /// Enables or disables the version-safety check.
    pub fn with_version_check(mut self, enabled: bool) -> Self {
        self.check_versions = enabled;
        self
    }

    /// Enables or disables deletion of infected objects.
    pub fn with_delete_infected(mut self, enabled: bool) -> Self {
        self.delete_infected = enabled;
        self
    }

    /// Sets the safe-generation marker.
    pub fn with_skip_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.skip_tag_key = key.into();
        self.skip_tag_value = value.into();
        self
    }

    /// Sets the staging root.
    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = root.into();
        self
    }

    /// Sets the content-type check.
    pub fn with_mime_validation(mut self, validation: MimeValidation) -> Self {
        self.mime_validation = validation;
        self
    }
}

/// What happened to one object.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// The processed object.
    pub object: ObjectRef,
    /// Version the workflow operated on.
    pub version_id: Option<String>,
    /// The scan result, `None` when skipped.
    pub result: Option<ScanResult>,
    /// Timestamp written with the result or skip notification.
    pub timestamp: String,
    /// Whether the object was deleted.
    pub deleted: bool,
    /// States passed through, in order.
    pub transitions: Vec<GateState>,
}

impl ScanOutcome {
    /// Returns the last state reached.
    pub fn final_state(&self) -> GateState {
        self.transitions.last().copied().unwrap_or(GateState::Received)
    }

    /// Returns `true` if the object bypassed scanning.
    pub fn was_skipped(&self) -> bool {
        self.transitions.contains(&GateState::Skipped)
    }
}

/// Scans one object end to end.
///
/// The steps run strictly in order: version check, skip check, download,
/// definition refresh, scan, tag, notify, and for infected objects with
/// deletion enabled, delete. Any error before tagging leaves the object
/// untouched so a later retry can scan it.
///
/// # Example
///
/// ```rust,ignore
/// let gate = ObjectScanGate::new(store, engine, publisher)
///     .with_definitions(Arc::new(sync))
///     .with_config(GateConfig::new().with_version_check(true));
/// let outcome = gate.process_event(&event).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ObjectScanGate {
    store: ArcObjectStore,
    engine: ArcEngine,
    publisher: ResultPublisher,
    definitions: Option<Arc<DefinitionSync>>,
    config: GateConfig,
}

impl ObjectScanGate {
    /// Creates a gate with the default configuration.
    pub fn new(store: ArcObjectStore, engine: ArcEngine, publisher: ResultPublisher) -> Self {
        Self {
            store,
            engine,
            publisher,
            definitions: None,
            config: GateConfig::default(),
        }
    }

    /// Refreshes definitions from the shared store before every scan.
    pub fn with_definitions(mut self, sync: Arc<DefinitionSync>) -> Self {
        self.definitions = Some(sync);
        self
    }

    /// Sets the configuration.
    pub fn with_config(mut self, config: GateConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Parses an inbound event and processes the object it names.
    pub async fn process_event(&self, event: &Value) -> AvResult<ScanOutcome> {
        let event = ObjectEvent::parse(event, self.config.event_source)?;
        self.process(event.object, event.version_id).await
    }

    /// Processes `object`. A missing `version_id` is resolved from the store.
    pub async fn process(&self, object: ObjectRef, version_id: Option<String>) -> AvResult<ScanOutcome> {
        let mut transitions = vec![GateState::Received];

        let head = self.store.head(&object).await?;
        let version_id = version_id.or(head.version_id);
        let subject = NotifySubject::new(object.clone(), version_id.clone()).with_metadata(&head.metadata);

        if self.config.check_versions {
            self.verify_single_version(&object).await?;
        }
        transitions.push(GateState::VersionChecked);

        if self.is_marked_safe(&object).await? {
            let timestamp = scan_timestamp();
            self.publisher.notify_skip(&subject, &timestamp).await?;
            audit::emit_scan_skipped(&object, version_id.as_deref(), &self.config.skip_tag_key);
            transitions.extend([GateState::Skipped, GateState::Done]);
            return Ok(ScanOutcome {
                object,
                version_id,
                result: None,
                timestamp,
                deleted: false,
                transitions,
            });
        }

        self.publisher
            .notify_start(&subject, &scan_timestamp())
            .await?;
        audit::emit_scan_started(&object, version_id.as_deref());

        let result = self.scan(&object, head.content_type.as_deref()).await?;
        transitions.push(GateState::Scanned);

        let timestamp = scan_timestamp();
        self.publisher.record(&object, &result, &timestamp).await?;
        transitions.push(GateState::Tagged);

        self.publisher
            .notify_result(&subject, &result, &timestamp)
            .await?;
        transitions.push(GateState::Notified);
        audit::emit_scan_completed(&object, version_id.as_deref(), &result, &timestamp);

        let deleted = result.is_infected()
            && self.config.delete_infected
            && self.delete_infected(&subject, &result, &timestamp).await;

        transitions.push(GateState::Done);
        Ok(ScanOutcome {
            object,
            version_id,
            result: Some(result),
            timestamp,
            deleted,
            transitions,
        })
    }

    async fn verify_single_version(&self, object: &ObjectRef) -> AvResult<()> {
        let status = self.store.versioning_status(&object.bucket).await?;
        if status != VersioningStatus::Enabled {
            return Err(AvError::VersioningDisabled {
                bucket: object.bucket.clone(),
            });
        }
        let count = self
            .store
            .list_versions(&object.bucket, &object.key)
            .await?
            .iter()
            .filter(|version| version.key == object.key)
            .count();
        if count > 1 {
            return Err(AvError::MultipleVersions {
                bucket: object.bucket.clone(),
                key: object.key.clone(),
                count,
            });
        }
        Ok(())
    }

    async fn is_marked_safe(&self, object: &ObjectRef) -> AvResult<bool> {
        let tags = self.store.get_tags(object).await?;
        Ok(tags.get(&self.config.skip_tag_key) == Some(self.config.skip_tag_value.as_str()))
    }

    /// Downloads, refreshes definitions and scans. The staging directory is
    /// removed before the result is returned, whatever it is.
    async fn scan(&self, object: &ObjectRef, content_type: Option<&str>) -> AvResult<ScanResult> {
        let staging = StagingDir::create(&self.config.staging_root).await?;
        let result = self.scan_staged(object, content_type, &staging).await;
        staging.remove().await;
        result
    }

    async fn scan_staged(
        &self,
        object: &ObjectRef,
        content_type: Option<&str>,
        staging: &StagingDir,
    ) -> AvResult<ScanResult> {
        let local_path = staging.path_for_key(&object.key)?;
        self.store.download(object, &local_path).await?;

        if let Some(definitions) = &self.definitions {
            definitions.download_stale().await?;
        }

        let report = self.engine.scan_path(&local_path).await?;
        let mut result = report.result_for_file(&local_path)?;
        if result.is_clean() {
            result = self
                .config
                .mime_validation
                .check_file(&local_path, content_type)
                .await?;
        }
        tracing::info!(
            object = %object,
            engine = %report.engine,
            status = %result.status,
            signature = %result.signature,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Object scanned"
        );
        Ok(result)
    }

    /// Deletes the object and announces it. Failures are logged, not raised.
    async fn delete_infected(&self, subject: &NotifySubject, result: &ScanResult, timestamp: &str) -> bool {
        if let Err(e) = self.publisher.delete_object(&subject.object, result).await {
            tracing::error!(
                bucket = %subject.object.bucket,
                key = %subject.object.key,
                error = %e,
                "Failed to delete infected object"
            );
            return false;
        }
        if let Err(e) = self.publisher.notify_deleted(subject, result, timestamp).await {
            tracing::warn!(object = %subject.object, error = %e, "Failed to publish deletion notice");
        }
        true
    }
}
