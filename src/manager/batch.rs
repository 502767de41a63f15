//! The queue-driven batch workflow.

use crate::audit::{self, BatchAuditSummary};
use crate::core::{scan_timestamp, AvError, AvResult, ObjectRef, ScanResult};
use crate::definitions::DefinitionSync;
use crate::engine::{ArcEngine, BatchFindings};
use crate::manager::staging::StagingDir;
use crate::publish::ResultPublisher;
use crate::queue::{ArcWorkQueue, QueueMessage};
use crate::store::ArcObjectStore;

use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Settings for [`BatchOrchestrator`].
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Bucket every queued key belongs to.
    pub bucket: String,
    /// Concurrent downloads and tag writes.
    pub pool_size: usize,
    /// Parent of the per-batch staging directories.
    pub staging_root: PathBuf,
    /// Visibility timeout passed to every receive.
    pub visibility_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            pool_size: 10,
            staging_root: PathBuf::from("/tmp/scandir"),
            visibility_timeout: Duration::ZERO,
        }
    }
}

impl BatchConfig {
    /// Creates a configuration for `bucket`.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Self::default()
        }
    }

    /// Sets the worker pool size (at least one).
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    /// Sets the staging root.
    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = root.into();
        self
    }

    /// Sets the receive visibility timeout.
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }
}

/// The step at which a single object failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStage {
    /// The key cannot be mapped into the staging directory.
    Staging,
    /// The object could not be downloaded.
    Download,
    /// The result could not be written.
    Tagging,
}

/// One object that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// Object key.
    pub key: String,
    /// Where it failed.
    pub stage: BatchStage,
    /// The error, rendered.
    pub error: String,
}

/// What a batch run did.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Messages drained from the queue.
    pub received: usize,
    /// Keys staged for scanning.
    pub downloaded: Vec<String>,
    /// Keys tagged clean.
    pub safe: Vec<String>,
    /// Keys tagged infected, with their signature.
    pub infected: BTreeMap<String, String>,
    /// Staged keys the engine did not classify.
    pub unclassified: Vec<String>,
    /// Per-object failures.
    pub failures: Vec<BatchFailure>,
    /// Timestamp written to every tagged object.
    pub timestamp: Option<String>,
}

impl BatchReport {
    /// Returns the number of objects tagged.
    pub fn tagged(&self) -> usize {
        self.safe.len() + self.infected.len()
    }

    fn failed(&mut self, key: impl Into<String>, stage: BatchStage, error: &AvError) {
        let key = key.into();
        tracing::error!(key = %key, stage = ?stage, error = %error, "Batch object failed");
        self.failures.push(BatchFailure {
            key,
            stage,
            error: error.to_string(),
        });
    }
}

/// Drains a work queue and scans every named object with one engine call.
///
/// Downloads and tag writes run on a bounded pool; the definition refresh
/// and the engine invocation run once, sequentially. A failure on one
/// object is recorded in the [`BatchReport`] and never stops the others.
#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    queue: ArcWorkQueue,
    store: ArcObjectStore,
    engine: ArcEngine,
    publisher: ResultPublisher,
    definitions: Option<Arc<DefinitionSync>>,
    config: BatchConfig,
}

impl BatchOrchestrator {
    /// Creates an orchestrator.
    pub fn new(
        queue: ArcWorkQueue,
        store: ArcObjectStore,
        engine: ArcEngine,
        publisher: ResultPublisher,
        config: BatchConfig,
    ) -> Self {
        Self {
            queue,
            store,
            engine,
            publisher,
            definitions: None,
            config,
        }
    }

    /// Refreshes definitions from the shared store before scanning.
    pub fn with_definitions(mut self, sync: Arc<DefinitionSync>) -> Self {
        self.definitions = Some(sync);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Receives and deletes one message. `None` means the queue is empty.
    pub async fn next_message(&self) -> AvResult<Option<QueueMessage>> {
        let Some(message) = self
            .queue
            .receive(1, self.config.visibility_timeout)
            .await?
            .into_iter()
            .next()
        else {
            return Ok(None);
        };
        self.queue.delete(&message.receipt_handle).await?;
        Ok(Some(message))
    }

    /// Receives messages until the queue reports empty.
    pub async fn drain_queue(&self) -> AvResult<Vec<QueueMessage>> {
        let mut messages = Vec::new();
        while let Some(message) = self.next_message().await? {
            messages.push(message);
        }
        tracing::info!(count = messages.len(), "Queue drained");
        Ok(messages)
    }

    /// Runs one batch.
    ///
    /// Returns an error only for failures that affect the whole batch: the
    /// queue, the definition refresh or the engine.
    pub async fn run(&self) -> AvResult<BatchReport> {
        let messages = self.drain_queue().await?;
        let mut report = BatchReport {
            received: messages.len(),
            ..BatchReport::default()
        };
        if messages.is_empty() {
            tracing::info!("No messages in queue");
            return Ok(report);
        }

        // Redelivered messages name the same key twice.
        let keys: BTreeSet<String> = messages
            .into_iter()
            .map(|m| m.body.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect();

        let staging = StagingDir::create(&self.config.staging_root).await?;
        let outcome = self.run_staged(&staging, keys, &mut report).await;
        staging.remove().await;
        outcome?;

        audit::emit_batch_completed(&BatchAuditSummary {
            bucket: self.config.bucket.clone(),
            received: report.received,
            safe: report.safe.len(),
            infected: report.infected.len(),
            failed: report.failures.len(),
        });
        Ok(report)
    }

    async fn run_staged(
        &self,
        staging: &StagingDir,
        keys: BTreeSet<String>,
        report: &mut BatchReport,
    ) -> AvResult<()> {
        self.download_all(staging, keys, report).await;

        if let Some(definitions) = &self.definitions {
            definitions.download_stale().await?;
        }

        if report.downloaded.is_empty() {
            tracing::warn!("Nothing was staged, skipping engine invocation");
            return Ok(());
        }

        let findings = self.scan(staging).await?;
        let unclassified: Vec<String> = report
            .downloaded
            .iter()
            .filter(|key| {
                !findings.safe_files.contains(*key) && !findings.infected_files.contains_key(key.as_str())
            })
            .cloned()
            .collect();
        report.unclassified = unclassified;
        if !report.unclassified.is_empty() {
            tracing::warn!(
                keys = ?report.unclassified,
                "Engine did not classify every staged object, they remain unscanned"
            );
        }

        let timestamp = scan_timestamp();
        self.tag_all(findings, &timestamp, report).await;
        report.timestamp = Some(timestamp);
        Ok(())
    }

    async fn download_all(&self, staging: &StagingDir, keys: BTreeSet<String>, report: &mut BatchReport) {
        let results: Vec<(String, Result<(), (BatchStage, AvError)>)> = stream::iter(keys)
            .map(|key| async move {
                let object = ObjectRef::new(&self.config.bucket, &key);
                let outcome = match staging.path_for_key(&key) {
                    Ok(path) => self
                        .store
                        .download(&object, &path)
                        .await
                        .map_err(|e| (BatchStage::Download, AvError::from(e))),
                    Err(e) => Err((BatchStage::Staging, e)),
                };
                (key, outcome)
            })
            .buffer_unordered(self.config.pool_size)
            .collect()
            .await;

        for (key, outcome) in results {
            match outcome {
                Ok(()) => report.downloaded.push(key),
                Err((stage, e)) => report.failed(key, stage, &e),
            }
        }
        report.downloaded.sort();
        tracing::info!(
            staged = report.downloaded.len(),
            failed = report.failures.len(),
            "Objects downloaded"
        );
    }

    async fn scan(&self, staging: &StagingDir) -> AvResult<BatchFindings> {
        let report = self.engine.scan_path(staging.path()).await?;
        let findings = report.partition(staging.path());
        if report.timed_out() {
            if findings.is_empty() {
                return Err(AvError::EngineTimeout {
                    engine: report.engine,
                    elapsed: report.elapsed,
                });
            }
            tracing::warn!(
                engine = %report.engine,
                classified = findings.safe_files.len() + findings.infected_files.len(),
                "Engine timed out, using partial results"
            );
        }
        tracing::info!(
            engine = %report.engine,
            safe = findings.safe_files.len(),
            infected = findings.infected_files.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Batch scanned"
        );
        Ok(findings)
    }

    async fn tag_all(&self, findings: BatchFindings, timestamp: &str, report: &mut BatchReport) {
        let work = findings
            .safe_files
            .into_iter()
            .map(|key| (key, ScanResult::clean()))
            .chain(
                findings
                    .infected_files
                    .into_iter()
                    .map(|(key, signature)| (key, ScanResult::infected(signature))),
            );

        let results: Vec<(String, ScanResult, AvResult<()>)> = stream::iter(work)
            .map(|(key, result)| async move {
                let object = ObjectRef::new(&self.config.bucket, &key);
                let outcome = self
                    .publisher
                    .set_tags(&object, &result, timestamp)
                    .await
                    .map(|_| ());
                (key, result, outcome)
            })
            .buffer_unordered(self.config.pool_size)
            .collect()
            .await;

        for (key, result, outcome) in results {
            match outcome {
                Ok(()) if result.is_clean() => report.safe.push(key),
                Ok(()) => {
                    report.infected.insert(key, result.signature);
                }
                Err(e) => report.failed(key, BatchStage::Tagging, &e),
            }
        }
        report.safe.sort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{StoreErrorCode, Tag};
    use crate::engine::{MockEngine, MockTimeout};
    use crate::publish::{MemoryTopic, PublisherConfig};
    use crate::queue::{InMemoryQueue, WorkQueue};
    use crate::store::memory::ops;
    use crate::store::InMemoryObjectStore;
    use tempfile::TempDir;

    const BUCKET: &str = "uploads";

    struct Harness {
        _temp: TempDir,
        staging_root: PathBuf,
        queue: Arc<InMemoryQueue>,
        store: Arc<InMemoryObjectStore>,
        engine: Arc<MockEngine>,
        topic: Arc<MemoryTopic>,
        batch: BatchOrchestrator,
    }

    fn harness(keys: &[&str], engine: MockEngine) -> Harness {
        let temp = TempDir::new().unwrap();
        let staging_root = temp.path().join("scandir");
        let store = Arc::new(InMemoryObjectStore::new().with_bucket(BUCKET));
        for key in keys {
            store.put_object_with(
                BUCKET,
                key,
                key.as_bytes().to_vec(),
                None,
                vec![Tag::new("owner", "team-a")].into(),
            );
        }
        let queue = Arc::new(InMemoryQueue::with_messages(keys.iter().copied()));
        let engine = Arc::new(engine);
        let topic = Arc::new(MemoryTopic::new());
        let publisher = ResultPublisher::new(
            store.clone(),
            topic.clone(),
            PublisherConfig::new().with_status_topic("status"),
        );
        let batch = BatchOrchestrator::new(
            queue.clone(),
            store.clone(),
            engine.clone(),
            publisher,
            BatchConfig::new(BUCKET)
                .with_pool_size(2)
                .with_staging_root(&staging_root),
        );
        Harness {
            _temp: temp,
            staging_root,
            queue,
            store,
            engine,
            topic,
            batch,
        }
    }

    fn staging_is_empty(root: &std::path::Path) -> bool {
        std::fs::read_dir(root).map(|mut d| d.next().is_none()).unwrap_or(true)
    }

    #[tokio::test]
    async fn test_batch_tags_safe_and_infected() {
        let h = harness(
            &["a.txt", "b.txt"],
            MockEngine::new().with_infection("a.txt", "Eicar-Test-Signature"),
        );

        let report = h.batch.run().await.unwrap();

        assert_eq!(report.received, 2);
        assert_eq!(report.safe, vec!["b.txt"]);
        assert_eq!(
            report.infected.get("a.txt").map(String::as_str),
            Some("Eicar-Test-Signature FOUND")
        );
        assert!(report.failures.is_empty());

        let a = h.store.tags_of(BUCKET, "a.txt").unwrap();
        assert_eq!(a.get("av-status"), Some("INFECTED"));
        assert_eq!(a.get("av-signature"), Some("Eicar-Test-Signature FOUND"));
        assert_eq!(a.get("owner"), Some("team-a"));
        let b = h.store.tags_of(BUCKET, "b.txt").unwrap();
        assert_eq!(b.get("av-status"), Some("CLEAN"));
        assert_eq!(b.get("av-signature"), Some("OK"));
        assert_eq!(a.get("av-timestamp"), b.get("av-timestamp"));

        assert_eq!(h.engine.scan_count(), 1);
        assert!(h.queue.is_empty());
        assert!(staging_is_empty(&h.staging_root));
        assert_eq!(h.topic.count(), 0);
    }

    #[tokio::test]
    async fn test_empty_queue_skips_everything() {
        let h = harness(&[], MockEngine::new());
        let report = h.batch.run().await.unwrap();
        assert_eq!(report.received, 0);
        assert_eq!(h.engine.scan_count(), 0);
        assert!(h.batch.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nested_keys_and_duplicates() {
        let h = harness(&["dir/x.bin", "dir/x.bin", "y.txt"], MockEngine::new());
        let report = h.batch.run().await.unwrap();
        assert_eq!(report.received, 3);
        assert_eq!(report.safe, vec!["dir/x.bin", "y.txt"]);
        assert_eq!(h.store.call_count_for(ops::DOWNLOAD, "dir/x.bin"), 1);
    }

    #[tokio::test]
    async fn test_download_failure_is_isolated() {
        let h = harness(&["a.txt", "b.txt"], MockEngine::new());
        h.queue.send("missing.txt").await.unwrap();
        h.store.fail(ops::DOWNLOAD, "a.txt", StoreErrorCode::AccessDenied);

        let report = h.batch.run().await.unwrap();
        assert_eq!(report.safe, vec!["b.txt"]);
        let failed: Vec<(&str, BatchStage)> = report
            .failures
            .iter()
            .map(|f| (f.key.as_str(), f.stage))
            .collect();
        assert!(failed.contains(&("a.txt", BatchStage::Download)));
        assert!(failed.contains(&("missing.txt", BatchStage::Download)));
        assert!(!h.store.tags_of(BUCKET, "a.txt").unwrap().contains_key("av-status"));
    }

    #[tokio::test]
    async fn test_escaping_key_rejected() {
        let h = harness(&["ok.txt"], MockEngine::new());
        h.queue.send("../../etc/passwd").await.unwrap();

        let report = h.batch.run().await.unwrap();
        assert_eq!(report.safe, vec!["ok.txt"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, BatchStage::Staging);
        assert_eq!(h.store.call_count_for(ops::DOWNLOAD, "../../etc/passwd"), 0);
    }

    #[tokio::test]
    async fn test_keys_sharing_a_staging_file_are_rejected() {
        let h = harness(
            &["a/b.txt", "a/b.txt/", "a//b.txt"],
            MockEngine::new().with_infection("a/b.txt", "Eicar-Test-Signature"),
        );
        h.store.put_object(BUCKET, "a/b.txt/", b"harmless".to_vec());

        let report = h.batch.run().await.unwrap();

        assert!(report.safe.is_empty());
        assert_eq!(
            report.infected.get("a/b.txt").map(String::as_str),
            Some("Eicar-Test-Signature FOUND")
        );
        let mut rejected: Vec<(&str, BatchStage)> = report
            .failures
            .iter()
            .map(|f| (f.key.as_str(), f.stage))
            .collect();
        rejected.sort_by_key(|(key, _)| *key);
        assert_eq!(
            rejected,
            vec![("a//b.txt", BatchStage::Staging), ("a/b.txt/", BatchStage::Staging)]
        );
        assert_eq!(h.store.call_count_for(ops::DOWNLOAD, "a/b.txt/"), 0);
        assert_eq!(h.store.call_count_for(ops::DOWNLOAD, "a//b.txt"), 0);
        assert_eq!(
            h.store.tags_of(BUCKET, "a/b.txt").unwrap().get("av-status"),
            Some("INFECTED")
        );
        assert!(!h.store.tags_of(BUCKET, "a/b.txt/").unwrap().contains_key("av-status"));
    }

    #[tokio::test]
    async fn test_tagging_failure_is_isolated() {
        let h = harness(&["a.txt", "b.txt", "c.txt"], MockEngine::new());
        h.store.fail(ops::PUT_TAGS, "b.txt", StoreErrorCode::AccessDenied);

        let report = h.batch.run().await.unwrap();
        assert_eq!(report.safe, vec!["a.txt", "c.txt"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, BatchStage::Tagging);
        assert_eq!(
            h.store.tags_of(BUCKET, "c.txt").unwrap().get("av-status"),
            Some("CLEAN")
        );
    }

    #[tokio::test]
    async fn test_silent_timeout_fails_batch_and_cleans_up() {
        let h = harness(&["a.txt"], MockEngine::new().with_timeout(MockTimeout::Silent));
        let err = h.batch.run().await.unwrap_err();
        assert!(matches!(err, AvError::EngineTimeout { .. }));
        assert_eq!(h.store.call_count(ops::PUT_TAGS), 0);
        assert!(staging_is_empty(&h.staging_root));
    }

    #[tokio::test]
    async fn test_partial_timeout_uses_findings() {
        let h = harness(
            &["a.txt", "b.txt"],
            MockEngine::new().with_timeout(MockTimeout::WithPartialOutput),
        );
        let report = h.batch.run().await.unwrap();
        assert_eq!(report.safe, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn test_unreported_infection_left_unclassified() {
        let h = harness(
            &["a.txt", "b.txt"],
            MockEngine::new()
                .with_infection("a.txt", "Win.Test")
                .with_unreported_infections(),
        );
        let report = h.batch.run().await.unwrap();
        assert_eq!(report.safe, vec!["b.txt"]);
        assert_eq!(report.unclassified, vec!["a.txt"]);
        assert!(!h.store.tags_of(BUCKET, "a.txt").unwrap().contains_key("av-status"));
    }
}
