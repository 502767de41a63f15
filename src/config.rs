//! Environment-driven configuration.
//!
//! Every setting has an environment variable and a default. [`AvConfig::load`]
//! reads a `.env` file first when one exists, so local runs and tests can
//! keep settings next to the code.

use crate::core::{AvError, AvResult, EventSource, ScanKeys};
use crate::definitions::{DefinitionCatalog, DefinitionStoreClient, DefinitionSync, FreshclamUpdater};
use crate::engine::MimeValidation;
use crate::manager::{BatchConfig, GateConfig};
use crate::publish::PublisherConfig;
use crate::store::ArcObjectStore;

#[cfg(feature = "clamav")]
use crate::engine::ClamAvConfig;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Parses a boolean setting.
///
/// Accepts `y`, `yes`, `t`, `true`, `on`, `1` and `n`, `no`, `f`, `false`,
/// `off`, `0` in any case.
pub fn parse_bool(name: &str, value: &str) -> AvResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Ok(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Ok(false),
        other => Err(AvError::configuration(format!(
            "{} must be a boolean, got '{}'",
            name, other
        ))),
    }
}

/// All settings of the scan and sync pipelines.
#[derive(Debug, Clone)]
pub struct AvConfig {
    /// Bucket holding the shared definitions (`AV_DEFINITION_S3_BUCKET`).
    pub definition_bucket: Option<String>,
    /// Key prefix of the shared definitions (`AV_DEFINITION_S3_PREFIX`).
    pub definition_prefix: String,
    /// Local definitions directory (`AV_DEFINITION_PATH`).
    pub definition_path: PathBuf,
    /// Also sync the extra definition files (`AV_EXTRA_VIRUS_DEFINITIONS`).
    pub extra_definitions: bool,

    /// Topic for scan-start messages (`AV_SCAN_START_SNS_ARN`).
    pub scan_start_topic: Option<String>,
    /// Topic for result and skip messages (`AV_STATUS_SNS_ARN`).
    pub status_topic: Option<String>,
    /// Topic for clean results only (`AV_STATUS_CLEAN_SNS_ARN`).
    pub clean_topic: Option<String>,
    /// Topic for deletions (`AV_DELETE_SNS_ARN`).
    pub delete_topic: Option<String>,
    /// `AV_STATUS_SNS_PUBLISH_CLEAN`
    pub publish_clean: bool,
    /// `AV_STATUS_SNS_PUBLISH_INFECTED`
    pub publish_infected: bool,

    /// `AV_DELETE_INFECTED_FILES`
    pub delete_infected: bool,
    /// `AV_PROCESS_ORIGINAL_VERSION_ONLY`
    pub process_original_version_only: bool,
    /// `AV_SET_TAGS`
    pub set_tags: bool,
    /// `AV_SET_METADATA`
    pub set_metadata: bool,

    /// Reserved tag, metadata and message keys.
    pub keys: ScanKeys,
    /// `AV_GENERATED_SAFELY_TAG`
    pub generated_safely_tag: String,
    /// `AV_GENERATED_SAFELY_VALUE`
    pub generated_safely_value: String,
    /// `MIME_VALIDATION` with its allow-list from `VALID_MIMES`.
    pub mime_validation: MimeValidation,

    /// `CLAMAVLIB_PATH`
    pub clamav_lib_path: PathBuf,
    /// `CLAMDSCAN_PATH`
    pub clamdscan_path: PathBuf,
    /// `FRESHCLAM_PATH`
    pub freshclam_path: PathBuf,
    /// `CLAMDSCAN_TIMEOUT`, in seconds.
    pub clamdscan_timeout: Duration,
    /// `CLAMD_SOCKET`
    pub clamd_socket: PathBuf,
    /// User freshclam drops privileges to (`USER`).
    pub freshclam_user: Option<String>,

    /// `SQS_QUEUE_URL`
    pub queue_url: Option<String>,
    /// `AV_SCAN_BUCKET_NAME`
    pub scan_bucket: Option<String>,
    /// `AV_SCAN_POOL_SIZE`
    pub pool_size: usize,
    /// `AV_STAGING_PATH`
    pub staging_path: PathBuf,

    /// `EVENT_SOURCE`
    pub event_source: EventSource,
}

impl Default for AvConfig {
    fn default() -> Self {
        Self {
            definition_bucket: None,
            definition_prefix: "clamav_defs".to_string(),
            definition_path: PathBuf::from("/tmp/clamav_defs"),
            extra_definitions: false,
            scan_start_topic: None,
            status_topic: None,
            clean_topic: None,
            delete_topic: None,
            publish_clean: true,
            publish_infected: true,
            delete_infected: false,
            process_original_version_only: false,
            set_tags: true,
            set_metadata: false,
            keys: ScanKeys::default(),
            generated_safely_tag: "av-generated-safely".to_string(),
            generated_safely_value: "true".to_string(),
            mime_validation: MimeValidation::Disabled,
            clamav_lib_path: PathBuf::from("./bin"),
            clamdscan_path: PathBuf::from("./bin/clamdscan"),
            freshclam_path: PathBuf::from("./bin/freshclam"),
            clamdscan_timeout: Duration::from_secs(240),
            clamd_socket: PathBuf::from("/tmp/clamd.sock"),
            freshclam_user: None,
            queue_url: None,
            scan_bucket: None,
            pool_size: 10,
            staging_path: PathBuf::from("/tmp/scandir"),
            event_source: EventSource::S3,
        }
    }
}

/// Reads typed values out of a variable lookup.
struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn string_or(&self, name: &str, default: String) -> String {
        self.string(name).unwrap_or(default)
    }

    fn path_or(&self, name: &str, default: PathBuf) -> PathBuf {
        self.string(name).map(PathBuf::from).unwrap_or(default)
    }

    fn bool_or(&self, name: &str, default: bool) -> AvResult<bool> {
        self.string(name)
            .map_or(Ok(default), |value| parse_bool(name, &value))
    }

    fn number_or<T: std::str::FromStr>(&self, name: &str, default: T) -> AvResult<T> {
        match self.string(name) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|_| {
                AvError::configuration(format!("{} must be a number, got '{}'", name, value))
            }),
        }
    }
}

impl AvConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup<F>(lookup: F) -> AvResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };
        let d = Self::default();
        let dk = d.keys.clone();

        let keys = ScanKeys {
            status: vars.string_or("AV_STATUS_METADATA", dk.status),
            signature: vars.string_or("AV_SIGNATURE_METADATA", dk.signature),
            timestamp: vars.string_or("AV_TIMESTAMP_METADATA", dk.timestamp),
            scan_start: vars.string_or("AV_SCAN_START_METADATA", dk.scan_start),
            skipped: vars.string_or("AV_SKIP_METADATA", dk.skipped),
            deleted: vars.string_or("AV_DELETED_METADATA", dk.deleted),
        };

        let event_source = match vars.string("EVENT_SOURCE") {
            Some(value) => value.parse()?,
            None => d.event_source,
        };

        let mime_validation = match vars.string("MIME_VALIDATION") {
            Some(mode) => MimeValidation::from_setting(&mode, vars.string("VALID_MIMES").as_deref())?,
            None => d.mime_validation,
        };

        let pool_size: usize = vars.number_or("AV_SCAN_POOL_SIZE", d.pool_size)?;
        if pool_size == 0 {
            return Err(AvError::configuration("AV_SCAN_POOL_SIZE must be at least 1"));
        }

        Ok(Self {
            definition_bucket: vars.string("AV_DEFINITION_S3_BUCKET"),
            definition_prefix: vars.string_or("AV_DEFINITION_S3_PREFIX", d.definition_prefix),
            definition_path: vars.path_or("AV_DEFINITION_PATH", d.definition_path),
            extra_definitions: vars.bool_or("AV_EXTRA_VIRUS_DEFINITIONS", d.extra_definitions)?,
            scan_start_topic: vars.string("AV_SCAN_START_SNS_ARN"),
            status_topic: vars.string("AV_STATUS_SNS_ARN"),
            clean_topic: vars.string("AV_STATUS_CLEAN_SNS_ARN"),
            delete_topic: vars.string("AV_DELETE_SNS_ARN"),
            publish_clean: vars.bool_or("AV_STATUS_SNS_PUBLISH_CLEAN", d.publish_clean)?,
            publish_infected: vars.bool_or("AV_STATUS_SNS_PUBLISH_INFECTED", d.publish_infected)?,
            delete_infected: vars.bool_or("AV_DELETE_INFECTED_FILES", d.delete_infected)?,
            process_original_version_only: vars
                .bool_or("AV_PROCESS_ORIGINAL_VERSION_ONLY", d.process_original_version_only)?,
            set_tags: vars.bool_or("AV_SET_TAGS", d.set_tags)?,
            set_metadata: vars.bool_or("AV_SET_METADATA", d.set_metadata)?,
            keys,
            generated_safely_tag: vars.string_or("AV_GENERATED_SAFELY_TAG", d.generated_safely_tag),
            generated_safely_value: vars
                .string_or("AV_GENERATED_SAFELY_VALUE", d.generated_safely_value),
            mime_validation,
            clamav_lib_path: vars.path_or("CLAMAVLIB_PATH", d.clamav_lib_path),
            clamdscan_path: vars.path_or("CLAMDSCAN_PATH", d.clamdscan_path),
            freshclam_path: vars.path_or("FRESHCLAM_PATH", d.freshclam_path),
            clamdscan_timeout: Duration::from_secs(
                vars.number_or("CLAMDSCAN_TIMEOUT", d.clamdscan_timeout.as_secs())?,
            ),
            clamd_socket: vars.path_or("CLAMD_SOCKET", d.clamd_socket),
            freshclam_user: vars.string("USER"),
            queue_url: vars.string("SQS_QUEUE_URL"),
            scan_bucket: vars.string("AV_SCAN_BUCKET_NAME"),
            pool_size,
            staging_path: vars.path_or("AV_STAGING_PATH", d.staging_path),
            event_source,
        })
    }

    /// Builds a configuration from the process environment.
    pub fn from_env() -> AvResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads `.env` if present, then reads the process environment.
    pub fn load() -> AvResult<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
            Err(e) if e.not_found() => {}
            Err(e) => {
                return Err(AvError::configuration(format!("failed to read .env: {}", e)));
            }
        }
        Self::from_env()
    }

    /// Sets the definitions bucket.
    pub fn with_definition_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.definition_bucket = Some(bucket.into());
        self
    }

    /// Sets the local definitions directory.
    pub fn with_definition_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.definition_path = path.into();
        self
    }

    /// Sets the bucket scanned by the batch pipeline.
    pub fn with_scan_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.scan_bucket = Some(bucket.into());
        self
    }

    /// Sets the staging root.
    pub fn with_staging_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.staging_path = path.into();
        self
    }

    /// Sets the status topic.
    pub fn with_status_topic(mut self, topic: impl Into<String>) -> Self {
        self.status_topic = Some(topic.into());
        self
    }

    /// Enables or disables deletion of infected objects.
    pub fn with_delete_infected(mut self, enabled: bool) -> Self {
        self.delete_infected = enabled;
        self
    }

    /// Enables or disables the version-safety check.
    pub fn with_process_original_version_only(mut self, enabled: bool) -> Self {
        self.process_original_version_only = enabled;
        self
    }

    /// Returns the reserved key names.
    pub fn scan_keys(&self) -> ScanKeys {
        self.keys.clone()
    }

    /// Settings for the result publisher.
    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            keys: self.scan_keys(),
            set_tags: self.set_tags,
            set_metadata: self.set_metadata,
            scan_start_topic: self.scan_start_topic.clone(),
            status_topic: self.status_topic.clone(),
            clean_topic: self.clean_topic.clone(),
            delete_topic: self.delete_topic.clone(),
            publish_clean: self.publish_clean,
            publish_infected: self.publish_infected,
        }
    }

    /// Settings for the single-object scan gate.
    pub fn gate_config(&self) -> GateConfig {
        GateConfig::new()
            .with_event_source(self.event_source)
            .with_version_check(self.process_original_version_only)
            .with_delete_infected(self.delete_infected)
            .with_skip_tag(&self.generated_safely_tag, &self.generated_safely_value)
            .with_staging_root(&self.staging_path)
            .with_mime_validation(self.mime_validation.clone())
    }

    /// Settings for the batch orchestrator. Requires a scan bucket.
    pub fn batch_config(&self) -> AvResult<BatchConfig> {
        let bucket = self
            .scan_bucket
            .as_deref()
            .ok_or_else(|| AvError::configuration("AV_SCAN_BUCKET_NAME is not set"))?;
        Ok(BatchConfig::new(bucket)
            .with_pool_size(self.pool_size)
            .with_staging_root(&self.staging_path))
    }

    /// The catalog of definition files to keep in sync.
    pub fn definition_catalog(&self) -> DefinitionCatalog {
        DefinitionCatalog::new().with_extra(self.extra_definitions)
    }

    /// A client for the shared definitions store. Requires a definitions
    /// bucket.
    pub fn definition_client(&self, store: ArcObjectStore) -> AvResult<DefinitionStoreClient> {
        let bucket = self
            .definition_bucket
            .as_deref()
            .ok_or_else(|| AvError::configuration("AV_DEFINITION_S3_BUCKET is not set"))?;
        Ok(DefinitionStoreClient::new(store, bucket, &self.definition_prefix))
    }

    /// A definition synchronizer using freshclam as the upstream updater.
    pub fn definition_sync(&self, store: ArcObjectStore) -> AvResult<DefinitionSync> {
        Ok(
            DefinitionSync::new(self.definition_client(store)?, &self.definition_path)
                .with_catalog(self.definition_catalog())
                .with_updater(Arc::new(self.freshclam_updater())),
        )
    }

    /// The freshclam updater.
    pub fn freshclam_updater(&self) -> FreshclamUpdater {
        FreshclamUpdater::new(
            &self.freshclam_path,
            &self.clamav_lib_path,
            self.freshclam_user.as_deref(),
        )
    }

    /// Settings for the ClamAV engine.
    #[cfg(feature = "clamav")]
    pub fn clamav_config(&self) -> ClamAvConfig {
        ClamAvConfig::new()
            .with_lib_path(&self.clamav_lib_path)
            .with_clamdscan_path(&self.clamdscan_path)
            .with_socket(&self.clamd_socket)
            .with_scan_timeout(self.clamdscan_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryObjectStore;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> AvResult<AvConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AvConfig::from_lookup(move |name| vars.get(name).cloned())
    }

    #[test]
    fn test_parse_bool() {
        for truthy in ["y", "YES", "t", "True", "on", "1"] {
            assert!(parse_bool("X", truthy).unwrap(), "{truthy}");
        }
        for falsy in ["n", "No", "F", "false", "OFF", "0"] {
            assert!(!parse_bool("X", falsy).unwrap(), "{falsy}");
        }
        let err = parse_bool("AV_SET_TAGS", "maybe").unwrap_err();
        assert!(err.to_string().contains("AV_SET_TAGS"));
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.definition_prefix, "clamav_defs");
        assert_eq!(config.definition_path, PathBuf::from("/tmp/clamav_defs"));
        assert!(config.publish_clean && config.publish_infected && config.set_tags);
        assert!(!config.delete_infected && !config.set_metadata);
        assert_eq!(config.keys, ScanKeys::default());
        assert_eq!(config.clamdscan_timeout, Duration::from_secs(240));
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.event_source, EventSource::S3);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("AV_DEFINITION_S3_BUCKET", "defs"),
            ("AV_STATUS_METADATA", "scan-status"),
            ("AV_DELETE_INFECTED_FILES", "yes"),
            ("AV_STATUS_SNS_PUBLISH_CLEAN", "off"),
            ("CLAMDSCAN_TIMEOUT", "30"),
            ("EVENT_SOURCE", "SNS"),
            ("AV_SCAN_POOL_SIZE", "4"),
            ("AV_STATUS_SNS_ARN", "arn:status"),
        ])
        .unwrap();

        assert_eq!(config.definition_bucket.as_deref(), Some("defs"));
        assert_eq!(config.keys.status, "scan-status");
        assert!(config.delete_infected);
        assert!(!config.publish_clean);
        assert_eq!(config.clamdscan_timeout, Duration::from_secs(30));
        assert_eq!(config.event_source, EventSource::Sns);

        let publisher = config.publisher_config();
        assert_eq!(publisher.keys.status, "scan-status");
        assert_eq!(publisher.status_topic.as_deref(), Some("arn:status"));
        assert!(!publisher.publish_clean);

        let gate = config.gate_config();
        assert!(gate.delete_infected);
        assert_eq!(gate.event_source, EventSource::Sns);
    }

    #[test]
    fn test_mime_validation_settings() {
        assert_eq!(from_pairs(&[]).unwrap().mime_validation, MimeValidation::Disabled);

        let config = from_pairs(&[("MIME_VALIDATION", "s3-content-type")]).unwrap();
        assert_eq!(config.gate_config().mime_validation, MimeValidation::ContentType);

        let config = from_pairs(&[
            ("MIME_VALIDATION", "static"),
            ("VALID_MIMES", "image/png,application/pdf"),
        ])
        .unwrap();
        assert_eq!(
            config.mime_validation,
            MimeValidation::Static(vec!["image/png".into(), "application/pdf".into()])
        );

        let err = from_pairs(&[("MIME_VALIDATION", "magic")]).unwrap_err();
        assert!(err.to_string().contains("MIME_VALIDATION"));
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let err = from_pairs(&[("AV_SET_METADATA", "sometimes")]).unwrap_err();
        assert!(err.to_string().contains("AV_SET_METADATA"));

        let err = from_pairs(&[("CLAMDSCAN_TIMEOUT", "soon")]).unwrap_err();
        assert!(err.to_string().contains("CLAMDSCAN_TIMEOUT"));

        assert!(from_pairs(&[("AV_SCAN_POOL_SIZE", "0")]).is_err());
        assert!(from_pairs(&[("EVENT_SOURCE", "kafka")]).is_err());
    }

    #[test]
    fn test_required_buckets() {
        let config = AvConfig::new();
        let store = Arc::new(InMemoryObjectStore::new());
        assert!(config.batch_config().is_err());
        assert!(config.definition_client(store.clone()).is_err());

        let config = config
            .with_scan_bucket("uploads")
            .with_definition_bucket("defs");
        assert_eq!(config.batch_config().unwrap().bucket, "uploads");
        assert_eq!(config.definition_client(store).unwrap().bucket(), "defs");
    }
}
