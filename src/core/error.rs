//! Error types for the bucket-antivirus library.
//!
//! Two layers of errors exist:
//!
//! - [`StoreError`] is what every external collaborator (object store, work
//!   queue, notification topic) reports. It carries the provider's error code
//!   so callers can decide whether a failure is expected.
//! - [`AvError`] is the crate-wide error returned by the sync, scan and
//!   publish pipelines.
//!
//! The library never panics; all errors are returned as `Result` values.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A provider error code reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreErrorCode {
    /// The object does not exist (HTTP 404).
    NotFound,
    /// The key does not exist.
    NoSuchKey,
    /// The bucket or container does not exist.
    NoSuchBucket,
    /// The caller is not allowed to access the resource.
    AccessDenied,
    /// The operation is not allowed on the resource, e.g. on a delete marker.
    MethodNotAllowed,
    /// Any other provider code, kept verbatim.
    Other(String),
}

impl StoreErrorCode {
    /// Maps a raw provider code to a `StoreErrorCode`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "404" | "NotFound" => Self::NotFound,
            "NoSuchKey" => Self::NoSuchKey,
            "NoSuchBucket" => Self::NoSuchBucket,
            "403" | "AccessDenied" => Self::AccessDenied,
            "405" | "MethodNotAllowed" => Self::MethodNotAllowed,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the canonical string form of this code.
    pub fn as_str(&self) -> &str {
        match self {
            Self::NotFound => "404",
            Self::NoSuchKey => "NoSuchKey",
            Self::NoSuchBucket => "NoSuchBucket",
            Self::AccessDenied => "AccessDenied",
            Self::MethodNotAllowed => "MethodNotAllowed",
            Self::Other(code) => code,
        }
    }

    /// Returns `true` for codes meaning the object is absent.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::NotFound | Self::NoSuchKey)
    }
}

impl fmt::Display for StoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error reported by an object store, work queue or notification topic.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation} on '{resource}' failed with {code}: {message}")]
pub struct StoreError {
    /// The operation that failed, e.g. `get_object_tagging`.
    pub operation: String,
    /// The resource the operation targeted, e.g. `bucket/key`.
    pub resource: String,
    /// The provider error code.
    pub code: StoreErrorCode,
    /// Human-readable detail.
    pub message: String,
}

impl StoreError {
    /// Creates a new `StoreError`.
    pub fn new(
        operation: impl Into<String>,
        resource: impl Into<String>,
        code: StoreErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            resource: resource.into(),
            code,
            message: message.into(),
        }
    }

    /// Creates a `NoSuchKey` error for the given resource.
    pub fn no_such_key(operation: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::new(
            operation,
            resource,
            StoreErrorCode::NoSuchKey,
            "the specified key does not exist",
        )
    }

    /// Creates a `NoSuchBucket` error for the given bucket.
    pub fn no_such_bucket(operation: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self::new(
            operation,
            bucket,
            StoreErrorCode::NoSuchBucket,
            "the specified bucket does not exist",
        )
    }

    /// Wraps an I/O error raised while serving `operation`.
    pub fn io(operation: impl Into<String>, resource: impl Into<String>, err: std::io::Error) -> Self {
        let code = if err.kind() == std::io::ErrorKind::NotFound {
            StoreErrorCode::NotFound
        } else {
            StoreErrorCode::Other("IoError".into())
        };
        Self::new(operation, resource, code, err.to_string())
    }
}

/// The main error type for sync, scan and publish operations.
#[derive(Debug, Error)]
pub enum AvError {
    /// The inbound event could not be turned into a scan target.
    #[error("invalid event: {reason}")]
    InvalidEvent {
        /// What was missing or malformed.
        reason: String,
    },

    /// Configuration is missing or invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// Version checking is required but the bucket is not versioned.
    #[error("object versioning is not enabled in bucket {bucket}")]
    VersioningDisabled {
        /// The bucket that lacks versioning.
        bucket: String,
    },

    /// More than one version exists for the object being scanned.
    #[error("detected {count} object versions in {bucket}/{key}, aborting processing")]
    MultipleVersions {
        /// Bucket holding the object.
        bucket: String,
        /// Key of the object.
        key: String,
        /// Number of versions observed.
        count: usize,
    },

    /// An external collaborator failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The engine exited with a code other than clean or infected.
    #[error("unexpected exit code {exit_code:?} from engine '{engine}': {output}")]
    EngineFailed {
        /// Name of the engine.
        engine: String,
        /// Exit code, `None` when killed by a signal.
        exit_code: Option<i32>,
        /// Captured output.
        output: String,
    },

    /// The engine did not finish in time and produced no usable result.
    #[error("engine '{engine}' timed out after {elapsed:?}")]
    EngineTimeout {
        /// Name of the engine.
        engine: String,
        /// The enforced timeout.
        elapsed: Duration,
    },

    /// The engine could not be started or reached.
    #[error("engine '{engine}' is unavailable: {reason}")]
    EngineUnavailable {
        /// Name of the engine.
        engine: String,
        /// Human-readable reason for unavailability.
        reason: String,
    },

    /// A definition updater tool exited unsuccessfully.
    #[error("updater '{tool}' exited with {exit_code:?}")]
    UpdaterFailed {
        /// Name of the updater tool.
        tool: String,
        /// Exit code, `None` when killed by a signal.
        exit_code: Option<i32>,
        /// Captured output.
        output: String,
    },

    /// An object key cannot be mapped onto the local staging area.
    #[error("key '{key}' cannot be staged under {root:?}")]
    UnsafeKey {
        /// The offending key.
        key: String,
        /// The staging root.
        root: PathBuf,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AvError {
    /// Returns `true` if this error must abort processing of the object and
    /// be surfaced to the invoker rather than retried in-process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidEvent { .. }
                | Self::Configuration { .. }
                | Self::VersioningDisabled { .. }
                | Self::MultipleVersions { .. }
                | Self::EngineFailed { .. }
                | Self::EngineTimeout { .. }
                | Self::UnsafeKey { .. }
        )
    }

    /// Returns the store error code if this error came from a collaborator.
    pub fn store_code(&self) -> Option<&StoreErrorCode> {
        match self {
            Self::Store(err) => Some(&err.code),
            _ => None,
        }
    }

    /// Creates an `InvalidEvent` error.
    pub fn invalid_event(reason: impl Into<String>) -> Self {
        Self::InvalidEvent {
            reason: reason.into(),
        }
    }

    /// Creates a `Configuration` error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an `EngineUnavailable` error.
    pub fn engine_unavailable(engine: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EngineUnavailable {
            engine: engine.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// A specialized `Result` type for this crate.
pub type AvResult<T> = Result<T, AvError>;
