//! Engine trait definition.

use crate::core::AvResult;
use crate::engine::report::EngineReport;

use async_trait::async_trait;
use std::fmt::Debug;
use std::path::Path;

/// An antivirus engine that classifies files on the local filesystem.
///
/// `scan_path` accepts a single file or a directory; directories are
/// scanned recursively in one invocation. A finished scan (clean or
/// infected, or cut short by the timeout) is returned as an
/// [`EngineReport`]. Any other exit is an error.
///
/// # Example Implementation
///
/// ```rust,ignore
/// use bucket_antivirus::engine::{AvEngine, EngineReport};
/// use bucket_antivirus::core::AvResult;
/// use async_trait::async_trait;
///
/// #[derive(Debug)]
/// struct MyEngine;
///
/// #[async_trait]
/// impl AvEngine for MyEngine {
///     fn name(&self) -> &str {
///         "my-engine"
///     }
///
///     async fn scan_path(&self, path: &Path) -> AvResult<EngineReport> {
///         todo!()
///     }
/// }
/// ```
#[async_trait]
pub trait AvEngine: Send + Sync + Debug {
    /// Returns the engine name used in logs and errors.
    fn name(&self) -> &str;

    /// Scans the file or directory at `path`.
    async fn scan_path(&self, path: &Path) -> AvResult<EngineReport>;

    /// Checks that the engine can accept scans.
    async fn health_check(&self) -> AvResult<()> {
        Ok(())
    }
}

/// A shared, type-erased engine.
pub type ArcEngine = std::sync::Arc<dyn AvEngine>;
