//! Mock engine for testing.
//!
//! This module provides a configurable engine that walks the scanned path
//! and prints real engine-formatted output, so the parsing and partitioning
//! code runs exactly as it does against a live scanner.

use crate::core::{key_for_local_path, AvError, AvResult};
use crate::engine::report::{EngineExit, EngineReport};
use crate::engine::traits::AvEngine;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use walkdir::WalkDir;

/// How a simulated timeout behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockTimeout {
    /// Per-file lines are printed before the engine is killed.
    WithPartialOutput,
    /// Nothing is printed before the engine is killed.
    Silent,
}

/// A mock engine for testing purposes.
///
/// Files are clean unless registered as infected, either by path relative
/// to the scanned directory or by file name.
///
/// # Examples
///
/// ```rust
/// use bucket_antivirus::engine::MockEngine;
///
/// let engine = MockEngine::new().with_infection("a.txt", "Eicar-Test-Signature");
/// assert_eq!(engine.scan_count(), 0);
/// ```
#[derive(Debug)]
pub struct MockEngine {
    name: String,
    infections: RwLock<HashMap<String, String>>,
    exit_code: Option<i32>,
    timeout: Option<MockTimeout>,
    report_infections: bool,
    latency: Option<Duration>,
    scan_count: AtomicU64,
    scanned: RwLock<Vec<PathBuf>>,
    unhealthy: AtomicBool,
}

impl MockEngine {
    /// Creates an engine that reports every file clean.
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            infections: RwLock::new(HashMap::new()),
            exit_code: None,
            timeout: None,
            report_infections: true,
            latency: None,
            scan_count: AtomicU64::new(0),
            scanned: RwLock::new(Vec::new()),
            unhealthy: AtomicBool::new(false),
        }
    }

    /// Sets the engine name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Reports `file` infected with `signature`.
    ///
    /// The printed verdict is `"<signature> FOUND"`.
    pub fn with_infection(self, file: impl Into<String>, signature: impl Into<String>) -> Self {
        self.add_infection(file, signature);
        self
    }

    /// Forces the process exit code, e.g. `2` for an engine error.
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Simulates the engine being killed at its timeout.
    pub fn with_timeout(mut self, mode: MockTimeout) -> Self {
        self.timeout = Some(mode);
        self
    }

    /// Exits as infected without printing per-file infected lines.
    pub fn with_unreported_infections(mut self) -> Self {
        self.report_infections = false;
        self
    }

    /// Sleeps before every scan.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Registers an infection after construction.
    pub fn add_infection(&self, file: impl Into<String>, signature: impl Into<String>) {
        self.infections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(file.into(), signature.into());
    }

    /// Returns the number of scans performed.
    pub fn scan_count(&self) -> u64 {
        self.scan_count.load(Ordering::Relaxed)
    }

    /// Returns every path passed to `scan_path`, in call order.
    pub fn scanned_paths(&self) -> Vec<PathBuf> {
        self.scanned
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Makes health checks fail or succeed.
    pub fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::Relaxed);
    }

    fn signature_for(&self, root: &Path, file: &Path) -> Option<String> {
        let infections = self
            .infections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let relative = key_for_local_path(root, file);
        let name = file.file_name().and_then(|n| n.to_str());
        relative
            .as_deref()
            .and_then(|r| infections.get(r))
            .or_else(|| name.and_then(|n| infections.get(n)))
            .cloned()
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AvEngine for MockEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn scan_path(&self, path: &Path) -> AvResult<EngineReport> {
        self.scan_count.fetch_add(1, Ordering::Relaxed);
        self.scanned
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(path.to_path_buf());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let files: Vec<PathBuf> = if path.is_dir() {
            WalkDir::new(path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .collect()
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(AvError::EngineFailed {
                engine: self.name.clone(),
                exit_code: Some(2),
                output: format!("{}: No such file or directory ERROR", path.display()),
            });
        };

        let mut output = String::new();
        let mut infected = 0usize;
        for file in &files {
            match self.signature_for(path, file) {
                Some(signature) => {
                    infected += 1;
                    if self.report_infections {
                        let _ = writeln!(output, "{}: {} FOUND", file.display(), signature);
                    }
                }
                None => {
                    let _ = writeln!(output, "{}: OK", file.display());
                }
            }
        }

        if let Some(mode) = self.timeout {
            if mode == MockTimeout::Silent {
                output.clear();
            }
            return Ok(EngineReport::new(
                self.name.clone(),
                EngineExit::TimedOut,
                output,
                self.latency.unwrap_or_default(),
            ));
        }

        let _ = write!(
            output,
            "\n----------- SCAN SUMMARY -----------\nScanned files: {}\nInfected files: {}\n",
            files.len(),
            infected
        );

        let code = self
            .exit_code
            .unwrap_or(if infected > 0 { 1 } else { 0 });
        let exit = EngineExit::from_code(Some(code)).ok_or_else(|| AvError::EngineFailed {
            engine: self.name.clone(),
            exit_code: Some(code),
            output: output.clone(),
        })?;

        Ok(EngineReport::new(
            self.name.clone(),
            exit,
            output,
            self.latency.unwrap_or_default(),
        ))
    }

    async fn health_check(&self) -> AvResult<()> {
        if self.unhealthy.load(Ordering::Relaxed) {
            return Err(AvError::engine_unavailable(&self.name, "mock engine is unhealthy"));
        }
        Ok(())
    }
}
