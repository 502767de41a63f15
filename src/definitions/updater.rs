//! External tools that refresh the local definitions directory.

use crate::core::process::run_captured;
use crate::core::{AvError, AvResult};

use async_trait::async_trait;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// Placeholder in [`ToolCommand`] arguments replaced by the definitions
/// directory.
pub const DIR_PLACEHOLDER: &str = "{dir}";

/// The result of running an updater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterOutcome {
    /// Tool name.
    pub tool: String,
    /// Exit code, `None` when killed.
    pub exit_code: Option<i32>,
    /// Captured stdout and stderr.
    pub output: String,
}

impl UpdaterOutcome {
    /// Returns `true` on exit code 0.
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turns an unsuccessful run into [`AvError::UpdaterFailed`].
    pub fn ensure_success(&self) -> AvResult<()> {
        if self.succeeded() {
            Ok(())
        } else {
            Err(AvError::UpdaterFailed {
                tool: self.tool.clone(),
                exit_code: self.exit_code,
                output: self.output.clone(),
            })
        }
    }
}

/// Something that pulls fresh definitions into a directory.
#[async_trait]
pub trait DefinitionUpdater: Send + Sync + Debug {
    /// Returns the tool name.
    fn name(&self) -> &str;

    /// Refreshes definitions in `dir`. A non-zero exit is reported in the
    /// outcome, not as an error; errors mean the tool could not run at all.
    async fn update(&self, dir: &Path) -> AvResult<UpdaterOutcome>;
}

/// A program invocation with `{dir}` substitution.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl ToolCommand {
    /// Creates a command running `program`.
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout: None,
        }
    }

    /// Appends an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sets an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Kills the tool after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the arguments with `{dir}` replaced by `dir`.
    pub fn args_for(&self, dir: &Path) -> Vec<String> {
        let dir = dir.to_string_lossy();
        self.args
            .iter()
            .map(|a| a.replace(DIR_PLACEHOLDER, &dir))
            .collect()
    }

    /// Runs the command against `dir`.
    pub async fn run(&self, dir: &Path) -> AvResult<UpdaterOutcome> {
        let mut command = Command::new(&self.program);
        command.args(self.args_for(dir));
        for (key, value) in &self.env {
            command.env(key, value);
        }
        let run = run_captured(command, self.timeout).await.map_err(|e| {
            AvError::UpdaterFailed {
                tool: self.name.clone(),
                exit_code: None,
                output: format!("failed to start {}: {}", self.program.display(), e),
            }
        })?;
        tracing::debug!(tool = %self.name, exit_code = ?run.exit_code, output = %run.output, "Updater finished");
        Ok(UpdaterOutcome {
            tool: self.name.clone(),
            exit_code: run.exit_code,
            output: run.output,
        })
    }
}

/// Runs `freshclam` against the definitions directory.
#[derive(Debug, Clone)]
pub struct FreshclamUpdater {
    command: ToolCommand,
}

impl FreshclamUpdater {
    /// Creates an updater for the given binary and library directory.
    ///
    /// `user` is passed as `--user` when set.
    pub fn new(freshclam_path: impl Into<PathBuf>, lib_path: &Path, user: Option<&str>) -> Self {
        let lib = lib_path.to_string_lossy().into_owned();
        let mut command = ToolCommand::new("freshclam", freshclam_path)
            .arg(format!("--config-file={}/freshclam.conf", lib));
        if let Some(user) = user {
            command = command.arg(format!("--user={}", user));
        }
        command = command
            .arg(format!("--datadir={}", DIR_PLACEHOLDER))
            .env("LD_LIBRARY_PATH", lib);
        Self { command }
    }

    /// Kills freshclam after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.command = self.command.with_timeout(timeout);
        self
    }

    /// Returns the underlying command.
    pub fn command(&self) -> &ToolCommand {
        &self.command
    }
}

#[async_trait]
impl DefinitionUpdater for FreshclamUpdater {
    fn name(&self) -> &str {
        "freshclam"
    }

    async fn update(&self, dir: &Path) -> AvResult<UpdaterOutcome> {
        tokio::fs::create_dir_all(dir).await?;
        tracing::info!(dir = %dir.display(), "Starting freshclam");
        let outcome = self.command.run(dir).await?;
        if !outcome.succeeded() {
            tracing::warn!(exit_code = ?outcome.exit_code, "Unexpected exit code from freshclam");
        }
        Ok(outcome)
    }
}

/// Refreshes community signatures: a sync tool fetches them, then a
/// refresh tool rebuilds the local databases.
#[derive(Debug, Clone)]
pub struct ExtraFeedUpdater {
    sync: ToolCommand,
    refresh: ToolCommand,
}

impl ExtraFeedUpdater {
    /// Creates an updater from its two steps.
    pub fn new(sync: ToolCommand, refresh: ToolCommand) -> Self {
        Self { sync, refresh }
    }
}

#[async_trait]
impl DefinitionUpdater for ExtraFeedUpdater {
    fn name(&self) -> &str {
        "extra-feed"
    }

    async fn update(&self, dir: &Path) -> AvResult<UpdaterOutcome> {
        let synced = self.sync.run(dir).await?;
        if !synced.succeeded() {
            return Ok(synced);
        }
        self.refresh.run(dir).await
    }
}
