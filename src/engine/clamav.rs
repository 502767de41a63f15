//! ClamAV engine backend.
//!
//! Scans run through the `clamdscan` client, which hands the work to a
//! `clamd` daemon listening on a Unix socket. [`DaemonHandle`] keeps that
//! daemon alive between scans.
//!
//! # Requirements
//!
//! - `clamdscan` and `clamd` binaries plus their shared libraries under
//!   the library path
//! - A `scan.conf` in the library path pointing `LocalSocket` at the
//!   configured socket

use crate::core::process::run_captured;
use crate::core::{AvError, AvResult};
use crate::engine::report::{EngineExit, EngineReport};
use crate::engine::traits::AvEngine;
use crate::manager::{retry_async, RetryConfig};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

const ENGINE_NAME: &str = "clamdscan";

/// ClamAV backend configuration.
#[derive(Debug, Clone)]
pub struct ClamAvConfig {
    /// Directory holding the ClamAV shared libraries and `scan.conf`.
    pub lib_path: PathBuf,
    /// Path to the `clamdscan` client.
    pub clamdscan_path: PathBuf,
    /// Path to the `clamd` daemon.
    pub clamd_path: PathBuf,
    /// Unix socket the daemon listens on.
    pub socket_path: PathBuf,
    /// Upper bound on one `clamdscan` run.
    pub scan_timeout: Duration,
    /// Upper bound on connecting to and reading from the socket.
    pub socket_timeout: Duration,
    /// Polling schedule while waiting for a freshly started daemon.
    pub startup_retry: RetryConfig,
}

impl Default for ClamAvConfig {
    fn default() -> Self {
        Self {
            lib_path: PathBuf::from("./bin"),
            clamdscan_path: PathBuf::from("./bin/clamdscan"),
            clamd_path: PathBuf::from("./bin/clamd"),
            socket_path: PathBuf::from("/tmp/clamd.sock"),
            scan_timeout: Duration::from_secs(240),
            socket_timeout: Duration::from_secs(10),
            startup_retry: RetryConfig::default(),
        }
    }
}

impl ClamAvConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the library directory; `clamd` is expected inside it.
    pub fn with_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lib_path = path.into();
        self.clamd_path = self.lib_path.join("clamd");
        self
    }

    /// Sets the `clamdscan` path.
    pub fn with_clamdscan_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.clamdscan_path = path.into();
        self
    }

    /// Sets the `clamd` path.
    pub fn with_clamd_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.clamd_path = path.into();
        self
    }

    /// Sets the daemon socket.
    pub fn with_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    /// Sets the scan timeout.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Sets the daemon startup polling schedule.
    pub fn with_startup_retry(mut self, retry: RetryConfig) -> Self {
        self.startup_retry = retry;
        self
    }

    /// Returns the path of `scan.conf`.
    pub fn scan_config_path(&self) -> PathBuf {
        self.lib_path.join("scan.conf")
    }
}

/// Tracks the `clamd` daemon this process started.
///
/// The daemon runs in the foreground as a direct child, so the handle can
/// stop exactly that process. It is killed when the handle is dropped.
/// [`DaemonHandle::ensure_running`] is idempotent: it only restarts the
/// daemon when a ping goes unanswered.
#[derive(Debug)]
pub struct DaemonHandle {
    config: ClamAvConfig,
    daemon: Mutex<Option<Child>>,
}

impl DaemonHandle {
    /// Creates a handle for the daemon described by `config`.
    pub fn new(config: ClamAvConfig) -> Self {
        Self {
            config,
            daemon: Mutex::new(None),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClamAvConfig {
        &self.config
    }

    /// Returns the pid of the daemon this handle started, if it is still
    /// owned.
    pub fn owned_pid(&self) -> Option<u32> {
        self.lock_daemon().as_ref().and_then(Child::id)
    }

    fn lock_daemon(&self) -> MutexGuard<'_, Option<Child>> {
        self.daemon
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sends `zPING` over the socket and expects `PONG`.
    #[cfg(unix)]
    pub async fn ping(&self) -> AvResult<()> {
        use tokio::io::AsyncWriteExt;

        let socket = &self.config.socket_path;
        let exchange = async {
            let mut stream = tokio::net::UnixStream::connect(socket).await?;
            stream.write_all(b"zPING\0").await?;
            let mut buf = [0u8; 32];
            let n = stream.read(&mut buf).await?;
            Ok::<_, std::io::Error>(String::from_utf8_lossy(&buf[..n]).into_owned())
        };

        let response = tokio::time::timeout(self.config.socket_timeout, exchange)
            .await
            .map_err(|_| AvError::engine_unavailable("clamd", "ping timed out"))?
            .map_err(|e| AvError::engine_unavailable("clamd", e.to_string()))?;

        if response.trim_matches(|c: char| c == '\0' || c.is_whitespace()) == "PONG" {
            Ok(())
        } else {
            Err(AvError::engine_unavailable(
                "clamd",
                format!("unexpected ping response: {:?}", response),
            ))
        }
    }

    /// Pinging needs a Unix socket.
    #[cfg(not(unix))]
    pub async fn ping(&self) -> AvResult<()> {
        Err(AvError::engine_unavailable(
            "clamd",
            "unix sockets are not supported on this platform",
        ))
    }

    /// Makes sure a daemon answers on the socket, restarting it if not.
    ///
    /// Returns `true` when a new daemon was started.
    pub async fn ensure_running(&self) -> AvResult<bool> {
        if self.ping().await.is_ok() {
            return Ok(false);
        }
        tracing::info!(socket = %self.config.socket_path.display(), "clamd not responding, restarting");

        self.kill_owned().await;
        match tokio::fs::remove_file(&self.config.socket_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(AvError::Io(e)),
        }

        let child = Command::new(&self.config.clamd_path)
            .arg("-c")
            .arg(self.config.scan_config_path())
            .arg("--foreground")
            .env("LD_LIBRARY_PATH", &self.config.lib_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AvError::engine_unavailable("clamd", e.to_string()))?;
        let pid = child.id();
        *self.lock_daemon() = Some(child);

        if let Err(e) = retry_async(&self.config.startup_retry, "clamd ping", || self.ping()).await {
            self.kill_owned().await;
            return Err(e);
        }
        tracing::info!(pid = ?pid, "clamd started");
        Ok(true)
    }

    async fn kill_owned(&self) {
        let owned = self.lock_daemon().take();
        let Some(mut child) = owned else {
            return;
        };
        let pid = child.id();
        if let Ok(Some(status)) = child.try_wait() {
            tracing::debug!(pid = ?pid, code = ?status.code(), "Owned clamd had already exited");
            return;
        }
        if let Err(e) = child.start_kill() {
            tracing::warn!(pid = ?pid, error = %e, "Failed to stop clamd");
            return;
        }
        match tokio::time::timeout(self.config.socket_timeout, child.wait()).await {
            Ok(Ok(_)) => tracing::debug!(pid = ?pid, "Stopped unresponsive clamd"),
            Ok(Err(e)) => tracing::warn!(pid = ?pid, error = %e, "Failed to reap clamd"),
            Err(_) => tracing::warn!(pid = ?pid, "clamd did not exit after kill"),
        }
    }
}

/// ClamAV engine driven through `clamdscan`.
///
/// # Example
///
/// ```rust,ignore
/// use bucket_antivirus::engine::{ClamAvConfig, ClamdScan, DaemonHandle};
/// use std::sync::Arc;
///
/// let config = ClamAvConfig::new().with_lib_path("/opt/clamav");
/// let daemon = Arc::new(DaemonHandle::new(config.clone()));
/// let engine = ClamdScan::new(config).with_daemon(daemon);
/// ```
#[derive(Debug)]
pub struct ClamdScan {
    config: ClamAvConfig,
    daemon: Option<Arc<DaemonHandle>>,
}

impl ClamdScan {
    /// Creates an engine with the given configuration.
    pub fn new(config: ClamAvConfig) -> Self {
        Self {
            config,
            daemon: None,
        }
    }

    /// Checks the daemon before every scan and restarts it when needed.
    pub fn with_daemon(mut self, daemon: Arc<DaemonHandle>) -> Self {
        self.daemon = Some(daemon);
        self
    }

    fn command(&self, path: &Path) -> Command {
        let mut command = Command::new(&self.config.clamdscan_path);
        command
            .arg("-v")
            .arg("--stdout")
            .arg("--config-file")
            .arg(self.config.scan_config_path())
            .arg(path)
            .env("LD_LIBRARY_PATH", &self.config.lib_path);
        command
    }
}

#[async_trait]
impl AvEngine for ClamdScan {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    async fn scan_path(&self, path: &Path) -> AvResult<EngineReport> {
        if let Some(daemon) = &self.daemon {
            daemon.ensure_running().await?;
        }

        tracing::info!(path = %path.display(), "Starting clamdscan");
        let run = run_captured(self.command(path), Some(self.config.scan_timeout))
            .await
            .map_err(|e| AvError::engine_unavailable(ENGINE_NAME, e.to_string()))?;
        tracing::debug!(output = %run.output, "clamdscan output");

        let exit = if run.timed_out {
            tracing::warn!(
                path = %path.display(),
                timeout = ?self.config.scan_timeout,
                "clamdscan timed out and was killed"
            );
            EngineExit::TimedOut
        } else {
            EngineExit::from_code(run.exit_code).ok_or_else(|| AvError::EngineFailed {
                engine: ENGINE_NAME.to_string(),
                exit_code: run.exit_code,
                output: run.output.clone(),
            })?
        };

        Ok(EngineReport::new(ENGINE_NAME, exit, run.output, run.elapsed))
    }

    async fn health_check(&self) -> AvResult<()> {
        match &self.daemon {
            Some(daemon) => daemon.ping().await,
            None if self.config.clamdscan_path.is_file() => Ok(()),
            None => Err(AvError::engine_unavailable(
                ENGINE_NAME,
                format!("{} not found", self.config.clamdscan_path.display()),
            )),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_config_builder() {
        let config = ClamAvConfig::new()
            .with_lib_path("/opt/clamav")
            .with_socket("/run/clamd.sock")
            .with_scan_timeout(Duration::from_secs(60));

        assert_eq!(config.clamd_path, PathBuf::from("/opt/clamav/clamd"));
        assert_eq!(config.scan_config_path(), PathBuf::from("/opt/clamav/scan.conf"));
        assert_eq!(config.socket_path, PathBuf::from("/run/clamd.sock"));
        assert_eq!(config.scan_timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_infected_exit_is_parsed() {
        let temp = TempDir::new().unwrap();
        let bin = script(
            temp.path(),
            "clamdscan",
            "for last; do :; done\necho \"$last: Eicar-Test-Signature FOUND\"\nexit 1",
        );
        let engine = ClamdScan::new(
            ClamAvConfig::new()
                .with_lib_path(temp.path())
                .with_clamdscan_path(bin),
        );

        let target = temp.path().join("eicar.txt");
        let report = engine.scan_path(&target).await.unwrap();
        assert_eq!(report.exit, EngineExit::Infected);
        assert_eq!(
            report.result_for_file(&target).unwrap().signature,
            "Eicar-Test-Signature FOUND"
        );
    }

    #[tokio::test]
    async fn test_unexpected_exit_is_error() {
        let temp = TempDir::new().unwrap();
        let bin = script(temp.path(), "clamdscan", "echo 'ERROR: cannot connect' >&2\nexit 2");
        let engine = ClamdScan::new(ClamAvConfig::new().with_clamdscan_path(bin));

        let err = engine.scan_path(temp.path()).await.unwrap_err();
        match err {
            AvError::EngineFailed { exit_code, output, .. } => {
                assert_eq!(exit_code, Some(2));
                assert!(output.contains("cannot connect"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_and_keeps_partial_output() {
        let temp = TempDir::new().unwrap();
        let bin = script(
            temp.path(),
            "clamdscan",
            "echo '/tmp/scandir/a.txt: OK'\nexec sleep 30",
        );
        let engine = ClamdScan::new(
            ClamAvConfig::new()
                .with_clamdscan_path(bin)
                .with_scan_timeout(Duration::from_millis(300)),
        );

        let report = engine.scan_path(temp.path()).await.unwrap();
        assert!(report.timed_out());
        let findings = report.partition(Path::new("/tmp/scandir"));
        assert_eq!(findings.safe_files, vec!["a.txt"]);
    }

    #[tokio::test]
    async fn test_ping_without_daemon_fails() {
        let temp = TempDir::new().unwrap();
        let daemon = DaemonHandle::new(
            ClamAvConfig::new().with_socket(temp.path().join("missing.sock")),
        );
        assert!(matches!(
            daemon.ping().await,
            Err(AvError::EngineUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_ensure_running_without_binary_fails() {
        let temp = TempDir::new().unwrap();
        let daemon = DaemonHandle::new(
            ClamAvConfig::new()
                .with_lib_path(temp.path())
                .with_socket(temp.path().join("clamd.sock")),
        );
        assert!(matches!(
            daemon.ensure_running().await,
            Err(AvError::EngineUnavailable { .. })
        ));
        assert_eq!(daemon.owned_pid(), None);
    }

    fn starts(path: &Path) -> Vec<u32> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect()
    }

    /// Answers pings once the fake daemon has been started `count` times.
    fn answer_pings_after(
        starts_file: PathBuf,
        count: usize,
        socket: PathBuf,
    ) -> tokio::task::JoinHandle<()> {
        use tokio::io::AsyncWriteExt;

        tokio::spawn(async move {
            while starts(&starts_file).len() < count {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            let listener = tokio::net::UnixListener::bind(&socket).unwrap();
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 6];
                if stream.read_exact(&mut buf).await.is_ok() {
                    let _ = stream.write_all(b"PONG\0").await;
                }
            }
        })
    }

    #[tokio::test]
    async fn test_unresponsive_daemon_is_killed_and_restarted() {
        let temp = TempDir::new().unwrap();
        let starts_file = temp.path().join("starts");
        script(
            temp.path(),
            "clamd",
            &format!("echo $$ >> '{}'\nexec sleep 30", starts_file.display()),
        );
        let socket = temp.path().join("clamd.sock");
        let daemon = DaemonHandle::new(
            ClamAvConfig::new()
                .with_lib_path(temp.path())
                .with_socket(&socket)
                .with_startup_retry(
                    RetryConfig::new()
                        .with_max_attempts(100)
                        .with_initial_delay(Duration::from_millis(20))
                        .with_max_delay(Duration::from_millis(50)),
                ),
        );

        let responder = answer_pings_after(starts_file.clone(), 1, socket.clone());
        assert!(daemon.ensure_running().await.unwrap());
        let first = daemon.owned_pid().unwrap();
        assert_eq!(starts(&starts_file), vec![first]);
        assert!(!daemon.ensure_running().await.unwrap());

        // The daemon stops answering but its process stays alive.
        responder.abort();
        let _ = responder.await;
        assert!(daemon.ping().await.is_err());

        let _responder = answer_pings_after(starts_file.clone(), 2, socket.clone());
        assert!(daemon.ensure_running().await.unwrap());
        let second = daemon.owned_pid().unwrap();
        assert_ne!(first, second);
        assert_eq!(starts(&starts_file), vec![first, second]);

        let first_alive = std::process::Command::new("kill")
            .arg("-0")
            .arg(first.to_string())
            .stderr(Stdio::null())
            .status()
            .unwrap()
            .success();
        assert!(!first_alive, "unresponsive clamd {first} was not stopped");
    }

    #[tokio::test]
    async fn test_failed_start_releases_daemon() {
        let temp = TempDir::new().unwrap();
        script(temp.path(), "clamd", "exec sleep 30");
        let daemon = DaemonHandle::new(
            ClamAvConfig::new()
                .with_lib_path(temp.path())
                .with_socket(temp.path().join("clamd.sock"))
                .with_startup_retry(
                    RetryConfig::new()
                        .with_max_attempts(3)
                        .with_initial_delay(Duration::from_millis(10)),
                ),
        );
        assert!(matches!(
            daemon.ensure_running().await,
            Err(AvError::EngineUnavailable { .. })
        ));
        assert_eq!(daemon.owned_pid(), None);
    }

    #[tokio::test]
    async fn test_ping_pong() {
        use tokio::io::AsyncWriteExt;

        let temp = TempDir::new().unwrap();
        let socket = temp.path().join("clamd.sock");
        let listener = tokio::net::UnixListener::bind(&socket).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 6];
            stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"zPING\0");
            stream.write_all(b"PONG\0").await.unwrap();
        });

        let daemon = DaemonHandle::new(ClamAvConfig::new().with_socket(&socket));
        daemon.ping().await.unwrap();
    }
}
