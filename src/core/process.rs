//! Child processes with captured output and an optional deadline.

use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// How long the output pipes may stay open once the child itself is gone.
///
/// A forked grandchild inherits the pipes and can hold them open long after
/// the child was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

type Sink = Arc<Mutex<Vec<u8>>>;

/// Output and exit status of a finished (or killed) child process.
#[derive(Debug)]
pub(crate) struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub output: String,
    pub timed_out: bool,
    pub elapsed: Duration,
}

/// Runs `command` with stdout and stderr captured into one string.
///
/// When `timeout` elapses the child is killed and whatever it printed so far
/// is still returned. The call never outlives the child by more than a short
/// grace period, even when descendants keep the output pipes open.
pub(crate) async fn run_captured(
    mut command: Command,
    timeout: Option<Duration>,
) -> std::io::Result<ProcessOutput> {
    let started = Instant::now();
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = command.spawn()?;

    let stdout = Sink::default();
    let stderr = Sink::default();
    let mut stdout_task = tokio::spawn(pump(child.stdout.take(), stdout.clone()));
    let mut stderr_task = tokio::spawn(pump(child.stderr.take(), stderr.clone()));

    let (status, timed_out) = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => (Some(status?), false),
            Err(_) => {
                child.kill().await?;
                (None, true)
            }
        },
        None => (Some(child.wait().await?), false),
    };

    let drained = tokio::time::timeout(DRAIN_GRACE, async {
        let _ = (&mut stdout_task).await;
        let _ = (&mut stderr_task).await;
    })
    .await
    .is_ok();
    if !drained {
        tracing::warn!(
            timed_out,
            "Output pipes still open after the child exited, returning collected output"
        );
        stdout_task.abort();
        stderr_task.abort();
    }

    let mut output = collected(&stdout);
    output.push_str(&collected(&stderr));

    Ok(ProcessOutput {
        exit_code: status.and_then(|s| s.code()),
        output,
        timed_out,
        elapsed: started.elapsed(),
    })
}

async fn pump<R: AsyncRead + Unpin>(pipe: Option<R>, sink: Sink) {
    let Some(mut pipe) = pipe else {
        return;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            // A read error just truncates what we report.
            Ok(0) | Err(_) => break,
            Ok(n) => lock(&sink).extend_from_slice(&chunk[..n]),
        }
    }
}

fn lock(sink: &Sink) -> MutexGuard<'_, Vec<u8>> {
    sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn collected(sink: &Sink) -> String {
    String::from_utf8_lossy(&lock(sink)).into_owned()
}
