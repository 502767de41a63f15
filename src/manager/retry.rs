//! Backoff schedule for polling external processes.

use std::future::Future;
use std::time::Duration;

/// How often and for how long to retry an operation.
///
/// Attempt `n` (counting from zero) waits `initial_delay * multiplier^(n-1)`
/// before running, capped at `max_delay`. The first attempt runs
/// immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Wait before the second attempt.
    pub initial_delay: Duration,
    /// Growth factor between waits.
    pub multiplier: f64,
    /// Upper bound on any single wait.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(250),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Creates the default schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// A schedule that runs the operation exactly once.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Sets the total number of attempts (at least one).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the wait before the second attempt.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the growth factor (at least 1.0).
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Sets the cap on a single wait.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Returns the wait before attempt `attempt` (zero-indexed).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Returns the sum of every wait in the schedule.
    pub fn total_delay(&self) -> Duration {
        (0..self.max_attempts).map(|n| self.delay_before(n)).sum()
    }
}

/// Runs `operation` until it succeeds or the schedule is exhausted.
///
/// Returns the last error when every attempt failed. `label` names the
/// operation in debug logs.
pub async fn retry_async<F, Fut, T, E>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        let delay = config.delay_before(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= config.max_attempts {
                    return Err(e);
                }
                tracing::debug!(
                    operation = label,
                    attempt,
                    max_attempts = config.max_attempts,
                    error = %e,
                    "Attempt failed, retrying"
                );
            }
        }
    }
}
