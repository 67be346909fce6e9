//! Composable resilience wrappers
//!
//! `retry`, `with_timeout` and the fallback helpers wrap any future that
//! yields an adapter [`Result`]. [`Resilience`] composes them with fallback
//! outermost, then retry, then timeout around each individual attempt.

use crate::error::{AdapterError, Result};
use hwmesh_config::defaults::operations;
use hwmesh_config::OrchestratorConfig;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy for guarded operations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each further attempt
    pub backoff: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: operations::RETRY_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(operations::RETRY_INITIAL_DELAY_MS),
            backoff: operations::RETRY_BACKOFF,
        }
    }
}

impl From<&OrchestratorConfig> for RetryPolicy {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts,
            initial_delay: config.retry_initial_delay(),
            backoff: config.retry_backoff,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            backoff,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    /// Sleep after failed attempt `attempt` (1-based):
    /// `initial_delay * backoff^(attempt - 1)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        self.initial_delay.mul_f64(self.backoff.powi(exponent))
    }
}

/// Re-invoke `op` until it succeeds or the policy is exhausted
///
/// Non-recoverable errors propagate immediately without consuming the
/// remaining attempts.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_recoverable() => return Err(err),
            Err(err) if attempt >= max_attempts => {
                warn!("Giving up after {} attempts: {}", attempt, err);
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_for(attempt);
                debug!(
                    "Attempt {}/{} failed ({}), retrying in {:?}",
                    attempt, max_attempts, err, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Abandon `fut` after `duration` with a retryable timeout error
pub async fn with_timeout<T, Fut>(
    duration: Duration,
    hardware_id: &str,
    operation: &str,
    fut: Fut,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout {
            hardware_id: hardware_id.to_string(),
            operation: operation.to_string(),
            timeout_ms: duration.as_millis() as u64,
        }),
    }
}

/// Substitute `default` for any error
pub async fn with_fallback<T, Fut>(fut: Fut, default: T) -> T
where
    Fut: Future<Output = Result<T>>,
{
    match fut.await {
        Ok(value) => value,
        Err(err) => {
            warn!("Using fallback value after error: {}", err);
            default
        }
    }
}

/// Compute a substitute from the error
pub async fn with_fallback_fn<T, Fut, D>(fut: Fut, default: D) -> T
where
    Fut: Future<Output = Result<T>>,
    D: FnOnce(AdapterError) -> T,
{
    match fut.await {
        Ok(value) => value,
        Err(err) => {
            warn!("Using fallback function after error: {}", err);
            default(err)
        }
    }
}

/// Builder composing fallback, retry and timeout around an operation
#[derive(Debug, Clone)]
pub struct Resilience {
    hardware_id: String,
    operation: String,
    retry: Option<RetryPolicy>,
    timeout: Option<Duration>,
}

impl Resilience {
    pub fn new(hardware_id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            hardware_id: hardware_id.into(),
            operation: operation.into(),
            retry: None,
            timeout: None,
        }
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Deadline applied to each attempt separately
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Run `op` under retry and per-attempt timeout
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = self.retry.unwrap_or_else(RetryPolicy::none);
        retry(&policy, || {
            let fut = op();
            async move {
                match self.timeout {
                    Some(duration) => {
                        with_timeout(duration, &self.hardware_id, &self.operation, fut).await
                    }
                    None => fut.await,
                }
            }
        })
        .await
    }

    /// Like [`run`](Self::run), substituting `default` once everything failed
    pub async fn run_or<T, F, Fut>(&self, op: F, default: T) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        with_fallback(self.run(op), default).await
    }
}
