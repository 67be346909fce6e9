//! Error handler: per-hardware circuit breaker and recovery pipeline
//!
//! One handler is shared by every adapter and keyed by hardware id. Each
//! failure is logged at its severity and counted; once the count exceeds the
//! threshold the id is blacklisted for the cooldown and every operation
//! against it fails fast. Below the threshold a failure is run through the
//! recovery pipeline: registered strategy for the error kind, then the
//! ordered fallback providers for the hardware id, then propagation.
//!
//! Blacklist expiry is a reset point: the first check after expiry clears the
//! entry and restarts the error count from zero.

use crate::error::{AdapterError, ErrorKind, Result, Severity};
use async_trait::async_trait;
use dashmap::DashMap;
use hwmesh_config::defaults::breaker;
use hwmesh_config::OrchestratorConfig;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Configuration for blacklisting behavior
#[derive(Debug, Clone)]
pub struct ErrorHandlerConfig {
    /// Error count that, once exceeded, blacklists the hardware id
    pub blacklist_threshold: u32,
    /// How long a blacklisted id stays unavailable
    pub cooldown: Duration,
}

impl Default for ErrorHandlerConfig {
    fn default() -> Self {
        Self {
            blacklist_threshold: breaker::ERROR_BLACKLIST_THRESHOLD,
            cooldown: Duration::from_millis(breaker::BLACKLIST_COOLDOWN_MS),
        }
    }
}

impl From<&OrchestratorConfig> for ErrorHandlerConfig {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            blacklist_threshold: config.error_blacklist_threshold,
            cooldown: config.blacklist_cooldown(),
        }
    }
}

/// Per-invocation context of a guarded operation
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub operation: String,
    pub hardware_id: String,
    /// 1-based attempt number
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub started_at: Instant,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>, hardware_id: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            operation: operation.into(),
            hardware_id: hardware_id.into(),
            attempt: 0,
            max_attempts: max_attempts.max(1),
            last_error: None,
            started_at: Instant::now(),
        }
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.max_attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Outcome of running a failure through the pipeline
#[derive(Debug)]
pub enum Resolution {
    /// A recovery strategy repaired the fault; re-run the operation
    Retry,
    /// A fallback provider supplied a substitute result
    Substitute(serde_json::Value),
    /// The failure tripped the breaker; fail with this error instead
    Blacklisted(AdapterError),
    /// Nothing recovered; surface the original error
    Propagate,
}

/// Repair routine registered for one error kind
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// `Ok` means the caller may retry the original operation
    async fn recover(&self, error: &AdapterError, ctx: &ErrorContext) -> Result<()>;
}

/// Alternative value source for one hardware id
#[async_trait]
pub trait FallbackProvider: Send + Sync {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn provide(&self, ctx: &ErrorContext) -> Result<serde_json::Value>;
}

/// Fallback that always yields the same value
#[derive(Debug, Clone)]
pub struct StaticFallback {
    name: String,
    value: serde_json::Value,
}

impl StaticFallback {
    pub fn new(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

#[async_trait]
impl FallbackProvider for StaticFallback {
    fn name(&self) -> &str {
        &self.name
    }

    async fn provide(&self, _ctx: &ErrorContext) -> Result<serde_json::Value> {
        Ok(self.value.clone())
    }
}

/// Blacklist state of one hardware id, for dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub hardware_id: String,
    /// Time left before the entry expires
    pub remaining_ms: u64,
}

/// Handler counters for monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorHandlerMetrics {
    pub total_errors: u64,
    pub blacklist_trips: u64,
    pub recoveries: u64,
    pub fallbacks_used: u64,
}

/// Shared circuit breaker and recovery pipeline
pub struct ErrorHandler {
    config: ErrorHandlerConfig,
    error_counts: DashMap<String, u32>,
    blacklist: DashMap<String, Instant>,
    strategies: RwLock<HashMap<ErrorKind, Arc<dyn RecoveryStrategy>>>,
    fallbacks: RwLock<HashMap<String, Vec<Arc<dyn FallbackProvider>>>>,

    // Metrics
    total_errors: AtomicU64,
    blacklist_trips: AtomicU64,
    recoveries: AtomicU64,
    fallbacks_used: AtomicU64,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new(ErrorHandlerConfig::default())
    }
}

impl ErrorHandler {
    pub fn new(config: ErrorHandlerConfig) -> Self {
        Self {
            config,
            error_counts: DashMap::new(),
            blacklist: DashMap::new(),
            strategies: RwLock::new(HashMap::new()),
            fallbacks: RwLock::new(HashMap::new()),
            total_errors: AtomicU64::new(0),
            blacklist_trips: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
            fallbacks_used: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ErrorHandlerConfig {
        &self.config
    }

    /// Register the strategy for `kind`, replacing any previous one
    pub fn register_strategy(&self, kind: ErrorKind, strategy: Arc<dyn RecoveryStrategy>) {
        self.strategies.write().insert(kind, strategy);
    }

    /// Append a fallback provider to the chain for `hardware_id`
    pub fn add_fallback(&self, hardware_id: &str, provider: Arc<dyn FallbackProvider>) {
        self.fallbacks
            .write()
            .entry(hardware_id.to_string())
            .or_default()
            .push(provider);
    }

    /// Run a failure through the pipeline
    pub async fn handle_error(&self, err: &AdapterError, ctx: &ErrorContext) -> Resolution {
        if self.is_blacklisted(&ctx.hardware_id) {
            return Resolution::Blacklisted(self.unavailable(&ctx.hardware_id));
        }

        if self.note_failure(&ctx.hardware_id, err) {
            return Resolution::Blacklisted(self.unavailable(&ctx.hardware_id));
        }

        if !err.is_recoverable() {
            return Resolution::Propagate;
        }

        let strategy = self.strategies.read().get(&err.kind()).cloned();
        if let Some(strategy) = strategy {
            match strategy.recover(err, ctx).await {
                Ok(()) => {
                    self.recoveries.fetch_add(1, Ordering::Relaxed);
                    info!(
                        hardware_id = %ctx.hardware_id,
                        operation = %ctx.operation,
                        "Recovery strategy for {:?} succeeded",
                        err.kind()
                    );
                    return Resolution::Retry;
                }
                Err(recovery_err) => {
                    warn!(
                        hardware_id = %ctx.hardware_id,
                        "Recovery strategy for {:?} failed: {}",
                        err.kind(),
                        recovery_err
                    );
                }
            }
        }

        let providers = self
            .fallbacks
            .read()
            .get(&ctx.hardware_id)
            .cloned()
            .unwrap_or_default();
        for provider in providers {
            match provider.provide(ctx).await {
                Ok(value) => {
                    self.fallbacks_used.fetch_add(1, Ordering::Relaxed);
                    info!(
                        hardware_id = %ctx.hardware_id,
                        operation = %ctx.operation,
                        "Fallback provider {} supplied a substitute",
                        provider.name()
                    );
                    return Resolution::Substitute(value);
                }
                Err(fallback_err) => {
                    debug!("Fallback provider {} failed: {}", provider.name(), fallback_err);
                }
            }
        }

        Resolution::Propagate
    }

    /// Log and count a failure; returns true if this failure tripped the breaker
    pub fn note_failure(&self, hardware_id: &str, err: &AdapterError) -> bool {
        self.log_error(hardware_id, err);
        self.total_errors.fetch_add(1, Ordering::Relaxed);

        let count = {
            let mut entry = self.error_counts.entry(hardware_id.to_string()).or_insert(0);
            *entry = entry.saturating_add(1);
            *entry
        };

        if count > self.config.blacklist_threshold && !self.blacklist.contains_key(hardware_id) {
            self.trip(hardware_id, count);
            return true;
        }
        false
    }

    /// A successful operation ends the run of consecutive failures
    pub fn record_success(&self, hardware_id: &str) {
        if let Some(mut count) = self.error_counts.get_mut(hardware_id) {
            *count = 0;
        }
    }

    /// Whether `hardware_id` is blacklisted right now
    ///
    /// An expired entry is removed and the error count reset to zero.
    pub fn is_blacklisted(&self, hardware_id: &str) -> bool {
        let expiry = match self.blacklist.get(hardware_id) {
            Some(entry) => *entry,
            None => return false,
        };

        if Instant::now() < expiry {
            return true;
        }

        self.blacklist.remove(hardware_id);
        self.error_counts.insert(hardware_id.to_string(), 0);
        info!(hardware_id, "Blacklist expired, error count reset");
        false
    }

    /// Blacklist `hardware_id` immediately for the configured cooldown
    pub fn blacklist(&self, hardware_id: &str) {
        let count = self.error_count(hardware_id);
        self.trip(hardware_id, count);
    }

    /// Forget all state for `hardware_id`
    pub fn clear(&self, hardware_id: &str) {
        self.blacklist.remove(hardware_id);
        self.error_counts.remove(hardware_id);
    }

    pub fn error_count(&self, hardware_id: &str) -> u32 {
        self.error_counts.get(hardware_id).map(|c| *c).unwrap_or(0)
    }

    /// Time until the blacklist entry for `hardware_id` expires
    pub fn remaining_cooldown(&self, hardware_id: &str) -> Option<Duration> {
        self.blacklist
            .get(hardware_id)
            .map(|expiry| expiry.saturating_duration_since(Instant::now()))
            .filter(|remaining| !remaining.is_zero())
    }

    /// Unexpired blacklist entries, sorted by hardware id
    pub fn blacklist_snapshot(&self) -> Vec<BlacklistEntry> {
        let now = Instant::now();
        let mut entries: Vec<BlacklistEntry> = self
            .blacklist
            .iter()
            .filter(|entry| *entry.value() > now)
            .map(|entry| BlacklistEntry {
                hardware_id: entry.key().clone(),
                remaining_ms: entry.value().saturating_duration_since(now).as_millis() as u64,
            })
            .collect();
        entries.sort_by(|a, b| a.hardware_id.cmp(&b.hardware_id));
        entries
    }

    pub fn metrics(&self) -> ErrorHandlerMetrics {
        ErrorHandlerMetrics {
            total_errors: self.total_errors.load(Ordering::Relaxed),
            blacklist_trips: self.blacklist_trips.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            fallbacks_used: self.fallbacks_used.load(Ordering::Relaxed),
        }
    }

    /// Error returned for operations against a blacklisted id
    pub fn unavailable(&self, hardware_id: &str) -> AdapterError {
        AdapterError::HardwareNotAvailable {
            hardware_id: hardware_id.to_string(),
            retry_after: self
                .remaining_cooldown(hardware_id)
                .unwrap_or(self.config.cooldown),
        }
    }

    fn trip(&self, hardware_id: &str, count: u32) {
        self.blacklist
            .insert(hardware_id.to_string(), Instant::now() + self.config.cooldown);
        self.blacklist_trips.fetch_add(1, Ordering::Relaxed);
        warn!(
            hardware_id,
            errors = count,
            cooldown_ms = self.config.cooldown.as_millis() as u64,
            "Hardware blacklisted"
        );
    }

    fn log_error(&self, hardware_id: &str, err: &AdapterError) {
        match err.severity() {
            Severity::Info => info!(hardware_id, kind = ?err.kind(), "{}", err),
            Severity::Warning => warn!(hardware_id, kind = ?err.kind(), "{}", err),
            Severity::Error => error!(hardware_id, kind = ?err.kind(), "{}", err),
            Severity::Critical => {
                error!(hardware_id, kind = ?err.kind(), critical = true, "{}", err)
            }
        }
    }
}
