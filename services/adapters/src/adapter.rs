//! # Hardware Adapter
//!
//! The per-device unit of execution. An adapter owns one injected
//! [`Transport`], its lifecycle state, a capability snapshot with live pin
//! state, and a rolling metrics window from which its health score is
//! computed.
//!
//! ## Guarded operations
//!
//! Every read, write and scan goes through [`HardwareAdapter::guarded`]:
//!
//! 1. Fail fast with `HardwareNotAvailable` when the attached error handler
//!    has the adapter blacklisted; the transport is not touched and no metric
//!    is recorded.
//! 2. Take the per-adapter bus lock (FIFO), run the transport call under the
//!    operation timeout, record a metric sample, release the lock.
//! 3. On failure, run the registered error callbacks, then route the error
//!    through the error handler: retry, substitute a fallback value, or
//!    propagate. Recoverable errors are retried per the retry policy.

use crate::error::{AdapterError, ErrorKind, Result, Severity};
use crate::error_handler::{ErrorContext, ErrorHandler, Resolution};
use crate::metrics::{MetricSample, MetricsSummary, MetricsWindow};
use crate::resilience::{with_timeout, RetryPolicy};
use crate::transport::{Transport, TransportKind, TransportResult};
use chrono::Utc;
use futures::future::BoxFuture;
use hwmesh_config::defaults::operations;
use hwmesh_config::OrchestratorConfig;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use types::{
    AdapterState, HealthState, PinCapability, PinMode, PlatformCapabilities, SensorInfo,
    SensorReading,
};

/// Summary of a failed operation handed to error callbacks
#[derive(Debug, Clone)]
pub struct OperationFailure {
    pub adapter: String,
    pub operation: String,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
}

/// Async callback run after a failed operation, outside the bus lock
pub type ErrorCallback = Arc<dyn Fn(OperationFailure) -> BoxFuture<'static, ()> + Send + Sync>;

/// Per-adapter tuning
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub operation_timeout: Duration,
    pub retry: RetryPolicy,
    pub metrics_window: usize,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_millis(operations::OPERATION_TIMEOUT_MS),
            retry: RetryPolicy::default(),
            metrics_window: operations::METRICS_WINDOW,
        }
    }
}

impl From<&OrchestratorConfig> for AdapterSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            operation_timeout: config.operation_timeout(),
            retry: RetryPolicy::from(config),
            metrics_window: config.metrics_window,
        }
    }
}

/// Health snapshot of one adapter
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AdapterHealth {
    pub name: String,
    pub state: AdapterState,
    pub health: HealthState,
    pub health_score: f64,
    pub metrics: MetricsSummary,
}

/// One device platform behind an injected transport
pub struct HardwareAdapter {
    name: String,
    transport: Arc<dyn Transport>,
    settings: AdapterSettings,
    /// Serialises transport access; held only for the duration of one call
    bus: tokio::sync::Mutex<()>,
    /// Transport link is up; health probes are skipped otherwise
    connected: AtomicBool,
    state: RwLock<AdapterState>,
    health: RwLock<(HealthState, f64)>,
    capabilities: RwLock<Option<PlatformCapabilities>>,
    metrics: Mutex<MetricsWindow>,
    callbacks: RwLock<Vec<ErrorCallback>>,
    error_handler: RwLock<Option<Arc<ErrorHandler>>>,
}

impl std::fmt::Debug for HardwareAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareAdapter")
            .field("name", &self.name)
            .field("kind", &self.transport.kind())
            .field("state", &*self.state.read())
            .field("health", &*self.health.read())
            .finish()
    }
}

impl HardwareAdapter {
    pub fn new(name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self::with_settings(name, transport, AdapterSettings::default())
    }

    pub fn with_settings(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        settings: AdapterSettings,
    ) -> Self {
        let window = settings.metrics_window;
        Self {
            name: name.into(),
            transport,
            settings,
            bus: tokio::sync::Mutex::new(()),
            connected: AtomicBool::new(false),
            state: RwLock::new(AdapterState::Uninitialized),
            health: RwLock::new((HealthState::Unknown, 1.0)),
            capabilities: RwLock::new(None),
            metrics: Mutex::new(MetricsWindow::new(window)),
            callbacks: RwLock::new(Vec::new()),
            error_handler: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn settings(&self) -> &AdapterSettings {
        &self.settings
    }

    pub fn state(&self) -> AdapterState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Tier from the most recent health check
    pub fn health_state(&self) -> HealthState {
        self.health.read().0
    }

    /// Score from the most recent health check, in [0, 1]
    pub fn health_score(&self) -> f64 {
        self.health.read().1
    }

    /// Score used when choosing between adapters
    ///
    /// None while the tier is Unknown: the last score is stale once a probe
    /// could not complete, so the adapter routes as Degraded and is never
    /// picked over a floor.
    pub fn routing_score(&self) -> Option<f64> {
        match *self.health.read() {
            (HealthState::Unknown, _) => None,
            (_, score) => Some(score),
        }
    }

    pub fn metrics(&self) -> MetricsSummary {
        self.metrics.lock().summary()
    }

    pub fn health_snapshot(&self) -> AdapterHealth {
        let (health, health_score) = *self.health.read();
        AdapterHealth {
            name: self.name.clone(),
            state: self.state(),
            health,
            health_score,
            metrics: self.metrics(),
        }
    }

    /// Route failures through `handler`; blacklisted adapters fail fast
    pub fn attach_error_handler(&self, handler: Arc<ErrorHandler>) {
        *self.error_handler.write() = Some(handler);
    }

    pub fn error_handler(&self) -> Option<Arc<ErrorHandler>> {
        self.error_handler.read().clone()
    }

    /// Register a callback run after every failed operation attempt
    pub fn on_error(&self, callback: ErrorCallback) {
        self.callbacks.write().push(callback);
    }

    pub fn is_blacklisted(&self) -> bool {
        self.error_handler()
            .map(|handler| handler.is_blacklisted(&self.name))
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Connect the transport and snapshot capabilities
    ///
    /// A no-op when Ready or Degraded; callable again after
    /// [`cleanup`](Self::cleanup) or a failed attempt. A fresh start: the
    /// recent window is cleared and the score reset to 1.0.
    pub async fn initialize(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if matches!(*state, AdapterState::Ready | AdapterState::Degraded) {
                debug!(adapter = %self.name, "Already initialized");
                return Ok(());
            }
            *state = AdapterState::Initializing;
        }

        if let Err(reason) = self.connect_transport(false).await {
            return Err(self.initialization_failed(reason));
        }

        *self.capabilities.write() = Some(self.transport.platform());
        self.metrics.lock().clear_recent();
        *self.health.write() = (HealthState::Excellent, 1.0);
        self.connected.store(true, Ordering::SeqCst);
        *self.state.write() = AdapterState::Ready;
        info!(adapter = %self.name, kind = ?self.transport.kind(), "Adapter initialized");
        Ok(())
    }

    /// Reconnect after a failure, keeping history and pin claims
    ///
    /// The recent window survives, so the health score afterwards is the one
    /// the failures earned. Pins claimed before the cycle are claimed again
    /// on the fresh capability snapshot.
    pub async fn reinitialize(&self) -> Result<()> {
        let claims = self
            .capabilities
            .read()
            .as_ref()
            .map(PlatformCapabilities::claimed_pins)
            .unwrap_or_default();
        *self.state.write() = AdapterState::Initializing;

        if let Err(reason) = self.connect_transport(true).await {
            return Err(self.initialization_failed(reason));
        }

        let mut caps = self.transport.platform();
        for (pin, mode) in claims {
            if let Err(e) = caps.claim_pin(pin, mode) {
                warn!(adapter = %self.name, pin, %mode, "Pin claim lost on reconnect: {}", e);
            }
        }
        *self.capabilities.write() = Some(caps);
        self.connected.store(true, Ordering::SeqCst);

        let score = self.metrics.lock().health_score();
        let tier = HealthState::from_score(score);
        *self.health.write() = (tier, score);
        *self.state.write() = AdapterState::from_health(tier);
        info!(adapter = %self.name, %tier, score, "Adapter reinitialized");
        Ok(())
    }

    /// Disconnect the transport and release every claimed pin
    pub async fn cleanup(&self) {
        {
            let _bus = self.bus.lock().await;
            self.disconnect_transport().await;
        }

        if let Some(caps) = self.capabilities.write().as_mut() {
            caps.release_all();
        }
        *self.state.write() = AdapterState::Uninitialized;
        debug!(adapter = %self.name, "Adapter cleaned up");
    }

    /// Connect under the bus lock, dropping the old link first on `reconnect`
    async fn connect_transport(&self, reconnect: bool) -> std::result::Result<(), String> {
        let _bus = self.bus.lock().await;
        if reconnect {
            self.disconnect_transport().await;
        }

        match tokio::time::timeout(self.settings.operation_timeout, self.transport.connect()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!(
                "connect timed out after {}ms",
                self.settings.operation_timeout.as_millis()
            )),
        }
    }

    /// Caller holds the bus lock
    async fn disconnect_transport(&self) {
        self.connected.store(false, Ordering::SeqCst);
        match tokio::time::timeout(self.settings.operation_timeout, self.transport.disconnect()).await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(adapter = %self.name, "Disconnect failed: {}", err),
            Err(_) => warn!(adapter = %self.name, "Disconnect timed out"),
        }
    }

    fn initialization_failed(&self, reason: String) -> AdapterError {
        *self.state.write() = AdapterState::Failed;
        *self.health.write() = (HealthState::Failed, 0.0);
        warn!(adapter = %self.name, "Initialization failed: {}", reason);
        AdapterError::InitializationFailed {
            hardware_id: self.name.clone(),
            reason,
        }
    }

    /// Recompute the health score from the recent window
    ///
    /// A failed probe yields Unknown without touching the score. An adapter
    /// without a live link is Unknown as well and the transport is not probed.
    pub async fn health_check(&self) -> HealthState {
        if !self.is_connected() {
            self.health.write().0 = HealthState::Unknown;
            return HealthState::Unknown;
        }

        let probe = {
            let _bus = self.bus.lock().await;
            tokio::time::timeout(self.settings.operation_timeout, self.transport.probe()).await
        };

        let tier = match probe {
            Ok(Ok(())) => {
                let score = self.metrics.lock().health_score();
                let tier = HealthState::from_score(score);
                *self.health.write() = (tier, score);
                tier
            }
            Ok(Err(err)) => {
                warn!(adapter = %self.name, "Health probe failed: {}", err);
                self.health.write().0 = HealthState::Unknown;
                HealthState::Unknown
            }
            Err(_) => {
                warn!(adapter = %self.name, "Health probe timed out");
                self.health.write().0 = HealthState::Unknown;
                HealthState::Unknown
            }
        };

        if self.is_connected() {
            *self.state.write() = AdapterState::from_health(tier);
        }
        tier
    }

    // ------------------------------------------------------------------
    // Capabilities and pins
    // ------------------------------------------------------------------

    /// Capability snapshot, available once initialized
    pub fn capabilities(&self) -> Result<PlatformCapabilities> {
        self.capabilities
            .read()
            .clone()
            .ok_or_else(|| self.not_initialized())
    }

    pub fn validate_pin_access(&self, pin: u8, mode: PinMode) -> bool {
        self.capabilities
            .read()
            .as_ref()
            .map(|caps| caps.validate_pin_access(pin, mode))
            .unwrap_or(false)
    }

    pub fn available_pins(&self, mode: PinMode) -> Vec<PinCapability> {
        self.capabilities
            .read()
            .as_ref()
            .map(|caps| caps.available_pins(mode))
            .unwrap_or_default()
    }

    /// Validate and claim `pin` for `mode` without touching the transport
    pub fn setup_pin(&self, pin: u8, mode: PinMode) -> Result<()> {
        let mut guard = self.capabilities.write();
        let caps = guard.as_mut().ok_or_else(|| self.not_initialized())?;

        if !caps.validate_pin_access(pin, mode) {
            let reason = match caps.pin(pin) {
                None => "unknown pin".to_string(),
                Some(p) if p.reserved => "pin is reserved".to_string(),
                Some(p) if !p.supports(mode) => "mode not supported".to_string(),
                Some(p) => format!(
                    "pin in use as {}",
                    p.current_mode.map(|m| m.to_string()).unwrap_or_default()
                ),
            };
            return Err(self.invalid_pin(pin, mode, reason));
        }

        caps.claim_pin(pin, mode)
            .map_err(|e| self.invalid_pin(pin, mode, e.to_string()))?;
        debug!(adapter = %self.name, pin, %mode, "Pin set up");
        Ok(())
    }

    pub fn release_pin(&self, pin: u8) -> bool {
        self.capabilities
            .write()
            .as_mut()
            .map(|caps| caps.release_pin(pin))
            .unwrap_or(false)
    }

    fn require_mode(&self, pin: u8, mode: PinMode, allowed: impl Fn(PinMode) -> bool) -> Result<()> {
        let guard = self.capabilities.read();
        let caps = guard.as_ref().ok_or_else(|| self.not_initialized())?;
        match caps.pin(pin).and_then(|p| p.current_mode.filter(|_| p.in_use)) {
            Some(current) if allowed(current) => Ok(()),
            Some(current) => Err(self.invalid_pin(pin, mode, format!("pin set up as {}", current))),
            None => Err(self.invalid_pin(pin, mode, "pin not set up".to_string())),
        }
    }

    // ------------------------------------------------------------------
    // Device operations
    // ------------------------------------------------------------------

    pub async fn digital_read(&self, pin: u8) -> Result<bool> {
        self.require_mode(pin, PinMode::Input, |m| m.is_readable())?;
        self.guarded("digital_read", move |t| async move { t.digital_read(pin).await })
            .await
    }

    pub async fn digital_write(&self, pin: u8, high: bool) -> Result<()> {
        self.require_mode(pin, PinMode::Output, |m| m == PinMode::Output)?;
        self.guarded("digital_write", move |t| async move {
            t.digital_write(pin, high).await
        })
        .await
    }

    pub async fn analog_read(&self, pin: u8) -> Result<f64> {
        self.require_mode(pin, PinMode::Analog, |m| m == PinMode::Analog)?;
        self.guarded("analog_read", move |t| async move { t.analog_read(pin).await })
            .await
    }

    /// Drive a PWM pin; `duty` is clamped to [0, 1]
    pub async fn pwm_write(&self, pin: u8, duty: f64) -> Result<()> {
        self.require_mode(pin, PinMode::Pwm, |m| m == PinMode::Pwm)?;
        let duty = duty.clamp(0.0, 1.0);
        self.guarded("pwm_write", move |t| async move { t.pwm_write(pin, duty).await })
            .await
    }

    pub async fn bus_scan(&self) -> Result<Vec<u16>> {
        self.guarded("bus_scan", |t| async move { t.bus_scan().await })
            .await
    }

    /// Discover sensors and attribute them to this adapter
    pub async fn discover_sensors(&self) -> Result<Vec<SensorInfo>> {
        let mut sensors = self
            .guarded("discover_sensors", |t| async move { t.discover_sensors().await })
            .await?;
        for sensor in &mut sensors {
            sensor.assign_adapter(&self.name);
            sensor.mark_seen();
        }
        Ok(sensors)
    }

    pub async fn read_sensor(&self, sensor: &SensorInfo) -> Result<SensorReading> {
        self.guarded("read_sensor", |t| {
            let sensor = sensor.clone();
            async move { t.read_sensor(&sensor).await }
        })
        .await
    }

    // ------------------------------------------------------------------
    // Guarded execution
    // ------------------------------------------------------------------

    /// Run a transport call through the metrics, lock, timeout and
    /// error-handling pipeline
    pub async fn guarded<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        T: DeserializeOwned + Send,
        F: Fn(Arc<dyn Transport>) -> Fut + Send + Sync,
        Fut: Future<Output = TransportResult<T>> + Send,
    {
        let handler = self.error_handler();
        let policy = self.settings.retry;
        let mut ctx = ErrorContext::new(operation, self.name.as_str(), policy.max_attempts);

        loop {
            ctx.attempt += 1;

            if let Some(handler) = &handler {
                if handler.is_blacklisted(&self.name) {
                    debug!(adapter = %self.name, operation, "Blacklisted, failing fast");
                    return Err(handler.unavailable(&self.name));
                }
            }

            let err = match self.attempt(operation, &op).await {
                Ok(value) => {
                    if let Some(handler) = &handler {
                        handler.record_success(&self.name);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            self.notify_error(operation, &err).await;

            let resolution = match &handler {
                Some(handler) => handler.handle_error(&err, &ctx).await,
                None => Resolution::Propagate,
            };

            let retryable = match resolution {
                Resolution::Substitute(value) => return Ok(serde_json::from_value(value)?),
                Resolution::Blacklisted(unavailable) => return Err(unavailable),
                Resolution::Retry => true,
                Resolution::Propagate => err.is_recoverable(),
            };

            if !retryable || !ctx.has_attempts_left() {
                return Err(err);
            }

            let delay = policy.delay_for(ctx.attempt);
            debug!(
                adapter = %self.name,
                operation,
                attempt = ctx.attempt,
                max_attempts = ctx.max_attempts,
                "Retrying in {:?} after: {}",
                delay,
                err
            );
            ctx.last_error = Some(err.to_string());
            tokio::time::sleep(delay).await;
        }
    }

    /// One locked, timed transport call with its metric sample
    async fn attempt<T, F, Fut>(&self, operation: &str, op: &F) -> Result<T>
    where
        F: Fn(Arc<dyn Transport>) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let _bus = self.bus.lock().await;
        let started = Instant::now();

        let call = async {
            op(self.transport.clone())
                .await
                .map_err(|e| AdapterError::from_transport(&self.name, operation, e))
        };
        let result = with_timeout(self.settings.operation_timeout, &self.name, operation, call).await;

        let sample = MetricSample {
            operation: operation.to_string(),
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            success: result.is_ok(),
            timestamp: Utc::now(),
        };
        let error = result.as_ref().err().map(|e| e.to_string());
        self.metrics.lock().record(sample, error);

        result
    }

    async fn notify_error(&self, operation: &str, err: &AdapterError) {
        let callbacks = self.callbacks.read().clone();
        if callbacks.is_empty() {
            return;
        }

        let failure = OperationFailure {
            adapter: self.name.clone(),
            operation: operation.to_string(),
            kind: err.kind(),
            severity: err.severity(),
            message: err.to_string(),
        };
        for callback in callbacks {
            callback(failure.clone()).await;
        }
    }

    fn not_initialized(&self) -> AdapterError {
        AdapterError::NotInitialized {
            hardware_id: self.name.clone(),
        }
    }

    fn invalid_pin(&self, pin: u8, mode: PinMode, reason: String) -> AdapterError {
        AdapterError::InvalidPinAccess {
            hardware_id: self.name.clone(),
            pin,
            mode,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{ops, SimulatedTransport};
    use futures::FutureExt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use types::Protocol;

    fn settings(max_attempts: u32) -> AdapterSettings {
        AdapterSettings {
            operation_timeout: Duration::from_millis(200),
            retry: RetryPolicy::new(max_attempts, Duration::from_millis(1), 2.0),
            metrics_window: 100,
        }
    }

    async fn ready_adapter(max_attempts: u32) -> (HardwareAdapter, Arc<SimulatedTransport>) {
        let transport = Arc::new(
            SimulatedTransport::new(PlatformCapabilities::raspberry_pi()).with_sensor(
                SensorInfo::new("", "temperature", "BME280", Protocol::I2c).with_address(0x76),
                22.0,
                Some("celsius"),
            ),
        );
        let adapter = HardwareAdapter::with_settings("rpi-main", transport.clone(), settings(max_attempts));
        adapter.initialize().await.unwrap();
        (adapter, transport)
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let (adapter, transport) = ready_adapter(1).await;
        assert_eq!(adapter.state(), AdapterState::Ready);
        assert!(transport.is_connected());

        adapter.setup_pin(17, PinMode::Output).unwrap();
        adapter.cleanup().await;
        assert_eq!(adapter.state(), AdapterState::Uninitialized);
        assert!(!transport.is_connected());
        assert_eq!(adapter.health_check().await, HealthState::Unknown);

        adapter.initialize().await.unwrap();
        assert_eq!(adapter.state(), AdapterState::Ready);
        // Pins were released by cleanup
        assert!(adapter.validate_pin_access(17, PinMode::Input));
    }

    #[tokio::test]
    async fn test_initialize_failure_marks_failed() {
        let transport = Arc::new(SimulatedTransport::new(PlatformCapabilities::esp32()));
        transport.set_connect_failure(true);
        let adapter = HardwareAdapter::with_settings("esp32", transport, settings(1));

        let err = adapter.initialize().await.unwrap_err();
        assert!(matches!(err, AdapterError::InitializationFailed { .. }));
        assert_eq!(adapter.state(), AdapterState::Failed);
    }

    #[tokio::test]
    async fn test_failed_initialize_is_not_probed() {
        let transport = Arc::new(SimulatedTransport::new(PlatformCapabilities::esp32()));
        transport.set_connect_failure(true);
        let adapter = HardwareAdapter::with_settings("esp32", transport.clone(), settings(1));
        assert!(adapter.initialize().await.is_err());
        assert!(!adapter.is_connected());
        assert!(!adapter.state().is_initialized());

        assert_eq!(adapter.health_check().await, HealthState::Unknown);
        assert_eq!(transport.calls(ops::PROBE), 0);
        assert_eq!(adapter.state(), AdapterState::Failed);
    }

    #[tokio::test]
    async fn test_reinitialize_keeps_window_and_pin_claims() {
        let (adapter, transport) = ready_adapter(1).await;
        adapter.setup_pin(4, PinMode::Input).unwrap();
        adapter.setup_pin(18, PinMode::Pwm).unwrap();

        adapter.bus_scan().await.unwrap();
        transport.fail_next(ops::BUS_SCAN, 1);
        assert!(adapter.bus_scan().await.is_err());

        adapter.reinitialize().await.unwrap();
        assert_eq!(transport.calls(ops::DISCONNECT), 1);
        assert_eq!(transport.calls(ops::CONNECT), 2);
        assert!(adapter.is_connected());

        // 1 error in 2 ops is still Failed after the reconnect
        let metrics = adapter.metrics();
        assert_eq!(metrics.window_size, 2);
        assert_eq!(adapter.health_score(), 0.0);
        assert_eq!(adapter.health_state(), HealthState::Failed);
        assert_eq!(adapter.state(), AdapterState::Failed);

        // Claims carried over to the new snapshot
        assert!(!adapter.digital_read(4).await.unwrap());
        adapter.pwm_write(18, 0.5).await.unwrap();
        assert!(!adapter.validate_pin_access(4, PinMode::Output));

        // Still connected, so the health check probes and rescores
        assert_eq!(adapter.health_check().await, HealthState::Degraded);
        assert_eq!(transport.calls(ops::PROBE), 1);
    }

    #[tokio::test]
    async fn test_unknown_tier_is_not_routable() {
        let (adapter, transport) = ready_adapter(1).await;
        assert_eq!(adapter.routing_score(), Some(1.0));

        transport.set_probe_failure(true);
        assert_eq!(adapter.health_check().await, HealthState::Unknown);
        assert_eq!(adapter.health_score(), 1.0);
        assert_eq!(adapter.state(), AdapterState::Degraded);
        assert_eq!(adapter.routing_score(), None);

        transport.set_probe_failure(false);
        assert_eq!(adapter.health_check().await, HealthState::Excellent);
        assert_eq!(adapter.routing_score(), Some(1.0));
    }

    #[tokio::test]
    async fn test_pin_conflict_rejected_without_transport_call() {
        let (adapter, transport) = ready_adapter(1).await;

        adapter.setup_pin(4, PinMode::Input).unwrap();
        assert!(!adapter.validate_pin_access(4, PinMode::Pwm));
        let err = adapter.setup_pin(4, PinMode::Pwm).unwrap_err();
        assert!(matches!(err, AdapterError::InvalidPinAccess { pin: 4, .. }));

        // Reading a pin set up for input is fine, writing it is not
        assert!(!adapter.digital_read(4).await.unwrap());
        assert!(adapter.digital_write(4, true).await.is_err());
        assert_eq!(transport.calls(ops::DIGITAL_WRITE), 0);

        // Reserved UART pins reject everything
        assert!(adapter.setup_pin(0, PinMode::Input).is_err());
    }

    #[tokio::test]
    async fn test_pwm_duty_clamped() {
        let (adapter, transport) = ready_adapter(1).await;
        adapter.setup_pin(18, PinMode::Pwm).unwrap();
        adapter.pwm_write(18, 1.7).await.unwrap();
        assert_eq!(transport.duty(18), Some(1.0));
    }

    #[tokio::test]
    async fn test_guarded_records_metrics_and_callbacks() {
        let (adapter, transport) = ready_adapter(1).await;
        let callback_hits = Arc::new(AtomicU32::new(0));
        let hits = callback_hits.clone();
        adapter.on_error(Arc::new(move |failure: OperationFailure| {
            let hits = hits.clone();
            async move {
                assert_eq!(failure.operation, "bus_scan");
                hits.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        }));

        assert_eq!(adapter.bus_scan().await.unwrap(), vec![0x76]);
        transport.fail_next(ops::BUS_SCAN, 1);
        assert!(adapter.bus_scan().await.is_err());

        let metrics = adapter.metrics();
        assert_eq!(metrics.operations, 2);
        assert_eq!(metrics.errors, 1);
        assert_eq!(callback_hits.load(Ordering::SeqCst), 1);

        // 1 error in 2 ops
        assert_eq!(adapter.health_check().await, HealthState::Failed);
        assert_eq!(adapter.health_score(), 0.0);
    }

    #[tokio::test]
    async fn test_recoverable_errors_retry() {
        let (adapter, transport) = ready_adapter(3).await;
        let sensor = adapter.discover_sensors().await.unwrap().remove(0);
        assert_eq!(sensor.adapter_id, "rpi-main");
        assert!(sensor.last_seen.is_some());

        transport.fail_next(ops::READ_SENSOR, 2);
        let reading = adapter.read_sensor(&sensor).await.unwrap();
        assert_eq!(reading.value, 22.0);
        assert_eq!(transport.calls(ops::READ_SENSOR), 3);
    }

    #[tokio::test]
    async fn test_operation_timeout() {
        let (_, transport) = ready_adapter(1).await;
        let mut tight = settings(1);
        tight.operation_timeout = Duration::from_millis(10);
        let adapter = HardwareAdapter::with_settings("rpi-main", transport.clone(), tight);
        adapter.initialize().await.unwrap();

        transport.set_latency(Duration::from_millis(200));
        let err = adapter.bus_scan().await.unwrap_err();
        assert!(matches!(err, AdapterError::Timeout { timeout_ms: 10, .. }));
        assert_eq!(adapter.metrics().errors, 1);
    }

    #[tokio::test]
    async fn test_not_initialized() {
        let transport = Arc::new(SimulatedTransport::new(PlatformCapabilities::esp32()));
        let adapter = HardwareAdapter::new("esp32", transport);
        assert!(matches!(
            adapter.setup_pin(4, PinMode::Input),
            Err(AdapterError::NotInitialized { .. })
        ));
        assert!(adapter.capabilities().is_err());
    }
}
