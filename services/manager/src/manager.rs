//! # Hardware Manager
//!
//! Owns the adapter registry, redundancy groups and the discovered sensor
//! table, and runs the two background loops:
//!
//! - **health**: every `health_check_interval`, health-check all adapters
//!   concurrently and emit `adapters_unhealthy` for those outside the top two
//!   tiers
//! - **discovery**: every `discovery_interval`, rediscover sensors on every
//!   adapter, poll the registered [`DeviceProbe`]s and emit
//!   `hardware_discovered` for anything not seen before
//!
//! Adapter failures reported through error callbacks trigger an immediate
//! health check and, for Failed/Unknown adapters, one reconnect through
//! [`HardwareAdapter::reinitialize`]. The reconnect keeps the adapter's
//! recent window, so an adapter whose link comes back but whose operations
//! keep failing stays below the routing floor. A failed reinitialisation
//! emits `adapter_failed` and is counted by the shared [`ErrorHandler`].

use crate::error::{ManagerError, Result};
use crate::events::{EventBus, EventHandler, HardwareEvent, Topic};
use crate::probe::{DeviceDescriptor, DeviceProbe};
use adapter_service::{
    AdapterHealth, AdapterSettings, ErrorCallback, ErrorHandler, ErrorHandlerConfig,
    HardwareAdapter, OperationFailure, Resilience, Transport,
};
use futures::future::join_all;
use futures::FutureExt;
use hwmesh_config::defaults::routing;
use hwmesh_config::OrchestratorConfig;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use types::{HealthState, SensorInfo};

/// Outcome of one discovery sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    /// Probe results not reported before
    pub devices: Vec<DeviceDescriptor>,
    /// Sensors not present in the table before the sweep
    pub sensors: Vec<SensorInfo>,
}

impl DiscoveryReport {
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.sensors.is_empty()
    }
}

/// Registry and supervisor for all hardware adapters
pub struct HardwareManager {
    config: OrchestratorConfig,
    adapters: RwLock<HashMap<String, Arc<HardwareAdapter>>>,
    /// Group name to members in registration order
    groups: RwLock<BTreeMap<String, Vec<String>>>,
    primary: RwLock<Option<String>>,
    /// Discovered sensors keyed by owning adapter
    sensors: RwLock<HashMap<String, Vec<SensorInfo>>>,
    known_devices: Mutex<HashSet<DeviceDescriptor>>,
    probes: RwLock<Vec<Arc<dyn DeviceProbe>>>,
    error_handler: Arc<ErrorHandler>,
    events: EventBus,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for HardwareManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareManager")
            .field("adapters", &self.adapter_names())
            .field("primary", &*self.primary.read())
            .field("groups", &*self.groups.read())
            .finish()
    }
}

impl HardwareManager {
    pub fn new(config: OrchestratorConfig) -> Arc<Self> {
        let handler = Arc::new(ErrorHandler::new(ErrorHandlerConfig::from(&config)));
        Self::with_error_handler(config, handler)
    }

    /// Share an existing error handler, e.g. one with strategies registered
    pub fn with_error_handler(config: OrchestratorConfig, error_handler: Arc<ErrorHandler>) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            adapters: RwLock::new(HashMap::new()),
            groups: RwLock::new(BTreeMap::new()),
            primary: RwLock::new(None),
            sensors: RwLock::new(HashMap::new()),
            known_devices: Mutex::new(HashSet::new()),
            probes: RwLock::new(Vec::new()),
            error_handler,
            events: EventBus::new(),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn error_handler(&self) -> &Arc<ErrorHandler> {
        &self.error_handler
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe `handler` to `topic`
    pub fn on_event(&self, topic: Topic, handler: EventHandler) {
        self.events.on(topic, handler);
    }

    pub fn add_probe(&self, probe: Arc<dyn DeviceProbe>) {
        self.probes.write().push(probe);
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    /// Initialize and register `adapter`
    ///
    /// The adapter is not registered when initialization fails. The first
    /// registered adapter becomes the primary.
    pub async fn add_adapter(
        self: &Arc<Self>,
        adapter: HardwareAdapter,
        group: Option<&str>,
    ) -> Result<Arc<HardwareAdapter>> {
        let name = adapter.name().to_string();
        if self.adapters.read().contains_key(&name) {
            return Err(ManagerError::DuplicateAdapter(name));
        }

        adapter.attach_error_handler(self.error_handler.clone());
        adapter.on_error(self.failure_callback());

        if let Err(source) = adapter.initialize().await {
            warn!(adapter = %name, "Not registering adapter: {}", source);
            return Err(ManagerError::InitializationFailed { name, source });
        }

        let adapter = Arc::new(adapter);
        {
            let mut adapters = self.adapters.write();
            if adapters.contains_key(&name) {
                return Err(ManagerError::DuplicateAdapter(name));
            }
            adapters.insert(name.clone(), adapter.clone());
        }

        if let Some(group) = group {
            self.groups
                .write()
                .entry(group.to_string())
                .or_default()
                .push(name.clone());
        }

        {
            let mut primary = self.primary.write();
            if primary.is_none() {
                *primary = Some(name.clone());
            }
        }

        info!(adapter = %name, group = ?group, kind = ?adapter.kind(), "Adapter registered");
        self.events.emit(&HardwareEvent::AdapterAdded {
            name,
            group: group.map(str::to_string),
        });
        Ok(adapter)
    }

    /// Build an adapter over `transport` with the configured settings and register it
    pub async fn add_transport(
        self: &Arc<Self>,
        name: &str,
        transport: Arc<dyn Transport>,
        group: Option<&str>,
    ) -> Result<Arc<HardwareAdapter>> {
        let adapter = HardwareAdapter::with_settings(name, transport, AdapterSettings::from(&self.config));
        self.add_adapter(adapter, group).await
    }

    /// Unregister `name`, clean it up and drop its sensors
    ///
    /// Error handler state for the id is kept, so a re-added adapter is still
    /// blacklisted if it was before.
    pub async fn remove_adapter(&self, name: &str) -> Result<()> {
        let adapter = self
            .adapters
            .write()
            .remove(name)
            .ok_or_else(|| ManagerError::AdapterNotFound(name.to_string()))?;

        {
            let mut groups = self.groups.write();
            for members in groups.values_mut() {
                members.retain(|member| member != name);
            }
            groups.retain(|_, members| !members.is_empty());
        }
        self.sensors.write().remove(name);

        let was_primary = self.primary.read().as_deref() == Some(name);
        if was_primary {
            let next = self.best_adapter();
            info!(removed = %name, primary = ?next, "Reassigning primary adapter");
            *self.primary.write() = next;
        }

        adapter.cleanup().await;
        info!(adapter = %name, "Adapter removed");
        self.events.emit(&HardwareEvent::AdapterRemoved {
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn adapter(&self, name: &str) -> Option<Arc<HardwareAdapter>> {
        self.adapters.read().get(name).cloned()
    }

    /// First member of `group` whose health score is above the lookup floor
    ///
    /// Members whose last health check could not complete are skipped.
    pub fn adapter_in_group(&self, group: &str) -> Option<Arc<HardwareAdapter>> {
        let floor = routing::GROUP_LOOKUP_FLOOR;
        let members = self.group_members(group);
        let adapters = self.adapters.read();
        members
            .iter()
            .filter_map(|member| adapters.get(member))
            .find(|adapter| adapter.routing_score().is_some_and(|score| score > floor))
            .cloned()
    }

    /// Look up by adapter name, falling back to a group lookup
    pub fn get_adapter(&self, name_or_group: &str) -> Option<Arc<HardwareAdapter>> {
        self.adapter(name_or_group)
            .or_else(|| self.adapter_in_group(name_or_group))
    }

    pub fn primary(&self) -> Option<Arc<HardwareAdapter>> {
        let name = self.primary.read().clone()?;
        self.adapter(&name)
    }

    pub fn primary_name(&self) -> Option<String> {
        self.primary.read().clone()
    }

    pub fn set_primary(&self, name: &str) -> Result<()> {
        if !self.adapters.read().contains_key(name) {
            return Err(ManagerError::AdapterNotFound(name.to_string()));
        }
        *self.primary.write() = Some(name.to_string());
        Ok(())
    }

    /// Registered adapter names, sorted
    pub fn adapter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.read().len()
    }

    pub fn group_members(&self, group: &str) -> Vec<String> {
        self.groups.read().get(group).cloned().unwrap_or_default()
    }

    pub fn groups(&self) -> BTreeMap<String, Vec<String>> {
        self.groups.read().clone()
    }

    pub(crate) fn adapters_snapshot(&self) -> Vec<Arc<HardwareAdapter>> {
        let mut adapters: Vec<Arc<HardwareAdapter>> = self.adapters.read().values().cloned().collect();
        adapters.sort_by(|a, b| a.name().cmp(b.name()));
        adapters
    }

    /// Highest routing score, ties broken by name
    fn best_adapter(&self) -> Option<String> {
        let score = |adapter: &Arc<HardwareAdapter>| adapter.routing_score().unwrap_or(0.0);
        self.adapters_snapshot()
            .into_iter()
            .max_by(|a, b| {
                score(a)
                    .total_cmp(&score(b))
                    .then_with(|| b.name().cmp(a.name()))
            })
            .map(|adapter| adapter.name().to_string())
    }

    // ------------------------------------------------------------------
    // Sensors
    // ------------------------------------------------------------------

    /// Every known sensor, ordered by id
    pub fn sensors(&self) -> Vec<SensorInfo> {
        let mut sensors: Vec<SensorInfo> = self.sensors.read().values().flatten().cloned().collect();
        sensors.sort_by(|a, b| a.id.cmp(&b.id));
        sensors
    }

    /// Known sensors measuring `quantity`
    pub fn sensors_for(&self, quantity: &str) -> Vec<SensorInfo> {
        self.sensors()
            .into_iter()
            .filter(|sensor| sensor.measures(quantity))
            .collect()
    }

    pub fn sensor(&self, sensor_id: &str) -> Option<SensorInfo> {
        self.sensors
            .read()
            .values()
            .flatten()
            .find(|sensor| sensor.id == sensor_id)
            .cloned()
    }

    /// Apply `update` to the table entry for `sensor_id`, if present
    pub(crate) fn update_sensor(&self, sensor_id: &str, update: impl FnOnce(&mut SensorInfo)) {
        let mut table = self.sensors.write();
        if let Some(sensor) = table
            .values_mut()
            .flatten()
            .find(|sensor| sensor.id == sensor_id)
        {
            update(sensor);
        }
    }

    /// Discover sensors on every adapter concurrently
    ///
    /// Adapters whose discovery fails are logged and left out of the result;
    /// their previously discovered sensors stay in the table.
    pub async fn discover_all_sensors(&self) -> BTreeMap<String, Vec<SensorInfo>> {
        let adapters = self.adapters_snapshot();
        let results = join_all(adapters.iter().map(|adapter| async move {
            (adapter.name().to_string(), adapter.discover_sensors().await)
        }))
        .await;

        let mut discovered = BTreeMap::new();
        for (name, result) in results {
            match result {
                Ok(sensors) => {
                    debug!(adapter = %name, count = sensors.len(), "Sensors discovered");
                    discovered.insert(name, sensors);
                }
                Err(e) => warn!(adapter = %name, "Sensor discovery failed: {}", e),
            }
        }

        let mut table = self.sensors.write();
        for (name, sensors) in &discovered {
            // Removed while discovery was in flight
            if !self.adapters.read().contains_key(name) {
                continue;
            }
            let previous = table.remove(name).unwrap_or_default();
            let merged = sensors
                .iter()
                .cloned()
                .map(|mut sensor| {
                    if let Some(old) = previous.iter().find(|old| old.id == sensor.id) {
                        sensor.error_count = old.error_count;
                        sensor.health_score = old.health_score;
                    }
                    sensor
                })
                .collect();
            table.insert(name.clone(), merged);
        }
        discovered
    }

    // ------------------------------------------------------------------
    // Health and failure handling
    // ------------------------------------------------------------------

    /// One health-loop iteration
    ///
    /// Emits `adapters_unhealthy` when any adapter is outside the top two
    /// tiers. No recovery is attempted here.
    pub async fn check_all_health(&self) -> BTreeMap<String, HealthState> {
        let adapters = self.adapters_snapshot();
        let results = join_all(adapters.iter().map(|adapter| async move {
            let tier = adapter.health_check().await;
            (adapter.clone(), tier)
        }))
        .await;

        let mut tiers = BTreeMap::new();
        let mut unhealthy: Vec<AdapterHealth> = Vec::new();
        for (adapter, tier) in results {
            if !tier.is_top_tier() {
                unhealthy.push(adapter.health_snapshot());
            }
            tiers.insert(adapter.name().to_string(), tier);
        }

        if !unhealthy.is_empty() {
            warn!(
                count = unhealthy.len(),
                adapters = ?unhealthy.iter().map(|h| h.name.as_str()).collect::<Vec<_>>(),
                "Unhealthy adapters"
            );
            self.events.emit(&HardwareEvent::AdaptersUnhealthy { adapters: unhealthy });
        }
        tiers
    }

    /// React to a failed operation reported by an adapter
    pub async fn handle_adapter_failure(&self, failure: OperationFailure) {
        let Some(adapter) = self.adapter(&failure.adapter) else {
            return;
        };
        if self.error_handler.is_blacklisted(adapter.name()) {
            debug!(adapter = %failure.adapter, "Blacklisted, skipping recovery");
            return;
        }

        let tier = adapter.health_check().await;
        debug!(
            adapter = %failure.adapter,
            operation = %failure.operation,
            %tier,
            "Health after failed operation"
        );
        if !tier.needs_recovery() {
            return;
        }

        let last_health = adapter.health_score();
        warn!(adapter = %failure.adapter, %tier, "Reinitializing adapter");

        match adapter.reinitialize().await {
            Ok(()) => info!(
                adapter = %failure.adapter,
                health = adapter.health_score(),
                "Adapter reconnected"
            ),
            Err(e) => {
                error!(adapter = %failure.adapter, "Recovery failed: {}", e);
                self.events.emit(&HardwareEvent::AdapterFailed {
                    name: failure.adapter.clone(),
                    last_health,
                });
                self.error_handler.note_failure(&failure.adapter, &e);
            }
        }
    }

    fn failure_callback(self: &Arc<Self>) -> ErrorCallback {
        let manager: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |failure: OperationFailure| {
            let manager = manager.clone();
            async move {
                if let Some(manager) = manager.upgrade() {
                    manager.handle_adapter_failure(failure).await;
                }
            }
            .boxed()
        })
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    /// One discovery-loop iteration
    ///
    /// Emits `hardware_discovered` when a probe reports a device, or an
    /// adapter a sensor, that was not known before.
    pub async fn run_discovery_sweep(&self) -> DiscoveryReport {
        let known_sensors: HashSet<String> = self.sensors().into_iter().map(|s| s.id).collect();
        let discovered = self.discover_all_sensors().await;
        let sensors: Vec<SensorInfo> = discovered
            .into_values()
            .flatten()
            .filter(|sensor| !known_sensors.contains(&sensor.id))
            .collect();

        let probes = self.probes.read().clone();
        let timeout = self.config.operation_timeout();
        let results = join_all(probes.iter().map(|probe| async move {
            let result = Resilience::new(probe.name(), "probe")
                .timeout(timeout)
                .run(|| probe.probe())
                .await;
            (probe.name().to_string(), result)
        }))
        .await;

        let mut devices = Vec::new();
        {
            let mut known = self.known_devices.lock();
            for (probe, result) in results {
                match result {
                    Ok(found) => {
                        for device in found {
                            if known.insert(device.clone()) {
                                devices.push(device);
                            }
                        }
                    }
                    Err(e) => warn!(probe = %probe, "Device probe failed: {}", e),
                }
            }
        }

        let report = DiscoveryReport { devices, sensors };
        if !report.is_empty() {
            info!(
                devices = report.devices.len(),
                sensors = report.sensors.len(),
                "New hardware discovered"
            );
            self.events.emit(&HardwareEvent::HardwareDiscovered {
                devices: report.devices.clone(),
                sensors: report.sensors.clone(),
            });
        }
        report
    }

    // ------------------------------------------------------------------
    // Background loops
    // ------------------------------------------------------------------

    /// Spawn the health and discovery loops
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return Err(ManagerError::AlreadyStarted);
        }
        self.shutdown.send_replace(false);

        tasks.push(self.spawn_loop("health", self.config.health_check_interval(), |manager| async move {
            manager.check_all_health().await;
        }));
        tasks.push(self.spawn_loop("discovery", self.config.discovery_interval(), |manager| async move {
            manager.run_discovery_sweep().await;
        }));

        info!(
            health_interval_ms = self.config.health_check_interval_ms,
            discovery_interval_ms = self.config.discovery_interval_ms,
            "Background loops started"
        );
        Ok(())
    }

    fn spawn_loop<F, Fut>(self: &Arc<Self>, name: &'static str, period: Duration, tick: F) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let manager = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; wait a full period instead
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(manager) = manager.upgrade() else {
                            break;
                        };
                        tick(manager).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(task = name, "Loop stopped");
        })
    }

    /// Stop the loops, then clean up every adapter
    ///
    /// Each loop gets one operation timeout to finish its current iteration
    /// before it is aborted.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks.lock());
        let grace = self.config.operation_timeout();
        for mut task in tasks {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                warn!("Background loop did not stop in time, aborting");
                task.abort();
            }
        }

        let adapters = self.adapters_snapshot();
        join_all(adapters.iter().map(|adapter| adapter.cleanup())).await;
        info!(adapters = adapters.len(), "Hardware manager shut down");
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapter_service::simulated::ops;
    use adapter_service::SimulatedTransport;
    use types::{PinMode, PlatformCapabilities, Protocol};

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            retry_max_attempts: 1,
            operation_timeout_ms: 200,
            ..OrchestratorConfig::default()
        }
    }

    fn transport(sensor_type: &str, pin: u8) -> Arc<SimulatedTransport> {
        Arc::new(
            SimulatedTransport::new(PlatformCapabilities::esp32()).with_sensor(
                SensorInfo::new("", sensor_type, "DS18B20", Protocol::OneWire).with_pins([pin]),
                20.0,
                Some("celsius"),
            ),
        )
    }

    #[tokio::test]
    async fn test_add_sets_primary_and_rejects_duplicates() {
        let manager = HardwareManager::new(config());
        manager
            .add_transport("esp32-a", transport("temperature", 4), Some("greenhouse"))
            .await
            .unwrap();
        manager
            .add_transport("esp32-b", transport("temperature", 5), Some("greenhouse"))
            .await
            .unwrap();

        assert_eq!(manager.primary_name().as_deref(), Some("esp32-a"));
        assert_eq!(manager.group_members("greenhouse"), vec!["esp32-a", "esp32-b"]);

        let err = manager
            .add_transport("esp32-a", transport("temperature", 4), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::DuplicateAdapter(_)));
    }

    #[tokio::test]
    async fn test_failed_initialize_is_not_registered() {
        let manager = HardwareManager::new(config());
        let failing = transport("temperature", 4);
        failing.set_connect_failure(true);

        let err = manager.add_transport("esp32", failing, Some("local")).await.unwrap_err();
        assert!(matches!(err, ManagerError::InitializationFailed { .. }));
        assert_eq!(manager.adapter_count(), 0);
        assert!(manager.group_members("local").is_empty());
        assert!(manager.primary().is_none());
    }

    #[tokio::test]
    async fn test_remove_cleans_up_and_reassigns_primary() {
        let manager = HardwareManager::new(config());
        let first = transport("temperature", 4);
        manager.add_transport("esp32-a", first.clone(), Some("local")).await.unwrap();
        manager.add_transport("esp32-b", transport("humidity", 5), Some("local")).await.unwrap();
        manager.discover_all_sensors().await;
        assert_eq!(manager.sensors().len(), 2);

        manager.remove_adapter("esp32-a").await.unwrap();
        assert!(!first.is_connected());
        assert_eq!(manager.primary_name().as_deref(), Some("esp32-b"));
        assert_eq!(manager.group_members("local"), vec!["esp32-b"]);
        assert!(manager.sensors_for("temperature").is_empty());

        assert!(matches!(
            manager.remove_adapter("esp32-a").await,
            Err(ManagerError::AdapterNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_group_lookup_skips_unhealthy_members() {
        let manager = HardwareManager::new(config());
        let sick = transport("temperature", 4);
        manager.add_transport("esp32-a", sick.clone(), Some("greenhouse")).await.unwrap();
        manager.add_transport("esp32-b", transport("temperature", 5), Some("greenhouse")).await.unwrap();

        // 1 failure in 3 ops scores 0.33: Degraded, below the group floor, no reinit
        let adapter = manager.adapter("esp32-a").unwrap();
        adapter.bus_scan().await.unwrap();
        adapter.bus_scan().await.unwrap();
        sick.fail_next(ops::BUS_SCAN, 1);
        assert!(adapter.bus_scan().await.is_err());
        assert!(adapter.health_score() < routing::GROUP_LOOKUP_FLOOR);

        let chosen = manager.get_adapter("greenhouse").unwrap();
        assert_eq!(chosen.name(), "esp32-b");
        assert_eq!(manager.get_adapter("esp32-a").unwrap().name(), "esp32-a");
        assert!(manager.get_adapter("nowhere").is_none());
    }

    #[tokio::test]
    async fn test_failure_reinitializes_adapter() {
        let manager = HardwareManager::new(config());
        let flaky = transport("temperature", 4);
        let adapter = manager.add_transport("esp32", flaky.clone(), None).await.unwrap();

        // A lone failure scores 0.0, so the callback reconnects
        flaky.fail_next(ops::BUS_SCAN, 1);
        assert!(adapter.bus_scan().await.is_err());

        assert_eq!(flaky.calls(ops::CONNECT), 2);
        assert_eq!(flaky.calls(ops::DISCONNECT), 1);
        assert!(adapter.is_connected());

        // The reconnect does not wipe the failure from the window
        let metrics = adapter.metrics();
        assert_eq!(metrics.window_size, 1);
        assert_eq!(metrics.errors, 1);
        assert_eq!(adapter.health_score(), 0.0);
        assert_eq!(adapter.health_state(), HealthState::Failed);
    }

    #[tokio::test]
    async fn test_recovery_keeps_pin_claims() {
        let manager = HardwareManager::new(config());
        let sim = transport("temperature", 4);
        let adapter = manager.add_transport("esp32", sim.clone(), None).await.unwrap();
        adapter.setup_pin(4, PinMode::Input).unwrap();

        sim.fail_next(ops::DIGITAL_READ, 1);
        assert!(adapter.digital_read(4).await.is_err());
        assert_eq!(sim.calls(ops::CONNECT), 2);

        assert!(!adapter.digital_read(4).await.unwrap());
        assert_eq!(sim.calls(ops::DIGITAL_READ), 2);
        assert!(!adapter.validate_pin_access(4, PinMode::Output));
    }

    #[tokio::test]
    async fn test_failed_recovery_emits_adapter_failed() {
        let manager = HardwareManager::new(config());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        manager.on_event(
            Topic::AdapterFailed,
            Arc::new(move |event: &HardwareEvent| {
                sink.lock().push(event.clone());
                Ok(())
            }),
        );

        let dying = transport("temperature", 4);
        let adapter = manager.add_transport("esp32", dying.clone(), None).await.unwrap();
        dying.set_connect_failure(true);
        dying.fail_next(ops::BUS_SCAN, 1);
        assert!(adapter.bus_scan().await.is_err());
        assert!(!adapter.is_connected());

        // No link, so the health loop does not probe the transport
        let probes = dying.calls(ops::PROBE);
        let tiers = manager.check_all_health().await;
        assert_eq!(tiers["esp32"], HealthState::Unknown);
        assert_eq!(dying.calls(ops::PROBE), probes);

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            HardwareEvent::AdapterFailed { name, last_health } if name == "esp32" && *last_health == 0.0
        ));
        // One failure from the operation, one from the failed recovery
        assert_eq!(manager.error_handler().error_count("esp32"), 2);
    }

    #[tokio::test]
    async fn test_unhealthy_adapters_reported() {
        let manager = HardwareManager::new(config());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        manager.on_event(
            Topic::AdaptersUnhealthy,
            Arc::new(move |event: &HardwareEvent| {
                sink.lock().push(event.clone());
                Ok(())
            }),
        );

        let probe_failing = transport("temperature", 4);
        manager.add_transport("esp32-a", probe_failing.clone(), None).await.unwrap();
        manager.add_transport("esp32-b", transport("temperature", 5), None).await.unwrap();
        probe_failing.set_probe_failure(true);

        let tiers = manager.check_all_health().await;
        assert_eq!(tiers["esp32-a"], HealthState::Unknown);
        assert_eq!(tiers["esp32-b"], HealthState::Excellent);

        let events = events.lock();
        assert_eq!(events.len(), 1);
        match &events[0] {
            HardwareEvent::AdaptersUnhealthy { adapters } => {
                assert_eq!(adapters.len(), 1);
                assert_eq!(adapters[0].name, "esp32-a");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_group_lookup_skips_unknown_members() {
        let manager = HardwareManager::new(config());
        let unreachable = transport("temperature", 4);
        manager.add_transport("esp32-a", unreachable.clone(), Some("greenhouse")).await.unwrap();
        manager.add_transport("esp32-b", transport("temperature", 5), Some("greenhouse")).await.unwrap();

        unreachable.set_probe_failure(true);
        manager.check_all_health().await;
        let stale = manager.adapter("esp32-a").unwrap();
        assert_eq!(stale.health_state(), HealthState::Unknown);
        assert_eq!(stale.health_score(), 1.0);
        assert_eq!(manager.get_adapter("greenhouse").unwrap().name(), "esp32-b");

        unreachable.set_probe_failure(false);
        manager.check_all_health().await;
        assert_eq!(manager.get_adapter("greenhouse").unwrap().name(), "esp32-a");
    }

    #[tokio::test]
    async fn test_discovery_failure_keeps_previous_entries() {
        let manager = HardwareManager::new(config());
        let flaky = transport("temperature", 4);
        manager.add_transport("esp32-a", flaky.clone(), None).await.unwrap();
        manager.add_transport("esp32-b", transport("humidity", 5), None).await.unwrap();

        let first = manager.discover_all_sensors().await;
        assert_eq!(first.len(), 2);
        let kept = first["esp32-a"][0].id.clone();

        flaky.fail_next(ops::DISCOVER_SENSORS, 1);
        let second = manager.discover_all_sensors().await;
        assert!(!second.contains_key("esp32-a"));
        assert_eq!(second["esp32-b"].len(), 1);

        assert!(manager.sensor(&kept).is_some());
        assert_eq!(manager.sensors().len(), 2);
        assert_eq!(manager.sensors_for("temperature").len(), 1);
    }

    #[tokio::test]
    async fn test_discovery_preserves_sensor_counters() {
        let manager = HardwareManager::new(config());
        manager.add_transport("esp32", transport("temperature", 4), None).await.unwrap();

        let first = manager.run_discovery_sweep().await;
        assert_eq!(first.sensors.len(), 1);
        let id = first.sensors[0].id.clone();
        manager.update_sensor(&id, |sensor| sensor.record_error());

        let second = manager.run_discovery_sweep().await;
        assert!(second.is_empty());
        assert_eq!(manager.sensor(&id).unwrap().error_count, 1);
    }

    #[tokio::test]
    async fn test_start_twice_fails_and_shutdown_cleans_up() {
        let manager = HardwareManager::new(OrchestratorConfig {
            health_check_interval_ms: 10,
            discovery_interval_ms: 10,
            ..config()
        });
        let sim = transport("temperature", 4);
        manager.add_transport("esp32", sim.clone(), None).await.unwrap();

        manager.start().unwrap();
        assert!(matches!(manager.start(), Err(ManagerError::AlreadyStarted)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sim.calls(ops::PROBE) >= 1);

        manager.shutdown().await;
        assert!(!manager.is_running());
        assert!(!sim.is_connected());
    }
}
