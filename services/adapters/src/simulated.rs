//! Simulated transport
//!
//! In-process stand-in for real hardware: serves a platform profile and a
//! fixed set of sensors, and lets callers script failures and latency. Every
//! call is counted so tests can assert whether the transport was reached.

use crate::transport::{Transport, TransportError, TransportKind, TransportResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use types::{PlatformCapabilities, SensorInfo, SensorReading};

/// Operation names accepted by the failure-scripting methods
pub mod ops {
    pub const CONNECT: &str = "connect";
    pub const DISCONNECT: &str = "disconnect";
    pub const PROBE: &str = "probe";
    pub const DIGITAL_READ: &str = "digital_read";
    pub const DIGITAL_WRITE: &str = "digital_write";
    pub const ANALOG_READ: &str = "analog_read";
    pub const PWM_WRITE: &str = "pwm_write";
    pub const BUS_SCAN: &str = "bus_scan";
    pub const DISCOVER_SENSORS: &str = "discover_sensors";
    pub const READ_SENSOR: &str = "read_sensor";
}

#[derive(Debug, Clone)]
struct SimulatedSensor {
    info: SensorInfo,
    value: f64,
    unit: Option<String>,
}

#[derive(Debug, Default)]
struct FailurePlan {
    remaining: u32,
    always: bool,
}

#[derive(Debug, Default)]
struct DeviceState {
    levels: HashMap<u8, bool>,
    duty: HashMap<u8, f64>,
    analog: HashMap<u8, f64>,
}

/// Scriptable in-process transport
#[derive(Debug)]
pub struct SimulatedTransport {
    platform: PlatformCapabilities,
    sensors: Mutex<Vec<SimulatedSensor>>,
    bus_devices: Vec<u16>,
    device: Mutex<DeviceState>,
    failures: Mutex<HashMap<String, FailurePlan>>,
    fail_rate: f64,
    fail_accumulator: Mutex<f64>,
    latency: Mutex<Duration>,
    connected: AtomicBool,
    calls: Mutex<HashMap<String, u64>>,
}

impl SimulatedTransport {
    pub fn new(platform: PlatformCapabilities) -> Self {
        Self {
            platform,
            sensors: Mutex::new(Vec::new()),
            bus_devices: Vec::new(),
            device: Mutex::new(DeviceState::default()),
            failures: Mutex::new(HashMap::new()),
            fail_rate: 0.0,
            fail_accumulator: Mutex::new(0.0),
            latency: Mutex::new(Duration::ZERO),
            connected: AtomicBool::new(false),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Serve a sensor reporting `value`
    ///
    /// Bus-addressed sensors also answer bus scans.
    pub fn with_sensor(mut self, info: SensorInfo, value: f64, unit: Option<&str>) -> Self {
        if let Some(address) = info.address {
            if !self.bus_devices.contains(&address) {
                self.bus_devices.push(address);
            }
        }
        self.sensors.get_mut().push(SimulatedSensor {
            info,
            value,
            unit: unit.map(str::to_string),
        });
        self
    }

    pub fn with_bus_devices(mut self, addresses: impl IntoIterator<Item = u16>) -> Self {
        self.bus_devices.extend(addresses);
        self
    }

    /// Fail this fraction of data operations, spread deterministically
    pub fn with_fail_rate(mut self, rate: f64) -> Self {
        self.fail_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    /// Artificial delay applied to every call
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Change the value a sensor reports, matched by name
    pub fn set_sensor_value(&self, name: &str, value: f64) {
        for sensor in self.sensors.lock().iter_mut().filter(|s| s.info.name == name) {
            sensor.value = value;
        }
    }

    pub fn set_analog(&self, pin: u8, value: f64) {
        self.device.lock().analog.insert(pin, value);
    }

    /// Last duty cycle written to `pin`
    pub fn duty(&self, pin: u8) -> Option<f64> {
        self.device.lock().duty.get(&pin).copied()
    }

    /// Fail the next `count` calls of `op`
    pub fn fail_next(&self, op: &str, count: u32) {
        self.failures.lock().entry(op.to_string()).or_default().remaining += count;
    }

    /// Fail every call of `op` until [`heal`](Self::heal)
    pub fn fail_always(&self, op: &str) {
        self.failures.lock().entry(op.to_string()).or_default().always = true;
    }

    pub fn set_probe_failure(&self, failing: bool) {
        self.set_always(ops::PROBE, failing);
    }

    pub fn set_connect_failure(&self, failing: bool) {
        self.set_always(ops::CONNECT, failing);
    }

    /// Remove every scripted failure
    pub fn heal(&self) {
        self.failures.lock().clear();
    }

    /// Number of times `op` reached the transport
    pub fn calls(&self, op: &str) -> u64 {
        self.calls.lock().get(op).copied().unwrap_or(0)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_always(&self, op: &str, failing: bool) {
        self.failures.lock().entry(op.to_string()).or_default().always = failing;
    }

    /// Count the call, apply latency and decide whether it fails
    async fn enter(&self, op: &str) -> TransportResult<()> {
        *self.calls.lock().entry(op.to_string()).or_insert(0) += 1;

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.scripted_failure(op) || self.random_failure(op) {
            return Err(Self::failure_for(op));
        }

        let needs_link = !matches!(op, ops::CONNECT | ops::DISCONNECT);
        if needs_link && !self.is_connected() {
            return Err(TransportError::Communication("not connected".to_string()));
        }
        Ok(())
    }

    fn scripted_failure(&self, op: &str) -> bool {
        let mut failures = self.failures.lock();
        match failures.get_mut(op) {
            Some(plan) if plan.always => true,
            Some(plan) if plan.remaining > 0 => {
                plan.remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn random_failure(&self, op: &str) -> bool {
        if self.fail_rate <= 0.0 || matches!(op, ops::CONNECT | ops::DISCONNECT | ops::PROBE) {
            return false;
        }
        let mut acc = self.fail_accumulator.lock();
        *acc += self.fail_rate;
        if *acc >= 1.0 {
            *acc -= 1.0;
            true
        } else {
            false
        }
    }

    fn failure_for(op: &str) -> TransportError {
        let message = format!("simulated {} failure", op);
        match op {
            ops::DIGITAL_WRITE | ops::PWM_WRITE => TransportError::Actuator(message),
            ops::DIGITAL_READ | ops::ANALOG_READ | ops::READ_SENSOR => {
                TransportError::Sensor(message)
            }
            _ => TransportError::Communication(message),
        }
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Simulated
    }

    async fn connect(&self) -> TransportResult<()> {
        self.enter(ops::CONNECT).await?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.enter(ops::DISCONNECT).await?;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn platform(&self) -> PlatformCapabilities {
        self.platform.clone()
    }

    async fn digital_read(&self, pin: u8) -> TransportResult<bool> {
        self.enter(ops::DIGITAL_READ).await?;
        Ok(self.device.lock().levels.get(&pin).copied().unwrap_or(false))
    }

    async fn digital_write(&self, pin: u8, high: bool) -> TransportResult<()> {
        self.enter(ops::DIGITAL_WRITE).await?;
        self.device.lock().levels.insert(pin, high);
        Ok(())
    }

    async fn analog_read(&self, pin: u8) -> TransportResult<f64> {
        self.enter(ops::ANALOG_READ).await?;
        Ok(self.device.lock().analog.get(&pin).copied().unwrap_or(0.0))
    }

    async fn pwm_write(&self, pin: u8, duty: f64) -> TransportResult<()> {
        self.enter(ops::PWM_WRITE).await?;
        self.device.lock().duty.insert(pin, duty);
        Ok(())
    }

    async fn bus_scan(&self) -> TransportResult<Vec<u16>> {
        self.enter(ops::BUS_SCAN).await?;
        let mut addresses = self.bus_devices.clone();
        addresses.sort_unstable();
        Ok(addresses)
    }

    async fn discover_sensors(&self) -> TransportResult<Vec<SensorInfo>> {
        self.enter(ops::DISCOVER_SENSORS).await?;
        Ok(self.sensors.lock().iter().map(|s| s.info.clone()).collect())
    }

    async fn read_sensor(&self, sensor: &SensorInfo) -> TransportResult<SensorReading> {
        self.enter(ops::READ_SENSOR).await?;
        let sensors = self.sensors.lock();
        let source = sensors
            .iter()
            .find(|s| s.info.name == sensor.name && s.info.measures(&sensor.sensor_type))
            .ok_or_else(|| TransportError::Sensor(format!("unknown sensor {}", sensor.id)))?;

        let mut reading = SensorReading::new(sensor.id.clone(), source.value).with_metadata(
            serde_json::json!({ "transport": "simulated", "protocol": sensor.protocol }),
        );
        if let Some(unit) = &source.unit {
            reading = reading.with_unit(unit.clone());
        }
        Ok(reading)
    }

    async fn probe(&self) -> TransportResult<()> {
        self.enter(ops::PROBE).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::Protocol;

    fn transport() -> SimulatedTransport {
        SimulatedTransport::new(PlatformCapabilities::raspberry_pi()).with_sensor(
            SensorInfo::new("", "temperature", "BME280", Protocol::I2c).with_address(0x76),
            21.5,
            Some("celsius"),
        )
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let transport = transport();
        assert!(transport.bus_scan().await.is_err());

        transport.connect().await.unwrap();
        assert_eq!(transport.bus_scan().await.unwrap(), vec![0x76]);
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed() {
        let transport = transport();
        transport.connect().await.unwrap();
        let sensor = transport.discover_sensors().await.unwrap().remove(0);

        transport.fail_next(ops::READ_SENSOR, 2);
        assert!(matches!(
            transport.read_sensor(&sensor).await,
            Err(TransportError::Sensor(_))
        ));
        assert!(transport.read_sensor(&sensor).await.is_err());

        let reading = transport.read_sensor(&sensor).await.unwrap();
        assert_eq!(reading.value, 21.5);
        assert_eq!(reading.unit.as_deref(), Some("celsius"));
        assert_eq!(transport.calls(ops::READ_SENSOR), 3);
    }

    #[tokio::test]
    async fn test_fail_rate_is_deterministic() {
        let transport = transport().with_fail_rate(0.25);
        transport.connect().await.unwrap();

        let mut failures = 0;
        for _ in 0..8 {
            if transport.digital_read(4).await.is_err() {
                failures += 1;
            }
        }
        assert_eq!(failures, 2);
    }

    #[tokio::test]
    async fn test_probe_failure_toggle() {
        let transport = transport();
        transport.connect().await.unwrap();
        transport.set_probe_failure(true);
        assert!(transport.probe().await.is_err());
        transport.set_probe_failure(false);
        assert!(transport.probe().await.is_ok());
    }
}
