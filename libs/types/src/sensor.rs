//! Discovered sensors and their readings
//!
//! A [`SensorInfo`] is created by discovery on the owning adapter and lives in
//! the manager's sensor table until that adapter is removed. Read outcomes
//! update `last_seen`, `health_score` and `error_count`; nothing here
//! interprets the measured quantity beyond passing the adapter's metadata on.

use crate::capability::Protocol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health penalty applied to a sensor per failed read
const SENSOR_ERROR_PENALTY: f64 = 0.1;

/// Logical description of a discovered sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorInfo {
    /// Stable identifier, unique across adapters
    pub id: String,
    /// Adapter that discovered and serves this sensor
    pub adapter_id: String,
    /// Physical quantity (e.g. "temperature", "humidity")
    pub sensor_type: String,
    /// Human readable name
    pub name: String,
    /// Pins the sensor occupies
    pub pins: Vec<u8>,
    /// Protocol used to talk to the sensor
    pub protocol: Protocol,
    /// Bus address for I2C/SPI/1-Wire parts
    pub address: Option<u16>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    /// Opaque calibration data supplied by the adapter
    pub calibration: Option<serde_json::Value>,
    /// Last successful contact
    pub last_seen: Option<DateTime<Utc>>,
    /// Sensor-level health in [0, 1]
    pub health_score: f64,
    /// Failed reads since the last successful one
    pub error_count: u32,
}

impl SensorInfo {
    /// Create a sensor owned by `adapter_id`
    pub fn new(
        adapter_id: impl Into<String>,
        sensor_type: impl Into<String>,
        name: impl Into<String>,
        protocol: Protocol,
    ) -> Self {
        let mut sensor = Self {
            id: String::new(),
            adapter_id: adapter_id.into(),
            sensor_type: sensor_type.into(),
            name: name.into(),
            pins: Vec::new(),
            protocol,
            address: None,
            manufacturer: None,
            model: None,
            serial_number: None,
            calibration: None,
            last_seen: None,
            health_score: 1.0,
            error_count: 0,
        };
        sensor.refresh_id();
        sensor
    }

    /// Set the pins the sensor occupies
    pub fn with_pins(mut self, pins: impl IntoIterator<Item = u8>) -> Self {
        self.pins = pins.into_iter().collect();
        self.refresh_id();
        self
    }

    /// Set the bus address
    pub fn with_address(mut self, address: u16) -> Self {
        self.address = Some(address);
        self.refresh_id();
        self
    }

    /// Set manufacturer and model
    pub fn with_model(mut self, manufacturer: impl Into<String>, model: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self.model = Some(model.into());
        self
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = Some(serial.into());
        self
    }

    pub fn with_calibration(mut self, calibration: serde_json::Value) -> Self {
        self.calibration = Some(calibration);
        self
    }

    /// Re-home the sensor onto another adapter, keeping the id scheme consistent
    pub fn assign_adapter(&mut self, adapter_id: &str) {
        if self.adapter_id != adapter_id {
            self.adapter_id = adapter_id.to_string();
            self.refresh_id();
        }
    }

    /// Derive `id` as `{adapter}/{type}@{address|pins}`
    fn refresh_id(&mut self) {
        let location = match (self.address, self.pins.is_empty()) {
            (Some(address), _) => format!("0x{:02x}", address),
            (None, false) => self
                .pins
                .iter()
                .map(u8::to_string)
                .collect::<Vec<_>>()
                .join("-"),
            (None, true) => "virtual".to_string(),
        };
        self.id = format!("{}/{}@{}", self.adapter_id, self.sensor_type, location);
    }

    /// Record a successful contact
    pub fn mark_seen(&mut self) {
        self.last_seen = Some(Utc::now());
    }

    /// Record a successful read: errors reset, health restored
    pub fn record_success(&mut self) {
        self.error_count = 0;
        self.health_score = 1.0;
        self.mark_seen();
    }

    /// Record a failed read
    pub fn record_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
        self.health_score = (self.health_score - SENSOR_ERROR_PENALTY).clamp(0.0, 1.0);
    }

    /// Sensor measures `quantity`
    pub fn measures(&self, quantity: &str) -> bool {
        self.sensor_type.eq_ignore_ascii_case(quantity)
    }
}

/// A single value read from a sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor_id: String,
    /// Raw value as reported by the adapter
    pub value: f64,
    /// Unit string supplied by the adapter, passed through untouched
    pub unit: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Adapter-supplied metadata
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl SensorReading {
    pub fn new(sensor_id: impl Into<String>, value: f64) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            value,
            unit: None,
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
