//! # Transport Boundary
//!
//! The fixed operation set every device transport must satisfy. Adapters
//! depend only on this trait; local bus, serial and network implementations
//! are injected at construction time and never branched on by the
//! orchestration code.
//!
//! Transports are driven through `&self` and are serialised by the owning
//! adapter's bus lock, so an implementation only needs interior mutability
//! for its own bookkeeping.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use types::{PlatformCapabilities, SensorInfo, SensorReading};

/// Result type for transport calls
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Failure reported by a transport, before it is attributed to an adapter
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("sensor fault: {0}")]
    Sensor(String),

    #[error("actuator fault: {0}")]
    Actuator(String),

    #[error("communication fault: {0}")]
    Communication(String),

    #[error("operation not supported")]
    Unsupported,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Physical attachment of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// GPIO/I2C/SPI on the host board
    LocalBus,
    /// Microcontroller behind a serial line
    Serial,
    /// HTTP/WebSocket attached device
    Network,
    /// In-process simulation
    Simulated,
}

/// Operation set consumed by [`HardwareAdapter`](crate::HardwareAdapter)
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Open the underlying link
    async fn connect(&self) -> TransportResult<()>;

    /// Close the underlying link and release OS resources
    async fn disconnect(&self) -> TransportResult<()>;

    /// Capability snapshot of the attached platform, valid after `connect`
    fn platform(&self) -> PlatformCapabilities;

    async fn digital_read(&self, pin: u8) -> TransportResult<bool>;

    async fn digital_write(&self, pin: u8, high: bool) -> TransportResult<()>;

    /// Raw ADC value scaled to the platform's reference voltage
    async fn analog_read(&self, pin: u8) -> TransportResult<f64>;

    /// Drive `pin` with a duty cycle in [0, 1]
    async fn pwm_write(&self, pin: u8, duty: f64) -> TransportResult<()>;

    /// Addresses responding on the platform's shared bus
    async fn bus_scan(&self) -> TransportResult<Vec<u16>>;

    async fn discover_sensors(&self) -> TransportResult<Vec<SensorInfo>>;

    /// Take one reading from a previously discovered sensor
    async fn read_sensor(&self, sensor: &SensorInfo) -> TransportResult<SensorReading>;

    /// Liveness heartbeat used by health checks
    async fn probe(&self) -> TransportResult<()> {
        Ok(())
    }
}
