//! # Hardware Manager - Registry, Supervision and Routing
//!
//! ## Purpose
//!
//! Supervises every [`adapter_service::HardwareAdapter`] in the process:
//! keeps the registry and redundancy groups, runs the periodic health and
//! discovery loops, reacts to adapter failures with a reinitialisation cycle,
//! routes reads of a physical quantity to the healthiest redundant sensor, and
//! publishes lifecycle events on a topic bus.
//!
//! ## Integration Points
//!
//! - **Adapters**: registered through [`HardwareManager::add_adapter`]; all of
//!   them share one circuit breaker
//! - **Subscribers**: [`HardwareManager::on_event`] with one of the
//!   [`Topic`]s; handler failures never affect delivery to other handlers
//! - **Probes**: [`DeviceProbe`] implementations report newly reachable
//!   hardware to the discovery loop
//! - **Observability**: [`HardwareManager::dashboard`] returns a serialisable
//!   snapshot
//!
//! ## Example
//!
//! ```rust
//! use adapter_service::SimulatedTransport;
//! use hardware_manager::HardwareManager;
//! use hwmesh_config::OrchestratorConfig;
//! use std::sync::Arc;
//! use types::{PlatformCapabilities, Protocol, SensorInfo};
//!
//! # tokio_test::block_on(async {
//! let manager = HardwareManager::new(OrchestratorConfig::default());
//! let transport = Arc::new(
//!     SimulatedTransport::new(PlatformCapabilities::raspberry_pi()).with_sensor(
//!         SensorInfo::new("", "temperature", "BME280", Protocol::I2c).with_address(0x76),
//!         21.5,
//!         Some("celsius"),
//!     ),
//! );
//! manager.add_transport("rpi-main", transport, Some("local")).await.unwrap();
//! manager.discover_all_sensors().await;
//!
//! let best = manager.read_quantity("temperature").await.unwrap();
//! assert_eq!(best.meta.adapter_id, "rpi-main");
//! assert_eq!(best.reading.value, 21.5);
//! # });
//! ```

pub mod arbitration;
pub mod dashboard;
pub mod error;
pub mod events;
pub mod manager;
pub mod probe;

pub use arbitration::{rank_candidates, ArbitratedReading, RankedCandidate, ReadMeta};
pub use dashboard::DashboardSnapshot;
pub use error::{ManagerError, Result};
pub use events::{EventBus, EventBusStats, EventHandler, HardwareEvent, Topic};
pub use manager::{DiscoveryReport, HardwareManager};
pub use probe::{DeviceDescriptor, DeviceProbe, StaticProbe};
