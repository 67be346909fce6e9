//! # Hardware Types Library
//!
//! Shared data model for the hardware orchestration layer.
//!
//! ## Design Philosophy
//!
//! - **Read Model**: Capability snapshots describe what a platform can do; adapters own the live copy
//! - **Pass-Through Semantics**: Sensor values and units are carried as supplied by the adapter
//! - **Explicit Tiers**: Health scores map onto a fixed set of tiers used for routing decisions
//!
//! ## Quick Start
//!
//! ```rust
//! use types::{HealthState, PinMode, PlatformCapabilities, Protocol, SensorInfo};
//!
//! let mut caps = PlatformCapabilities::esp32();
//! caps.claim_pin(4, PinMode::Input).unwrap();
//! assert!(!caps.validate_pin_access(4, PinMode::Pwm));
//!
//! let sensor = SensorInfo::new("esp32-greenhouse", "temperature", "DS18B20", Protocol::OneWire)
//!     .with_pins([4]);
//! assert_eq!(sensor.id, "esp32-greenhouse/temperature@4");
//!
//! assert_eq!(HealthState::from_score(0.95), HealthState::Excellent);
//! ```

pub mod capability;
pub mod errors;
pub mod health;
pub mod sensor;

pub use capability::{PinCapability, PinMode, PlatformCapabilities, PlatformFeatures, Protocol};
pub use errors::CapabilityError;
pub use health::{AdapterState, HealthState};
pub use sensor::{SensorInfo, SensorReading};
