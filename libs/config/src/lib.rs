//! # Hardware Orchestrator Configuration
//!
//! Defaults and loading for the orchestrator's configuration surface.
//!
//! ## Features
//!
//! - **Defaults**: Every recognized option has a named default in [`defaults`]
//! - **Layered Loading**: Optional TOML file, then `HWMESH_` environment overrides
//! - **Validation**: Out-of-range values are rejected at load time
//!
//! ## Usage
//!
//! ```rust
//! use hwmesh_config::{defaults, OrchestratorConfig};
//!
//! let config = OrchestratorConfig::from_toml_str("operation_timeout_ms = 250").unwrap();
//! assert_eq!(config.operation_timeout_ms, 250);
//! assert_eq!(config.error_blacklist_threshold, defaults::breaker::ERROR_BLACKLIST_THRESHOLD);
//! ```

pub mod defaults;
pub mod error;
pub mod orchestrator;

pub use error::{ConfigError, Result};
pub use orchestrator::{AdapterDeclaration, OrchestratorConfig, SensorDeclaration};
