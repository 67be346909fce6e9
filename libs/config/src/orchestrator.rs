//! Orchestrator Configuration Module
//!
//! Loads the hardware orchestrator's configuration from an optional TOML file
//! with `HWMESH_`-prefixed environment variable overrides layered on top.
//! Every option has a default, so an empty source yields a working config.
//!
//! ```toml
//! health_check_interval_ms = 30000
//! adapter_health_floor = 0.7
//!
//! [[adapters]]
//! name = "rpi-main"
//! group = "local"
//! platform = "raspberry_pi"
//!
//! [[adapters.sensors]]
//! sensor_type = "temperature"
//! name = "BME280"
//! protocol = "i2c"
//! address = 0x76
//! value = 21.5
//! unit = "celsius"
//! ```

use crate::defaults::{breaker, loops, operations, routing, ENV_PREFIX};
use crate::error::{ConfigError, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use types::{PlatformCapabilities, Protocol};

/// Configuration surface of the hardware orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Period between adapter health recomputation
    pub health_check_interval_ms: u64,
    /// Period between sensor/device discovery sweeps
    pub discovery_interval_ms: u64,
    /// Minimum adapter health to be eligible for routing
    pub adapter_health_floor: f64,
    /// Error count that triggers blacklisting
    pub error_blacklist_threshold: u32,
    /// Blacklist duration before reset
    pub blacklist_cooldown_ms: u64,
    /// Per-operation timeout
    pub operation_timeout_ms: u64,
    /// Attempts made by the retry policy
    pub retry_max_attempts: u32,
    /// Backoff multiplier between retry attempts
    pub retry_backoff: f64,
    /// Delay before the first retry
    pub retry_initial_delay_ms: u64,
    /// Samples kept in each adapter's rolling metrics window
    pub metrics_window: usize,
    /// Default log level for the service binary
    pub log_level: String,
    /// Adapters the service binary registers at startup
    pub adapters: Vec<AdapterDeclaration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: loops::HEALTH_CHECK_INTERVAL_MS,
            discovery_interval_ms: loops::DISCOVERY_INTERVAL_MS,
            adapter_health_floor: routing::ADAPTER_HEALTH_FLOOR,
            error_blacklist_threshold: breaker::ERROR_BLACKLIST_THRESHOLD,
            blacklist_cooldown_ms: breaker::BLACKLIST_COOLDOWN_MS,
            operation_timeout_ms: operations::OPERATION_TIMEOUT_MS,
            retry_max_attempts: operations::RETRY_MAX_ATTEMPTS,
            retry_backoff: operations::RETRY_BACKOFF,
            retry_initial_delay_ms: operations::RETRY_INITIAL_DELAY_MS,
            metrics_window: operations::METRICS_WINDOW,
            log_level: "info".to_string(),
            adapters: Vec::new(),
        }
    }
}

/// An adapter declared in configuration
///
/// Declared adapters are backed by the simulated transport; real transports
/// are constructed in code and registered directly with the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterDeclaration {
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
    /// Built-in platform profile name
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Device address label; `$VAR` references are expanded
    #[serde(default)]
    pub address: Option<String>,
    /// Fraction of simulated operations that fail
    #[serde(default)]
    pub fail_rate: f64,
    /// Artificial latency per simulated operation
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub sensors: Vec<SensorDeclaration>,
}

/// A sensor attached to a declared adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDeclaration {
    pub sensor_type: String,
    pub name: String,
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
    #[serde(default)]
    pub pins: Vec<u8>,
    #[serde(default)]
    pub address: Option<u16>,
    /// Value the simulated sensor reports
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub unit: Option<String>,
}

fn default_platform() -> String {
    "generic".to_string()
}

fn default_protocol() -> Protocol {
    Protocol::Gpio
}

impl OrchestratorConfig {
    /// Load from an optional TOML file with environment overrides
    ///
    /// Environment variables use the `HWMESH_` prefix, e.g.
    /// `HWMESH_OPERATION_TIMEOUT_MS=2000`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading orchestrator config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: Self = builder.build()?.try_deserialize()?;
        config.expand_env_vars()?;
        config.validate()?;

        debug!(
            "Orchestrator config loaded with {} declared adapters",
            config.adapters.len()
        );
        Ok(config)
    }

    /// Log level for the service, with `cli` taking precedence over the file
    pub fn effective_log_level<'a>(&'a self, cli: Option<&'a str>) -> &'a str {
        cli.unwrap_or(&self.log_level)
    }

    /// Parse and validate an inline TOML document
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.expand_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.health_check_interval_ms == 0 {
            return invalid("health_check_interval_ms must be greater than 0".to_string());
        }
        if self.discovery_interval_ms == 0 {
            return invalid("discovery_interval_ms must be greater than 0".to_string());
        }
        if self.operation_timeout_ms == 0 {
            return invalid("operation_timeout_ms must be greater than 0".to_string());
        }
        if self.log_level.trim().is_empty() {
            return invalid("log_level must not be empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.adapter_health_floor) {
            return invalid(format!(
                "adapter_health_floor must be within [0, 1], got {}",
                self.adapter_health_floor
            ));
        }
        if self.error_blacklist_threshold == 0 {
            return invalid("error_blacklist_threshold must be greater than 0".to_string());
        }
        if self.retry_max_attempts == 0 {
            return invalid("retry_max_attempts must be at least 1".to_string());
        }
        if self.retry_backoff < 1.0 {
            return invalid(format!(
                "retry_backoff must be at least 1.0, got {}",
                self.retry_backoff
            ));
        }
        if self.metrics_window == 0 {
            return invalid("metrics_window must be greater than 0".to_string());
        }

        let mut names = HashSet::new();
        for adapter in &self.adapters {
            if adapter.name.trim().is_empty() {
                return invalid("adapter name cannot be empty".to_string());
            }
            if !names.insert(adapter.name.as_str()) {
                return invalid(format!("duplicate adapter name '{}'", adapter.name));
            }
            if !(0.0..=1.0).contains(&adapter.fail_rate) {
                return invalid(format!(
                    "adapter '{}': fail_rate must be within [0, 1]",
                    adapter.name
                ));
            }
            PlatformCapabilities::profile(&adapter.platform).map_err(|e| {
                ConfigError::Invalid(format!("adapter '{}': {}", adapter.name, e))
            })?;
        }

        Ok(())
    }

    /// Expand `$VAR` / `${VAR}` references in adapter addresses
    pub fn expand_env_vars(&mut self) -> Result<()> {
        for adapter in &mut self.adapters {
            if let Some(address) = &adapter.address {
                let expanded = shellexpand::env(address).map_err(|e| ConfigError::Expand {
                    field: format!("adapters.{}.address", adapter.name),
                    reason: e.to_string(),
                })?;
                adapter.address = Some(expanded.into_owned());
            }
        }
        Ok(())
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    pub fn blacklist_cooldown(&self) -> Duration {
        Duration::from_millis(self.blacklist_cooldown_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.retry_initial_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.health_check_interval(), Duration::from_secs(30));
        assert_eq!(config.discovery_interval(), Duration::from_secs(60));
        assert_eq!(config.adapter_health_floor, 0.7);
        assert_eq!(config.error_blacklist_threshold, 10);
        assert_eq!(config.blacklist_cooldown(), Duration::from_secs(300));
        assert_eq!(config.operation_timeout(), Duration::from_secs(5));
        assert_eq!(config.retry_max_attempts, 3);
        assert_eq!(config.retry_backoff, 2.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("orchestrator.toml");

        let config_content = r#"
health_check_interval_ms = 1000
adapter_health_floor = 0.8

[[adapters]]
name = "rpi-main"
group = "local"
platform = "raspberry_pi"

[[adapters.sensors]]
sensor_type = "temperature"
name = "BME280"
protocol = "i2c"
address = 118
value = 21.5
unit = "celsius"

[[adapters]]
name = "esp32-greenhouse"
group = "greenhouse"
platform = "esp32"
fail_rate = 0.25
"#;

        fs::write(&config_path, config_content).unwrap();

        let config = OrchestratorConfig::load(Some(&config_path)).unwrap();
        assert_eq!(config.health_check_interval(), Duration::from_secs(1));
        assert_eq!(config.adapter_health_floor, 0.8);
        // Unset options keep their defaults
        assert_eq!(config.error_blacklist_threshold, 10);

        assert_eq!(config.adapters.len(), 2);
        let rpi = &config.adapters[0];
        assert_eq!(rpi.group.as_deref(), Some("local"));
        assert_eq!(rpi.sensors[0].protocol, Protocol::I2c);
        assert_eq!(rpi.sensors[0].address, Some(0x76));
        assert_eq!(config.adapters[1].fail_rate, 0.25);
    }

    #[test]
    fn test_log_level_falls_back_to_file() {
        let config = OrchestratorConfig::from_toml_str(r#"log_level = "debug""#).unwrap();
        assert_eq!(config.effective_log_level(None), "debug");
        assert_eq!(config.effective_log_level(Some("warn")), "warn");
        assert_eq!(OrchestratorConfig::default().effective_log_level(None), "info");

        assert!(OrchestratorConfig::from_toml_str(r#"log_level = " ""#).is_err());
    }

    #[test]
    fn test_environment_override() {
        std::env::set_var("HWMESH_RETRY_MAX_ATTEMPTS", "7");
        let config = OrchestratorConfig::load(None).unwrap();
        std::env::remove_var("HWMESH_RETRY_MAX_ATTEMPTS");

        assert_eq!(config.retry_max_attempts, 7);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = OrchestratorConfig::default();
        config.adapter_health_floor = 1.5;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.retry_backoff = 0.5;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.operation_timeout_ms = 0;
        assert!(config.validate().is_err());

        let err = OrchestratorConfig::from_toml_str(
            r#"
[[adapters]]
name = "a"
platform = "vax"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("vax"));
    }

    #[test]
    fn test_duplicate_adapter_names_rejected() {
        let result = OrchestratorConfig::from_toml_str(
            r#"
[[adapters]]
name = "rpi-main"

[[adapters]]
name = "rpi-main"
"#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("duplicate")));
    }

    #[test]
    fn test_address_expansion() {
        std::env::set_var("GREENHOUSE_TEST_HOST", "10.0.0.42");
        let config = OrchestratorConfig::from_toml_str(
            r#"
[[adapters]]
name = "esp32-greenhouse"
platform = "esp32"
address = "${GREENHOUSE_TEST_HOST}:8080"
"#,
        )
        .unwrap();
        std::env::remove_var("GREENHOUSE_TEST_HOST");

        assert_eq!(config.adapters[0].address.as_deref(), Some("10.0.0.42:8080"));
    }

    #[test]
    fn test_shipped_greenhouse_config_is_valid() {
        let config =
            OrchestratorConfig::from_toml_str(include_str!("../../../config/greenhouse.toml")).unwrap();

        assert_eq!(config.adapters.len(), 2);
        let rpi = &config.adapters[0];
        assert_eq!(rpi.sensors.len(), 2);
        assert_eq!(rpi.sensors[0].address, Some(0x76));

        let esp = &config.adapters[1];
        assert_eq!(esp.group.as_deref(), Some("greenhouse"));
        assert_eq!(esp.sensors[0].protocol, Protocol::OneWire);
        assert!(esp.address.is_some());
    }
}
