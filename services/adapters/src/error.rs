//! Error types for hardware adapter operations
//!
//! Every error carries a [`Severity`] and an [`ErrorKind`]; recovery policy is
//! decided from those tags rather than from the concrete variant.

use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use types::PinMode;

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Operational impact of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Recoverable, no impact
    Info,
    /// Recoverable, degraded operation
    Warning,
    /// Recoverable, feature temporarily disabled
    Error,
    /// Not recoverable; requires operator or manager intervention
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

/// Classification used to look up recovery strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Sensor,
    Actuator,
    Communication,
    HardwareNotAvailable,
    Timeout,
    InvalidPinAccess,
    NotInitialized,
    Initialization,
    Unsupported,
    NoHealthySensor,
    Configuration,
    Serialization,
    Other,
}

/// Main error type for adapter operations
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Sensor read produced no usable value
    #[error("Sensor error on {hardware_id}: {message}")]
    Sensor {
        hardware_id: String,
        message: String,
    },

    /// Output could not be driven
    #[error("Actuator error on {hardware_id}: {message}")]
    Actuator {
        hardware_id: String,
        message: String,
    },

    /// Transport link failed (bus, serial line, network)
    #[error("Communication error on {hardware_id}: {message}")]
    Communication {
        hardware_id: String,
        message: String,
    },

    /// Hardware is blacklisted; the operation was not attempted
    #[error("Hardware {hardware_id} not available, retry after {}ms", retry_after.as_millis())]
    HardwareNotAvailable {
        hardware_id: String,
        retry_after: Duration,
    },

    /// Operation exceeded its deadline and was abandoned
    #[error("Operation {operation} on {hardware_id} timed out after {timeout_ms}ms")]
    Timeout {
        hardware_id: String,
        operation: String,
        timeout_ms: u64,
    },

    /// Pin validation rejected the request before any transport call
    #[error("Invalid pin access on {hardware_id}: pin {pin} as {mode}: {reason}")]
    InvalidPinAccess {
        hardware_id: String,
        pin: u8,
        mode: PinMode,
        reason: String,
    },

    /// Operation issued before `initialize` or after `cleanup`
    #[error("Adapter {hardware_id} is not initialized")]
    NotInitialized { hardware_id: String },

    #[error("Initialization of {hardware_id} failed: {reason}")]
    InitializationFailed { hardware_id: String, reason: String },

    /// Transport does not implement the requested operation
    #[error("Operation {operation} not supported by {hardware_id}")]
    Unsupported {
        hardware_id: String,
        operation: String,
    },

    /// Arbitration found no live sensor for the quantity
    #[error("No healthy sensor available for {quantity}")]
    NoHealthySensor { quantity: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Substitute value did not match the operation's result type
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error raised by an external collaborator
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AdapterError {
    /// Map a transport failure onto the taxonomy for `hardware_id`
    pub fn from_transport(hardware_id: &str, operation: &str, err: TransportError) -> Self {
        let hardware_id = hardware_id.to_string();
        match err {
            TransportError::Sensor(message) => AdapterError::Sensor {
                hardware_id,
                message,
            },
            TransportError::Actuator(message) => AdapterError::Actuator {
                hardware_id,
                message,
            },
            TransportError::Communication(message) => AdapterError::Communication {
                hardware_id,
                message,
            },
            TransportError::Unsupported => AdapterError::Unsupported {
                hardware_id,
                operation: operation.to_string(),
            },
            TransportError::Other(source) => {
                AdapterError::Other(source.context(format!("{} on {}", operation, hardware_id)))
            }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AdapterError::Sensor { .. } => ErrorKind::Sensor,
            AdapterError::Actuator { .. } => ErrorKind::Actuator,
            AdapterError::Communication { .. } => ErrorKind::Communication,
            AdapterError::HardwareNotAvailable { .. } => ErrorKind::HardwareNotAvailable,
            AdapterError::Timeout { .. } => ErrorKind::Timeout,
            AdapterError::InvalidPinAccess { .. } => ErrorKind::InvalidPinAccess,
            AdapterError::NotInitialized { .. } => ErrorKind::NotInitialized,
            AdapterError::InitializationFailed { .. } => ErrorKind::Initialization,
            AdapterError::Unsupported { .. } => ErrorKind::Unsupported,
            AdapterError::NoHealthySensor { .. } => ErrorKind::NoHealthySensor,
            AdapterError::Configuration(_) => ErrorKind::Configuration,
            AdapterError::Serialization(_) => ErrorKind::Serialization,
            AdapterError::Other(_) => ErrorKind::Other,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            AdapterError::Sensor { .. }
            | AdapterError::Communication { .. }
            | AdapterError::Timeout { .. } => Severity::Warning,
            AdapterError::Actuator { .. }
            | AdapterError::NotInitialized { .. }
            | AdapterError::NoHealthySensor { .. }
            | AdapterError::Serialization(_)
            | AdapterError::Other(_) => Severity::Error,
            AdapterError::HardwareNotAvailable { .. }
            | AdapterError::InvalidPinAccess { .. }
            | AdapterError::InitializationFailed { .. }
            | AdapterError::Unsupported { .. }
            | AdapterError::Configuration(_) => Severity::Critical,
        }
    }

    /// Whether retrying or local recovery can help
    pub fn is_recoverable(&self) -> bool {
        self.severity() != Severity::Critical
    }

    /// Suggested back-off before the caller tries again
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AdapterError::HardwareNotAvailable { retry_after, .. } => Some(*retry_after),
            AdapterError::Timeout { timeout_ms, .. } => Some(Duration::from_millis(*timeout_ms)),
            _ => None,
        }
    }

    /// Hardware the error is attributed to, when known
    pub fn hardware_id(&self) -> Option<&str> {
        match self {
            AdapterError::Sensor { hardware_id, .. }
            | AdapterError::Actuator { hardware_id, .. }
            | AdapterError::Communication { hardware_id, .. }
            | AdapterError::HardwareNotAvailable { hardware_id, .. }
            | AdapterError::Timeout { hardware_id, .. }
            | AdapterError::InvalidPinAccess { hardware_id, .. }
            | AdapterError::NotInitialized { hardware_id }
            | AdapterError::InitializationFailed { hardware_id, .. }
            | AdapterError::Unsupported { hardware_id, .. } => Some(hardware_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blacklisted_error_is_critical_with_hint() {
        let err = AdapterError::HardwareNotAvailable {
            hardware_id: "rpi-main".to_string(),
            retry_after: Duration::from_secs(300),
        };
        assert_eq!(err.severity(), Severity::Critical);
        assert!(!err.is_recoverable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(300)));
        assert_eq!(err.hardware_id(), Some("rpi-main"));
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = AdapterError::Timeout {
            hardware_id: "esp32".to_string(),
            operation: "analog_read".to_string(),
            timeout_ms: 5000,
        };
        assert!(err.is_recoverable());
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_transport_mapping_keeps_kind() {
        let err = AdapterError::from_transport(
            "esp32",
            "digital_write",
            TransportError::Actuator("relay stuck".to_string()),
        );
        assert_eq!(err.kind(), ErrorKind::Actuator);
        assert_eq!(err.severity(), Severity::Error);
        assert!(err.to_string().contains("relay stuck"));

        let err = AdapterError::from_transport("esp32", "bus_scan", TransportError::Unsupported);
        assert!(!err.is_recoverable());
    }
}
