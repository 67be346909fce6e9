//! Error types for the hardware manager

use adapter_service::AdapterError;
use thiserror::Error;

/// Result type alias for manager operations
pub type Result<T> = std::result::Result<T, ManagerError>;

/// Registry and lifecycle errors
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Adapter {0} is already registered")]
    DuplicateAdapter(String),

    #[error("Adapter {0} not found")]
    AdapterNotFound(String),

    /// Adapter was not registered because `initialize` failed
    #[error("Adapter {name} failed to initialize: {source}")]
    InitializationFailed {
        name: String,
        #[source]
        source: AdapterError,
    },

    #[error("Background loops already started")]
    AlreadyStarted,

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Config(#[from] hwmesh_config::ConfigError),
}
