//! Error types for capability and pin validation

use crate::capability::PinMode;
use thiserror::Error;

/// Errors raised while validating or mutating platform capabilities
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CapabilityError {
    /// Pin number is not exposed by the platform
    #[error("Pin {pin} does not exist on this platform")]
    UnknownPin { pin: u8 },

    /// Pin is reserved by the platform and cannot change mode
    #[error("Pin {pin} is reserved")]
    PinReserved { pin: u8 },

    /// Pin hardware does not support the requested mode
    #[error("Pin {pin} does not support mode {mode}")]
    ModeNotSupported { pin: u8, mode: PinMode },

    /// Pin is already active in another mode
    #[error("Pin {pin} is in use as {current}, cannot switch to {requested}")]
    PinConflict {
        pin: u8,
        current: PinMode,
        requested: PinMode,
    },

    /// No built-in profile with this name
    #[error("Unknown platform profile: {0}")]
    UnknownProfile(String),
}
