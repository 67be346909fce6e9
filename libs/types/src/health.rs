//! Adapter lifecycle and health tiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Score above which an adapter is Excellent
pub const EXCELLENT_THRESHOLD: f64 = 0.9;
/// Score above which an adapter is Good
pub const GOOD_THRESHOLD: f64 = 0.7;
/// Score at or below which an adapter is Failed
pub const FAILED_THRESHOLD: f64 = 0.2;

/// Health tier derived from an adapter's health score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Excellent,
    Good,
    Degraded,
    Failed,
    /// The health check itself could not complete
    Unknown,
}

impl HealthState {
    /// Map a score in [0, 1] onto a tier
    pub fn from_score(score: f64) -> Self {
        if score > EXCELLENT_THRESHOLD {
            HealthState::Excellent
        } else if score > GOOD_THRESHOLD {
            HealthState::Good
        } else if score > FAILED_THRESHOLD {
            HealthState::Degraded
        } else {
            HealthState::Failed
        }
    }

    /// Excellent or Good
    pub fn is_top_tier(&self) -> bool {
        matches!(self, HealthState::Excellent | HealthState::Good)
    }

    /// Failed or Unknown; the manager attempts a reinitialisation
    pub fn needs_recovery(&self) -> bool {
        matches!(self, HealthState::Failed | HealthState::Unknown)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthState::Excellent => "excellent",
            HealthState::Good => "good",
            HealthState::Degraded => "degraded",
            HealthState::Failed => "failed",
            HealthState::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Adapter lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    Uninitialized,
    Initializing,
    Ready,
    Degraded,
    Failed,
}

impl AdapterState {
    /// Lifecycle state implied by a health check result
    ///
    /// Unknown is treated as Degraded for routing purposes.
    pub fn from_health(health: HealthState) -> Self {
        match health {
            HealthState::Excellent | HealthState::Good => AdapterState::Ready,
            HealthState::Degraded | HealthState::Unknown => AdapterState::Degraded,
            HealthState::Failed => AdapterState::Failed,
        }
    }

    /// Adapter is up and serving operations
    ///
    /// Failed is excluded: it covers both a failed (re)initialisation and a
    /// health check scoring in the bottom tier.
    pub fn is_initialized(&self) -> bool {
        matches!(self, AdapterState::Ready | AdapterState::Degraded)
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
