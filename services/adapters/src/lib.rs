//! # Hardware Adapters - Per-Device Execution and Fault Containment
//!
//! ## Purpose
//!
//! Wraps each device platform (bus-attached board, microcontroller on a
//! serial line, network-attached node) in a [`HardwareAdapter`] that owns the
//! device's lifecycle, pin state, metrics and health score. A shared
//! [`ErrorHandler`] contains failures: it counts errors per hardware id,
//! blacklists ids that keep failing, and runs the recovery pipeline
//! (strategy, fallback chain, propagate) before anything reaches the caller.
//!
//! ## Integration Points
//!
//! - **Transport boundary**: adapters depend only on the [`Transport`] trait;
//!   real, proxy and [`SimulatedTransport`] implementations are injected
//! - **Manager**: the hardware manager registers adapters, subscribes error
//!   callbacks and drives health checks
//! - **Configuration**: timeouts, retry policy, blacklist threshold and
//!   cooldown come from `hwmesh_config::OrchestratorConfig`
//!
//! ## Guarantees
//!
//! - **Single choke point**: every read, write and scan passes through
//!   [`HardwareAdapter::guarded`], so metrics are never bypassed
//! - **Per-adapter ordering**: operations on one adapter are serialised by a
//!   FIFO bus lock; different adapters run fully concurrently
//! - **Bounded health**: scores are `clamp(1 - 2 * error_rate, 0, 1)` over a
//!   rolling window
//! - **Fail fast**: a blacklisted id never reaches its transport
//!
//! ## Example
//!
//! ```rust
//! use adapter_service::{HardwareAdapter, SimulatedTransport};
//! use std::sync::Arc;
//! use types::{PinMode, PlatformCapabilities};
//!
//! # tokio_test::block_on(async {
//! let transport = Arc::new(SimulatedTransport::new(PlatformCapabilities::esp32()));
//! let adapter = HardwareAdapter::new("esp32-greenhouse", transport);
//! adapter.initialize().await.unwrap();
//!
//! adapter.setup_pin(4, PinMode::Input).unwrap();
//! assert!(!adapter.validate_pin_access(4, PinMode::Pwm));
//! let _level = adapter.digital_read(4).await.unwrap();
//! # });
//! ```
//!
//! See [`architecture_diagram()`] for how failures flow through the layer.

pub mod adapter;
pub mod error;
pub mod error_handler;
pub mod metrics;
pub mod resilience;
pub mod simulated;
pub mod transport;

pub use adapter::{AdapterHealth, AdapterSettings, ErrorCallback, HardwareAdapter, OperationFailure};
pub use error::{AdapterError, ErrorKind, Result, Severity};
pub use error_handler::{
    BlacklistEntry, ErrorContext, ErrorHandler, ErrorHandlerConfig, ErrorHandlerMetrics,
    FallbackProvider, RecoveryStrategy, Resolution, StaticFallback,
};
pub use metrics::{MetricSample, MetricsSummary, MetricsWindow};
pub use resilience::{retry, with_fallback, with_fallback_fn, with_timeout, Resilience, RetryPolicy};
pub use simulated::SimulatedTransport;
pub use transport::{Transport, TransportError, TransportKind, TransportResult};

/// Architecture diagram showing how a failing operation is contained
#[cfg_attr(doc, aquamarine::aquamarine)]
/// ```mermaid
/// graph LR
///     subgraph Adapter["HardwareAdapter"]
///         direction TB
///         BL[Blacklist check]
///         LK[Bus lock + timeout]
///         MT[Metric sample]
///         CBK[Error callbacks]
///     end
///
///     subgraph Handler["ErrorHandler"]
///         direction TB
///         CNT[Count per hardware id]
///         TRP[Trip: blacklist for cooldown]
///         STR[Recovery strategy]
///         FB[Fallback chain]
///     end
///
///     subgraph Transport["Transport"]
///         direction TB
///         LB[Local bus]
///         SR[Serial]
///         NW[Network]
///         SIM[Simulated]
///     end
///
///     BL --> LK
///     LK --> Transport
///     LK --> MT
///     MT --> CBK
///     CBK --> CNT
///     CNT -->|over threshold| TRP
///     CNT -->|recoverable| STR
///     STR -->|failed| FB
///     STR -->|repaired| LK
///     FB -->|substitute| Result
///     TRP -->|HardwareNotAvailable| Result
/// ```
pub fn architecture_diagram() {
    // This function exists solely to hold the architecture diagram documentation
}
