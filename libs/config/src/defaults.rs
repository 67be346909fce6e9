//! Orchestrator defaults
//!
//! Default values for every recognized configuration option. These are
//! tunable starting points, not derived limits.

/// Background loop defaults
pub mod loops {
    /// Period between adapter health recomputation (milliseconds)
    pub const HEALTH_CHECK_INTERVAL_MS: u64 = 30_000;

    /// Period between discovery sweeps (milliseconds)
    pub const DISCOVERY_INTERVAL_MS: u64 = 60_000;
}

/// Routing defaults
pub mod routing {
    /// Minimum adapter health to be eligible for routing
    pub const ADAPTER_HEALTH_FLOOR: f64 = 0.7;

    /// Minimum health for group lookup to return an adapter
    pub const GROUP_LOOKUP_FLOOR: f64 = 0.5;
}

/// Circuit breaker defaults
pub mod breaker {
    /// Error count that triggers blacklisting (exceeding it trips the breaker)
    pub const ERROR_BLACKLIST_THRESHOLD: u32 = 10;

    /// Blacklist duration before reset (milliseconds)
    pub const BLACKLIST_COOLDOWN_MS: u64 = 300_000;
}

/// Guarded operation defaults
pub mod operations {
    /// Per-operation timeout (milliseconds)
    pub const OPERATION_TIMEOUT_MS: u64 = 5_000;

    /// Attempts made by the retry policy
    pub const RETRY_MAX_ATTEMPTS: u32 = 3;

    /// Multiplier applied to the retry delay after each attempt
    pub const RETRY_BACKOFF: f64 = 2.0;

    /// Delay before the second attempt (milliseconds)
    pub const RETRY_INITIAL_DELAY_MS: u64 = 100;

    /// Samples kept in each adapter's rolling metrics window
    pub const METRICS_WINDOW: usize = 100;
}

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "HWMESH";
