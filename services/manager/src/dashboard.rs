//! Read-only snapshot for observability collaborators

use crate::events::EventBusStats;
use crate::manager::HardwareManager;
use adapter_service::{AdapterHealth, BlacklistEntry, ErrorHandlerMetrics};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub adapter_count: usize,
    pub primary: Option<String>,
    /// Per-adapter health and metrics summary, ordered by name
    pub adapters: Vec<AdapterHealth>,
    pub groups: BTreeMap<String, Vec<String>>,
    pub blacklist: Vec<BlacklistEntry>,
    pub sensor_count: usize,
    pub error_handler: ErrorHandlerMetrics,
    pub events: EventBusStats,
}

impl HardwareManager {
    /// Snapshot of registry, health and breaker state
    ///
    /// Uses the scores from the most recent health checks; nothing is probed.
    pub fn dashboard(&self) -> DashboardSnapshot {
        let adapters: Vec<AdapterHealth> = self
            .adapters_snapshot()
            .iter()
            .map(|adapter| adapter.health_snapshot())
            .collect();

        DashboardSnapshot {
            generated_at: Utc::now(),
            adapter_count: adapters.len(),
            primary: self.primary_name(),
            adapters,
            groups: self.groups(),
            blacklist: self.error_handler().blacklist_snapshot(),
            sensor_count: self.sensors().len(),
            error_handler: self.error_handler().metrics(),
            events: self.events().stats(),
        }
    }
}
