//! Redundant sensor arbitration
//!
//! Several adapters may serve the same physical quantity. [`read_best`]
//! filters candidates down to routable adapters, ranks them and reads them in
//! order until one succeeds. An empty or exhausted candidate list is reported
//! as `NoHealthySensor`; callers never get a reading from hardware below the
//! routing floor.
//!
//! [`read_best`]: HardwareManager::read_best

use crate::manager::HardwareManager;
use adapter_service::{AdapterError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Instant;
use tracing::{debug, warn};
use types::{SensorInfo, SensorReading};

/// Where an arbitrated reading came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadMeta {
    pub sensor_id: String,
    pub adapter_id: String,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitratedReading {
    pub reading: SensorReading,
    pub meta: ReadMeta,
}

/// A candidate together with its adapter's health score
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub sensor: SensorInfo,
    pub adapter_health: f64,
}

/// Order candidates by adapter health (highest first), then sensor error count
///
/// The sort is stable, so equal candidates keep their input order.
pub fn rank_candidates(mut candidates: Vec<RankedCandidate>) -> Vec<RankedCandidate> {
    candidates.sort_by(|a, b| {
        b.adapter_health
            .partial_cmp(&a.adapter_health)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.sensor.error_count.cmp(&b.sensor.error_count))
    });
    candidates
}

impl HardwareManager {
    /// Read `quantity` from the best available candidate
    ///
    /// Candidates are dropped when they measure something else, their adapter
    /// is not registered or is blacklisted, its last health check could not
    /// complete, or its health score is below `adapter_health_floor`. Each
    /// read outcome updates the sensor table.
    pub async fn read_best(&self, candidates: &[SensorInfo], quantity: &str) -> Result<ArbitratedReading> {
        let floor = self.config().adapter_health_floor;

        let eligible: Vec<RankedCandidate> = candidates
            .iter()
            .filter(|sensor| sensor.measures(quantity))
            .filter_map(|sensor| {
                let adapter = self.adapter(&sensor.adapter_id)?;
                if adapter.is_blacklisted() {
                    debug!(sensor = %sensor.id, "Skipping candidate on blacklisted adapter");
                    return None;
                }
                let Some(adapter_health) = adapter.routing_score() else {
                    debug!(sensor = %sensor.id, "Skipping candidate on adapter with unknown health");
                    return None;
                };
                if adapter_health < floor {
                    debug!(
                        sensor = %sensor.id,
                        adapter_health,
                        floor,
                        "Skipping candidate below health floor"
                    );
                    return None;
                }
                Some(RankedCandidate {
                    sensor: sensor.clone(),
                    adapter_health,
                })
            })
            .collect();

        for candidate in rank_candidates(eligible) {
            let sensor = candidate.sensor;
            let Some(adapter) = self.adapter(&sensor.adapter_id) else {
                continue;
            };

            let started = Instant::now();
            match adapter.read_sensor(&sensor).await {
                Ok(reading) => {
                    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                    self.update_sensor(&sensor.id, SensorInfo::record_success);
                    debug!(sensor = %sensor.id, latency_ms, "Arbitrated read");
                    return Ok(ArbitratedReading {
                        reading,
                        meta: ReadMeta {
                            sensor_id: sensor.id,
                            adapter_id: sensor.adapter_id,
                            latency_ms,
                        },
                    });
                }
                Err(e) => {
                    self.update_sensor(&sensor.id, SensorInfo::record_error);
                    warn!(sensor = %sensor.id, "Candidate read failed, trying next: {}", e);
                }
            }
        }

        Err(AdapterError::NoHealthySensor {
            quantity: quantity.to_string(),
        })
    }

    /// [`read_best`](Self::read_best) over every known sensor measuring `quantity`
    pub async fn read_quantity(&self, quantity: &str) -> Result<ArbitratedReading> {
        let candidates = self.sensors_for(quantity);
        self.read_best(&candidates, quantity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::Protocol;

    fn candidate(adapter: &str, health: f64, errors: u32) -> RankedCandidate {
        let mut sensor = SensorInfo::new(adapter, "temperature", "BME280", Protocol::I2c).with_address(0x76);
        sensor.error_count = errors;
        RankedCandidate {
            sensor,
            adapter_health: health,
        }
    }

    fn order(ranked: &[RankedCandidate]) -> Vec<&str> {
        ranked.iter().map(|c| c.sensor.adapter_id.as_str()).collect()
    }

    #[test]
    fn test_health_first_then_error_count() {
        let ranked = rank_candidates(vec![
            candidate("a", 0.95, 2),
            candidate("b", 0.95, 0),
            candidate("c", 0.99, 7),
        ]);
        assert_eq!(order(&ranked), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let ranked = rank_candidates(vec![candidate("a", 0.8, 1), candidate("b", 0.8, 1)]);
        assert_eq!(order(&ranked), vec!["a", "b"]);
    }
}
