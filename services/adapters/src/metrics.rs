//! Rolling operation metrics and health scoring
//!
//! Health is computed over the recent window only, so a burst of historical
//! failures stops counting once it has rolled out of the window. Lifetime
//! counters are kept alongside for reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One guarded operation outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub operation: String,
    pub latency_ms: f64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time metrics summary for dashboards and events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Operations since the adapter was created
    pub operations: u64,
    /// Failed operations since the adapter was created
    pub errors: u64,
    /// Samples currently in the window
    pub window_size: usize,
    /// Error rate over the window
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub last_error: Option<String>,
}

/// Bounded window of recent samples plus lifetime counters
#[derive(Debug, Clone)]
pub struct MetricsWindow {
    samples: VecDeque<MetricSample>,
    capacity: usize,
    total_operations: u64,
    total_errors: u64,
    last_error: Option<String>,
}

impl MetricsWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            total_operations: 0,
            total_errors: 0,
            last_error: None,
        }
    }

    /// Record an operation outcome, evicting the oldest sample when full
    pub fn record(&mut self, sample: MetricSample, error: Option<String>) {
        self.total_operations += 1;
        if !sample.success {
            self.total_errors += 1;
        }
        if error.is_some() {
            self.last_error = error;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Drop the recent window; lifetime counters are kept
    pub fn clear_recent(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Failed share of the window; zero for an empty window
    pub fn error_rate(&self) -> f64 {
        let errors = self.samples.iter().filter(|s| !s.success).count();
        errors as f64 / self.samples.len().max(1) as f64
    }

    /// `clamp(1 - 2 * error_rate, 0, 1)`
    pub fn health_score(&self) -> f64 {
        (1.0 - 2.0 * self.error_rate()).clamp(0.0, 1.0)
    }

    pub fn average_latency_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.latency_ms).sum::<f64>() / self.samples.len() as f64
    }

    /// Nearest-rank latency percentile over the window
    pub fn latency_percentile_ms(&self, percentile: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples.iter().map(|s| s.latency_ms).collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = (percentile * sorted.len() as f64).ceil() as usize;
        sorted[rank.clamp(1, sorted.len()) - 1]
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            operations: self.total_operations,
            errors: self.total_errors,
            window_size: self.samples.len(),
            error_rate: self.error_rate(),
            avg_latency_ms: self.average_latency_ms(),
            p95_latency_ms: self.latency_percentile_ms(0.95),
            last_error: self.last_error.clone(),
        }
    }
}
