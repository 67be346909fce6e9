//! Health Bound Property Tests
//!
//! Whatever mix of successes, failures and timeouts an adapter sees, its
//! health score stays within [0, 1] at every observation point.

use adapter_service::simulated::ops;
use adapter_service::{
    AdapterSettings, HardwareAdapter, MetricSample, MetricsWindow, RetryPolicy, SimulatedTransport,
};
use chrono::Utc;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use types::{PlatformCapabilities, Protocol, SensorInfo};

fn sample(success: bool, latency_ms: f64) -> MetricSample {
    MetricSample {
        operation: "read_sensor".to_string(),
        latency_ms,
        success,
        timestamp: Utc::now(),
    }
}

proptest! {
    #[test]
    fn prop_window_health_bounded(
        window in 1usize..64,
        outcomes in prop::collection::vec((any::<bool>(), 0.0f64..500.0), 0..256),
    ) {
        let mut metrics = MetricsWindow::new(window);
        for (success, latency) in outcomes {
            metrics.record(sample(success, latency), None);
            let score = metrics.health_score();
            prop_assert!((0.0..=1.0).contains(&score));
            prop_assert!(metrics.len() <= window);
            prop_assert!(metrics.latency_percentile_ms(0.95) <= 500.0);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_adapter_health_bounded(outcomes in prop::collection::vec(any::<bool>(), 1..40)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let transport = Arc::new(
                SimulatedTransport::new(PlatformCapabilities::raspberry_pi()).with_sensor(
                    SensorInfo::new("", "temperature", "BME280", Protocol::I2c).with_address(0x76),
                    20.0,
                    None,
                ),
            );
            let settings = AdapterSettings {
                operation_timeout: Duration::from_millis(100),
                retry: RetryPolicy::none(),
                metrics_window: 16,
            };
            let adapter = HardwareAdapter::with_settings("rpi-main", transport.clone(), settings);
            adapter.initialize().await.unwrap();
            let sensor = adapter.discover_sensors().await.unwrap().remove(0);

            for succeed in outcomes {
                if !succeed {
                    transport.fail_next(ops::READ_SENSOR, 1);
                }
                let _ = adapter.read_sensor(&sensor).await;
                adapter.health_check().await;
                let score = adapter.health_score();
                assert!((0.0..=1.0).contains(&score), "score {} out of bounds", score);
            }
        });
    }
}
