//! Redundant temperature sensors on two adapters; the preferred adapter
//! degrades until neither is routable.

use adapter_service::simulated::ops;
use adapter_service::{AdapterError, HardwareAdapter, SimulatedTransport};
use hardware_manager::HardwareManager;
use hwmesh_config::OrchestratorConfig;
use std::sync::Arc;
use types::{HealthState, PlatformCapabilities, Protocol, SensorInfo};

const CONFIG: &str = r#"
operation_timeout_ms = 500
retry_max_attempts = 1
retry_initial_delay_ms = 1
adapter_health_floor = 0.7
"#;

async fn read_times(adapter: &HardwareAdapter, sensor: &SensorInfo, times: usize) {
    for _ in 0..times {
        adapter.read_sensor(sensor).await.unwrap();
    }
}

#[tokio::test]
async fn test_degraded_primary_yields_no_healthy_sensor() {
    let config = OrchestratorConfig::from_toml_str(CONFIG).unwrap();
    let manager = HardwareManager::new(config);

    let rpi = Arc::new(
        SimulatedTransport::new(PlatformCapabilities::raspberry_pi()).with_sensor(
            SensorInfo::new("", "temperature", "BME280", Protocol::I2c).with_address(0x76),
            22.5,
            Some("celsius"),
        ),
    );
    let esp = Arc::new(
        SimulatedTransport::new(PlatformCapabilities::esp32()).with_sensor(
            SensorInfo::new("", "temperature", "DS18B20", Protocol::OneWire).with_pins([4]),
            24.0,
            Some("celsius"),
        ),
    );
    let rpi_adapter = manager.add_transport("rpi-main", rpi.clone(), Some("local")).await.unwrap();
    let esp_adapter = manager
        .add_transport("esp32-greenhouse", esp.clone(), Some("greenhouse"))
        .await
        .unwrap();

    // One successful discovery per adapter
    let discovered = manager.discover_all_sensors().await;
    let rpi_sensor = discovered["rpi-main"][0].clone();
    let esp_sensor = discovered["esp32-greenhouse"][0].clone();

    // esp32: 4 successes then 1 failure scores 0.6
    read_times(&esp_adapter, &esp_sensor, 3).await;
    esp.fail_next(ops::READ_SENSOR, 1);
    assert!(esp_adapter.read_sensor(&esp_sensor).await.is_err());
    assert!((esp_adapter.health_score() - 0.6).abs() < 1e-9);
    assert_eq!(esp_adapter.health_state(), HealthState::Degraded);

    // rpi-main: clean history
    read_times(&rpi_adapter, &rpi_sensor, 8).await;
    assert_eq!(rpi_adapter.health_score(), 1.0);

    let candidates = manager.sensors_for("temperature");
    assert_eq!(candidates.len(), 2);

    let esp_reads = esp.calls(ops::READ_SENSOR);
    let best = manager.read_best(&candidates, "temperature").await.unwrap();
    assert_eq!(best.meta.adapter_id, "rpi-main");
    assert_eq!(best.meta.sensor_id, rpi_sensor.id);
    assert_eq!(best.reading.value, 22.5);
    assert_eq!(best.reading.unit.as_deref(), Some("celsius"));
    assert_eq!(esp.calls(ops::READ_SENSOR), esp_reads);

    // Three consecutive read failures on rpi-main: 3 errors in 13 ops
    rpi.fail_next(ops::READ_SENSOR, 3);
    for _ in 0..3 {
        assert!(rpi_adapter.read_sensor(&rpi_sensor).await.is_err());
    }
    let health = rpi_adapter.health_score();
    assert!(health < 0.7, "rpi-main health {} should be below the floor", health);
    assert_eq!(rpi_adapter.health_state(), HealthState::Degraded);
    assert!(!rpi_adapter.is_blacklisted());

    let rpi_reads = rpi.calls(ops::READ_SENSOR);
    let err = manager.read_best(&candidates, "temperature").await.unwrap_err();
    assert!(matches!(err, AdapterError::NoHealthySensor { ref quantity } if quantity == "temperature"));
    assert_eq!(rpi.calls(ops::READ_SENSOR), rpi_reads);
    assert_eq!(esp.calls(ops::READ_SENSOR), esp_reads);
}
