//! Hardware manager service binary
//!
//! Usage:
//!   hardware-manager --config config/greenhouse.toml
//!   HWMESH_HEALTH_CHECK_INTERVAL_MS=5000 hardware-manager --config config/greenhouse.toml --json-logs

use adapter_service::{SimulatedTransport, TransportKind};
use anyhow::{Context, Result};
use clap::Parser;
use hardware_manager::{DeviceDescriptor, HardwareEvent, HardwareManager, StaticProbe, Topic};
use hwmesh_config::{AdapterDeclaration, OrchestratorConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use types::{PlatformCapabilities, SensorInfo};

#[derive(Parser, Debug)]
#[command(name = "hardware-manager")]
#[command(about = "Hardware adapter orchestration service")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides `log_level` in the config
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = OrchestratorConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    init_logging(config.effective_log_level(args.log_level.as_deref()), args.json_logs);

    info!("Starting hardware manager");
    info!(
        adapters = config.adapters.len(),
        health_interval_ms = config.health_check_interval_ms,
        discovery_interval_ms = config.discovery_interval_ms,
        "Configuration loaded"
    );

    let manager = HardwareManager::new(config.clone());
    subscribe_logging(&manager);

    let probe = Arc::new(StaticProbe::new("configured-addresses"));
    for declaration in &config.adapters {
        if let Some(address) = &declaration.address {
            probe.add_device(
                DeviceDescriptor::new(declaration.name.clone(), TransportKind::Network)
                    .with_platform(declaration.platform.clone())
                    .with_address(address.clone()),
            );
        }

        let transport = simulated_transport(declaration)
            .with_context(|| format!("building adapter '{}'", declaration.name))?;
        if let Err(e) = manager
            .add_transport(&declaration.name, Arc::new(transport), declaration.group.as_deref())
            .await
        {
            warn!(adapter = %declaration.name, "Skipping adapter: {}", e);
        }
    }
    manager.add_probe(probe);

    manager.discover_all_sensors().await;
    manager.start()?;
    info!(adapters = manager.adapter_count(), "Hardware manager running");

    let mut dashboard = tokio::time::interval(Duration::from_millis(config.health_check_interval_ms));
    loop {
        tokio::select! {
            _ = dashboard.tick() => {
                match serde_json::to_string(&manager.dashboard()) {
                    Ok(json) => info!(target: "dashboard", "{}", json),
                    Err(e) => warn!("Failed to serialize dashboard: {}", e),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                break;
            }
        }
    }

    info!("Received shutdown signal");
    manager.shutdown().await;
    Ok(())
}

fn init_logging(level: &str, json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn simulated_transport(declaration: &AdapterDeclaration) -> Result<SimulatedTransport> {
    let platform = PlatformCapabilities::profile(&declaration.platform)?;
    let mut transport = SimulatedTransport::new(platform)
        .with_fail_rate(declaration.fail_rate)
        .with_latency(Duration::from_millis(declaration.latency_ms));

    for sensor in &declaration.sensors {
        let mut info = SensorInfo::new("", sensor.sensor_type.clone(), sensor.name.clone(), sensor.protocol)
            .with_pins(sensor.pins.iter().copied());
        if let Some(address) = sensor.address {
            info = info.with_address(address);
        }
        transport = transport.with_sensor(info, sensor.value, sensor.unit.as_deref());
    }
    Ok(transport)
}

fn subscribe_logging(manager: &HardwareManager) {
    for topic in Topic::ALL {
        manager.on_event(
            topic,
            Arc::new(|event: &HardwareEvent| {
                info!(target: "events", topic = %event.topic(), "{}", serde_json::to_string(event)?);
                Ok(())
            }),
        );
    }
}
