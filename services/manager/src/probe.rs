//! Device probes feeding the discovery loop
//!
//! A probe reports hardware that has become reachable but is not necessarily
//! registered yet (a board answering on the serial port, a node announcing
//! itself on the network). The manager reports descriptors it has not seen
//! before in `hardware_discovered`.

use adapter_service::{Result, TransportKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Reachable device reported by a probe
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Stable identifier, e.g. a serial port path or network address
    pub id: String,
    pub kind: TransportKind,
    /// Platform profile name, when the probe can tell
    pub platform: Option<String>,
    pub address: Option<String>,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, kind: TransportKind) -> Self {
        Self {
            id: id.into(),
            kind,
            platform: None,
            address: None,
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

/// Source of newly reachable hardware
#[async_trait]
pub trait DeviceProbe: Send + Sync {
    fn name(&self) -> &str;

    async fn probe(&self) -> Result<Vec<DeviceDescriptor>>;
}

/// Probe over a fixed, externally maintained device list
#[derive(Debug, Default)]
pub struct StaticProbe {
    name: String,
    devices: Mutex<Vec<DeviceDescriptor>>,
}

impl StaticProbe {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            devices: Mutex::new(Vec::new()),
        }
    }

    /// Make `device` visible from the next sweep on
    pub fn add_device(&self, device: DeviceDescriptor) {
        self.devices.lock().push(device);
    }
}

#[async_trait]
impl DeviceProbe for StaticProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(self.devices.lock().clone())
    }
}
