//! Topic-based event bus
//!
//! Handlers subscribe per topic and are called synchronously in registration
//! order. A handler that returns an error or panics is logged and skipped;
//! delivery to the remaining handlers continues.

use crate::probe::DeviceDescriptor;
use adapter_service::AdapterHealth;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};
use types::SensorInfo;

/// Named event topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    AdapterAdded,
    AdapterRemoved,
    AdapterFailed,
    HardwareDiscovered,
    AdaptersUnhealthy,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::AdapterAdded,
        Topic::AdapterRemoved,
        Topic::AdapterFailed,
        Topic::HardwareDiscovered,
        Topic::AdaptersUnhealthy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::AdapterAdded => "adapter_added",
            Topic::AdapterRemoved => "adapter_removed",
            Topic::AdapterFailed => "adapter_failed",
            Topic::HardwareDiscovered => "hardware_discovered",
            Topic::AdaptersUnhealthy => "adapters_unhealthy",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle event payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum HardwareEvent {
    AdapterAdded {
        name: String,
        group: Option<String>,
    },
    AdapterRemoved {
        name: String,
    },
    /// Reinitialisation after a failure did not succeed
    AdapterFailed {
        name: String,
        last_health: f64,
    },
    /// Newly reachable devices and newly seen sensors
    HardwareDiscovered {
        devices: Vec<DeviceDescriptor>,
        sensors: Vec<SensorInfo>,
    },
    /// Adapters outside the top two health tiers
    AdaptersUnhealthy {
        adapters: Vec<AdapterHealth>,
    },
}

impl HardwareEvent {
    pub fn topic(&self) -> Topic {
        match self {
            HardwareEvent::AdapterAdded { .. } => Topic::AdapterAdded,
            HardwareEvent::AdapterRemoved { .. } => Topic::AdapterRemoved,
            HardwareEvent::AdapterFailed { .. } => Topic::AdapterFailed,
            HardwareEvent::HardwareDiscovered { .. } => Topic::HardwareDiscovered,
            HardwareEvent::AdaptersUnhealthy { .. } => Topic::AdaptersUnhealthy,
        }
    }
}

/// Subscriber callback
pub type EventHandler = Arc<dyn Fn(&HardwareEvent) -> anyhow::Result<()> + Send + Sync>;

/// Delivery counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventBusStats {
    pub emitted: u64,
    pub delivered: u64,
    pub handler_failures: u64,
}

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<Topic, Vec<EventHandler>>>,
    emitted: AtomicU64,
    delivered: AtomicU64,
    handler_failures: AtomicU64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<Topic, usize> = self
            .handlers
            .read()
            .iter()
            .map(|(topic, handlers)| (*topic, handlers.len()))
            .collect();
        f.debug_struct("EventBus").field("handlers", &counts).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to `topic`
    pub fn on(&self, topic: Topic, handler: EventHandler) {
        self.handlers.write().entry(topic).or_default().push(handler);
    }

    pub fn handler_count(&self, topic: Topic) -> usize {
        self.handlers.read().get(&topic).map(Vec::len).unwrap_or(0)
    }

    /// Deliver `event` to every handler of its topic
    ///
    /// Returns the number of handlers that completed successfully.
    pub fn emit(&self, event: &HardwareEvent) -> usize {
        let topic = event.topic();
        // Handlers may subscribe further handlers; do not hold the lock while calling them
        let handlers = self.handlers.read().get(&topic).cloned().unwrap_or_default();
        self.emitted.fetch_add(1, Ordering::Relaxed);
        debug!(%topic, handlers = handlers.len(), "Emitting event");

        let mut delivered = 0;
        for (index, handler) in handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(%topic, handler = index, "Event handler failed: {:#}", e);
                }
                Err(_) => {
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    error!(%topic, handler = index, "Event handler panicked");
                }
            }
        }

        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            emitted: self.emitted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn removed(name: &str) -> HardwareEvent {
        HardwareEvent::AdapterRemoved {
            name: name.to_string(),
        }
    }

    #[test]
    fn test_delivery_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for id in 0..3 {
            let seen = seen.clone();
            bus.on(
                Topic::AdapterRemoved,
                Arc::new(move |_event: &HardwareEvent| {
                    seen.lock().push(id);
                    Ok(())
                }),
            );
        }

        assert_eq!(bus.emit(&removed("rpi-main")), 3);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_failing_handlers_are_isolated() {
        let bus = EventBus::new();
        let reached = Arc::new(Mutex::new(false));

        bus.on(
            Topic::AdapterRemoved,
            Arc::new(|_event: &HardwareEvent| Err(anyhow::anyhow!("subscriber offline"))),
        );
        bus.on(
            Topic::AdapterRemoved,
            Arc::new(|_event: &HardwareEvent| -> anyhow::Result<()> { panic!("subscriber bug") }),
        );
        let flag = reached.clone();
        bus.on(
            Topic::AdapterRemoved,
            Arc::new(move |_event: &HardwareEvent| {
                *flag.lock() = true;
                Ok(())
            }),
        );

        assert_eq!(bus.emit(&removed("esp32")), 1);
        assert!(*reached.lock());

        let stats = bus.stats();
        assert_eq!(stats.emitted, 1);
        assert_eq!(stats.handler_failures, 2);
    }

    #[test]
    fn test_topics_are_independent() {
        let bus = EventBus::new();
        bus.on(Topic::AdapterAdded, Arc::new(|_event: &HardwareEvent| Ok(())));
        assert_eq!(bus.emit(&removed("esp32")), 0);
        assert_eq!(bus.handler_count(Topic::AdapterAdded), 1);
    }

    #[test]
    fn test_event_wire_format() {
        let event = HardwareEvent::AdapterFailed {
            name: "esp32-greenhouse".to_string(),
            last_health: 0.1,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["topic"], "adapter_failed");
        assert_eq!(json["name"], "esp32-greenhouse");
        assert_eq!(event.topic().as_str(), "adapter_failed");
    }
}
