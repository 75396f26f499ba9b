//! Device domain events raised by plug-ins.
//!
//! Plug-ins that talk to hardware report what they observe (devices coming
//! and going, parameter values, signal and battery levels) through a
//! [`DevicePublisher`]. The host routes these events to its update handler,
//! which forwards them to persistence.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One parameter exposed by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRecord {
    /// Parameter name, unique per device.
    pub name: String,
    /// Current value.
    #[serde(default)]
    pub value: Value,
    /// Optional unit of measure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// A device discovered by a plug-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Identifier assigned by the plug-in (serial number, address, …).
    pub external_id: String,
    /// Display name.
    pub name: String,
    /// Parameters known at discovery time.
    #[serde(default)]
    pub parameters: Vec<ParameterRecord>,
}

/// An event raised by a plug-in about one of its devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    /// A device appeared.
    DeviceAdded(DeviceRecord),
    /// A device disappeared.
    DeviceRemoved { device: String },
    /// A parameter changed value.
    ParameterValueChanged {
        device: String,
        parameter: String,
        value: Value,
    },
    /// Radio signal level changed (0–100).
    SignalLevelChanged { device: String, level: u8 },
    /// Battery level changed (0–100).
    BatteryLevelChanged { device: String, level: u8 },
}

impl DeviceEvent {
    /// Returns the external id of the device the event is about.
    pub fn device(&self) -> &str {
        match self {
            Self::DeviceAdded(record) => &record.external_id,
            Self::DeviceRemoved { device }
            | Self::ParameterValueChanged { device, .. }
            | Self::SignalLevelChanged { device, .. }
            | Self::BatteryLevelChanged { device, .. } => device,
        }
    }

    /// Returns a short, stable name for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::DeviceAdded(_) => "device_added",
            Self::DeviceRemoved { .. } => "device_removed",
            Self::ParameterValueChanged { .. } => "parameter_value_changed",
            Self::SignalLevelChanged { .. } => "signal_level_changed",
            Self::BatteryLevelChanged { .. } => "battery_level_changed",
        }
    }
}

/// Host-side receiver of device events.
pub trait DeviceEventSink: Send + Sync {
    fn publish(&self, event: DeviceEvent);
}

/// Handle plug-ins use to raise device events.
///
/// A detached publisher silently drops every event.
#[derive(Clone, Default)]
pub struct DevicePublisher {
    sink: Option<Arc<dyn DeviceEventSink>>,
}

impl DevicePublisher {
    /// Creates a publisher forwarding to `sink`.
    pub fn new(sink: Arc<dyn DeviceEventSink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// Creates a publisher that drops every event.
    pub fn detached() -> Self {
        Self { sink: None }
    }

    /// Returns `true` when events reach a host.
    pub fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    /// Publishes an event.
    pub fn publish(&self, event: DeviceEvent) {
        if let Some(sink) = &self.sink {
            sink.publish(event);
        }
    }

    pub fn device_added(&self, device: DeviceRecord) {
        self.publish(DeviceEvent::DeviceAdded(device));
    }

    pub fn device_removed(&self, device: impl Into<String>) {
        self.publish(DeviceEvent::DeviceRemoved {
            device: device.into(),
        });
    }

    pub fn parameter_value_changed(
        &self,
        device: impl Into<String>,
        parameter: impl Into<String>,
        value: impl Into<Value>,
    ) {
        self.publish(DeviceEvent::ParameterValueChanged {
            device: device.into(),
            parameter: parameter.into(),
            value: value.into(),
        });
    }

    pub fn signal_level_changed(&self, device: impl Into<String>, level: u8) {
        self.publish(DeviceEvent::SignalLevelChanged {
            device: device.into(),
            level: level.min(100),
        });
    }

    pub fn battery_level_changed(&self, device: impl Into<String>, level: u8) {
        self.publish(DeviceEvent::BatteryLevelChanged {
            device: device.into(),
            level: level.min(100),
        });
    }
}

impl fmt::Debug for DevicePublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevicePublisher")
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<DeviceEvent>>);

    impl DeviceEventSink for Collect {
        fn publish(&self, event: DeviceEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn test_publisher_forwards_to_sink() {
        let sink = Arc::new(Collect::default());
        let publisher = DevicePublisher::new(sink.clone());

        publisher.battery_level_changed("sensor-1", 250);
        publisher.device_removed("sensor-2");

        let events = sink.0.lock().unwrap();
        assert_eq!(
            events[0],
            DeviceEvent::BatteryLevelChanged {
                device: "sensor-1".into(),
                level: 100
            }
        );
        assert_eq!(events[1].device(), "sensor-2");
        assert_eq!(events[1].event_name(), "device_removed");
    }

    #[test]
    fn test_detached_publisher_drops_events() {
        let publisher = DevicePublisher::detached();
        assert!(!publisher.is_attached());
        publisher.signal_level_changed("x", 10);
    }

    #[test]
    fn test_event_serialises_with_type_tag() {
        let event = DeviceEvent::ParameterValueChanged {
            device: "meter".into(),
            parameter: "power".into(),
            value: 42.into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "parameter_value_changed");
        assert_eq!(json["value"], 42);
    }
}
