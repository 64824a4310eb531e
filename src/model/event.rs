//! Events broadcast by the session manager.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Consumables, DeviceId, DeviceStatus};
use crate::session::SessionState;

/// Something that happened on one device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceEvent {
    /// Originating device
    pub device: DeviceId,
    /// When the client observed it
    pub at: DateTime<Utc>,
    /// What happened
    pub kind: EventKind,
}

impl DeviceEvent {
    /// Event stamped with the current time
    pub fn now(device: DeviceId, kind: EventKind) -> Self {
        Self {
            device,
            at: Utc::now(),
            kind,
        }
    }
}

/// Event payloads
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Session state transition
    ConnectionChanged {
        /// New state
        state: SessionState,
    },
    /// Fresh status from a poll or a device push
    StatusChanged {
        /// New status
        status: DeviceStatus,
    },
    /// Fresh consumable counters
    ConsumablesChanged {
        /// New counters
        consumables: Consumables,
        /// Parts due for maintenance
        alerts: usize,
    },
    /// A new room graph replaced the previous one
    MapUpdated {
        /// Generation of the new graph
        generation: u32,
        /// Number of rooms in it
        rooms: usize,
    },
    /// A map payload was rejected; the previous graph is still current
    MapParseFailed {
        /// Parser message
        reason: String,
    },
    /// Effective capabilities were (re)resolved after a handshake
    CapabilitiesChanged {
        /// Model designator
        model: String,
        /// Firmware version
        firmware: String,
    },
    /// The device reported an error condition
    DeviceError {
        /// Device error code
        code: i64,
        /// Device message, if any
        message: String,
    },
    /// A device push this client does not interpret
    Other {
        /// Event name
        name: String,
        /// Raw data
        data: serde_json::Value,
    },
}

impl EventKind {
    /// Short name for logs
    pub fn name(&self) -> &str {
        match self {
            Self::ConnectionChanged { .. } => "connection_changed",
            Self::StatusChanged { .. } => "status_changed",
            Self::ConsumablesChanged { .. } => "consumables_changed",
            Self::MapUpdated { .. } => "map_updated",
            Self::MapParseFailed { .. } => "map_parse_failed",
            Self::CapabilitiesChanged { .. } => "capabilities_changed",
            Self::DeviceError { .. } => "device_error",
            Self::Other { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StateCode;

    #[test]
    fn test_event_serializes_tagged() {
        let event = DeviceEvent::now(
            DeviceId::from("d1"),
            EventKind::MapUpdated {
                generation: 4,
                rooms: 6,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["device"], "d1");
        assert_eq!(json["kind"]["type"], "map_updated");
        assert_eq!(json["kind"]["generation"], 4);
    }

    #[test]
    fn test_event_names() {
        let kind = EventKind::StatusChanged {
            status: DeviceStatus::with_state(StateCode::Idle),
        };
        assert_eq!(kind.name(), "status_changed");
        let other = EventKind::Other {
            name: "dock_event".into(),
            data: serde_json::Value::Null,
        };
        assert_eq!(other.name(), "dock_event");
    }
}
