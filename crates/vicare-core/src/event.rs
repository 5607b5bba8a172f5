//! Events published by device sessions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata attached to every published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event id
    pub event_id: String,
    /// Unix timestamp (milliseconds)
    pub timestamp: i64,
    /// Component that published the event
    pub source: String,
}

impl EventMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            source: source.into(),
        }
    }
}

/// Events flowing through the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VicareEvent {
    /// A capability value changed on the host.
    CapabilityChanged {
        device_id: String,
        capability: String,
        value: Value,
    },
    /// A flow trigger fired with its tokens.
    FlowTriggered {
        device_id: String,
        trigger_id: String,
        tokens: Map<String, Value>,
    },
    /// A remote command was accepted by the vendor API.
    CommandExecuted {
        device_id: String,
        feature: String,
        command: String,
    },
    /// The device became available after a successful poll.
    DeviceAvailable { device_id: String },
    /// The device was marked unavailable.
    DeviceUnavailable { device_id: String, reason: String },
}

impl VicareEvent {
    /// Device id the event belongs to.
    pub fn device_id(&self) -> &str {
        match self {
            Self::CapabilityChanged { device_id, .. }
            | Self::FlowTriggered { device_id, .. }
            | Self::CommandExecuted { device_id, .. }
            | Self::DeviceAvailable { device_id }
            | Self::DeviceUnavailable { device_id, .. } => device_id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::CapabilityChanged { .. } => "CapabilityChanged",
            Self::FlowTriggered { .. } => "FlowTriggered",
            Self::CommandExecuted { .. } => "CommandExecuted",
            Self::DeviceAvailable { .. } => "DeviceAvailable",
            Self::DeviceUnavailable { .. } => "DeviceUnavailable",
        }
    }

    pub fn is_availability_event(&self) -> bool {
        matches!(
            self,
            Self::DeviceAvailable { .. } | Self::DeviceUnavailable { .. }
        )
    }

    pub fn is_flow_event(&self) -> bool {
        matches!(self, Self::FlowTriggered { .. })
    }
}
