//! Collaborators shared by the sync engine, provisioner and dispatcher.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use vicare_core::{SharedEventBus, VicareEvent};

use crate::error::Result;
use crate::flow;
use crate::host::DeviceHost;
use crate::remote::{DeviceAddress, RemoteClient};
use crate::state::DeviceState;

/// Everything a device talks to, bundled for the engine functions.
#[derive(Clone)]
pub struct DeviceContext {
    pub device_id: String,
    pub address: DeviceAddress,
    pub host: Arc<dyn DeviceHost>,
    pub remote: Arc<dyn RemoteClient>,
    pub events: Option<SharedEventBus>,
}

impl DeviceContext {
    pub fn new(
        device_id: impl Into<String>,
        address: DeviceAddress,
        host: Arc<dyn DeviceHost>,
        remote: Arc<dyn RemoteClient>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            address,
            host,
            remote,
            events: None,
        }
    }

    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub async fn publish(&self, event: VicareEvent, source: &str) {
        if let Some(bus) = &self.events {
            bus.publish_with_source(event, source).await;
        }
    }

    /// Signal availability; the event only fires on a transition.
    pub async fn mark_available(&self, state: &mut DeviceState) -> Result<()> {
        self.host.set_available().await?;
        if state.available != Some(true) {
            state.available = Some(true);
            debug!(category = "device", device_id = %self.device_id, "Device available");
            self.publish(
                VicareEvent::DeviceAvailable {
                    device_id: self.device_id.clone(),
                },
                "session",
            )
            .await;
        }
        Ok(())
    }

    /// Signal unavailability with a user-visible reason.
    pub async fn mark_unavailable(&self, state: &mut DeviceState, reason: &str) {
        if let Err(e) = self.host.set_unavailable(reason).await {
            warn!(
                category = "device",
                device_id = %self.device_id,
                error = %e,
                "Failed to mark device unavailable"
            );
        }
        state.available = Some(false);
        self.publish(
            VicareEvent::DeviceUnavailable {
                device_id: self.device_id.clone(),
                reason: reason.to_string(),
            },
            "session",
        )
        .await;
    }

    /// Write `value` to the host unless the cache already holds it.
    ///
    /// A change also fires the capability's flow trigger, if it has one.
    /// Returns whether a write happened.
    pub async fn write_if_changed(
        &self,
        state: &mut DeviceState,
        capability: &str,
        value: Value,
        source: &str,
    ) -> Result<bool> {
        if state.current_values.get(capability) == Some(&value) {
            return Ok(false);
        }

        self.host
            .set_capability_value(capability, value.clone())
            .await?;
        state
            .current_values
            .insert(capability.to_string(), value.clone());

        debug!(
            category = "sync",
            device_id = %self.device_id,
            capability = %capability,
            value = %value,
            "Capability updated"
        );

        self.publish(
            VicareEvent::CapabilityChanged {
                device_id: self.device_id.clone(),
                capability: capability.to_string(),
                value: value.clone(),
            },
            source,
        )
        .await;

        if let Some(trigger) = flow::trigger_for_capability(capability) {
            let mut tokens = Map::new();
            tokens.insert(trigger.token.to_string(), value);
            self.publish(
                VicareEvent::FlowTriggered {
                    device_id: self.device_id.clone(),
                    trigger_id: trigger.id.to_string(),
                    tokens,
                },
                source,
            )
            .await;
        }

        Ok(true)
    }
}
