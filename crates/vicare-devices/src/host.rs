//! Device host interface and an in-memory implementation.
//!
//! The host owns what the user sees: the capability set, option metadata,
//! current values and the availability flag. The bridge drives it; it never
//! calls back except through capability writes routed to
//! [`DeviceSession::on_capability_write`](crate::session::DeviceSession::on_capability_write).

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use crate::capability::CapabilityOptions;
use crate::error::{DeviceError, Result};

/// Host-side view of one device.
#[async_trait]
pub trait DeviceHost: Send + Sync {
    async fn has_capability(&self, name: &str) -> bool;

    /// Exposed capabilities, in the order they were added.
    async fn get_capabilities(&self) -> Vec<String>;

    async fn add_capability(&self, name: &str) -> Result<()>;

    async fn remove_capability(&self, name: &str) -> Result<()>;

    async fn set_capability_options(&self, name: &str, options: &CapabilityOptions) -> Result<()>;

    async fn get_capability_options(&self, name: &str) -> Option<CapabilityOptions>;

    async fn get_capability_value(&self, name: &str) -> Option<Value>;

    async fn set_capability_value(&self, name: &str, value: Value) -> Result<()>;

    /// Route user writes of `name` to the bridge.
    async fn register_capability_listener(&self, name: &str) -> Result<()>;

    async fn set_available(&self) -> Result<()>;

    async fn set_unavailable(&self, reason: &str) -> Result<()>;
}

/// One call made against a [`MemoryDeviceHost`].
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    AddCapability(String),
    RemoveCapability(String),
    SetOptions(String),
    SetValue(String, Value),
    RegisterListener(String),
    SetAvailable,
    SetUnavailable(String),
}

#[derive(Default)]
struct HostState {
    capabilities: Vec<String>,
    options: HashMap<String, CapabilityOptions>,
    values: HashMap<String, Value>,
    listeners: HashSet<String>,
    available: Option<bool>,
    unavailable_reason: Option<String>,
    calls: Vec<HostCall>,
    failing: HashSet<String>,
}

/// Host kept entirely in memory, recording every mutating call.
///
/// Used for headless runs and as the test double for the engine.
#[derive(Default)]
pub struct MemoryDeviceHost {
    state: RwLock<HostState>,
}

impl MemoryDeviceHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with capabilities already exposed, as after a restart.
    pub fn with_capabilities<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = HostState {
            capabilities: names.into_iter().map(Into::into).collect(),
            ..Default::default()
        };
        Self {
            state: RwLock::new(state),
        }
    }

    /// Make add/remove/set-options calls for `name` fail.
    pub async fn fail_capability(&self, name: &str) {
        self.state.write().await.failing.insert(name.to_string());
    }

    pub async fn calls(&self) -> Vec<HostCall> {
        self.state.read().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.state.write().await.calls.clear();
    }

    /// Number of value writes, optionally for one capability.
    pub async fn value_writes(&self, name: Option<&str>) -> usize {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter(|c| match c {
                HostCall::SetValue(n, _) => name.is_none_or(|want| n == want),
                _ => false,
            })
            .count()
    }

    pub async fn listeners(&self) -> HashSet<String> {
        self.state.read().await.listeners.clone()
    }

    pub async fn listener_registrations(&self) -> usize {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter(|c| matches!(c, HostCall::RegisterListener(_)))
            .count()
    }

    /// `None` until the bridge signals availability either way.
    pub async fn is_available(&self) -> Option<bool> {
        self.state.read().await.available
    }

    pub async fn unavailable_reason(&self) -> Option<String> {
        self.state.read().await.unavailable_reason.clone()
    }

    fn check(state: &HostState, name: &str) -> Result<()> {
        if state.failing.contains(name) {
            Err(DeviceError::Host(format!("capability {} rejected", name)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DeviceHost for MemoryDeviceHost {
    async fn has_capability(&self, name: &str) -> bool {
        self.state.read().await.capabilities.iter().any(|c| c == name)
    }

    async fn get_capabilities(&self) -> Vec<String> {
        self.state.read().await.capabilities.clone()
    }

    async fn add_capability(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        Self::check(&state, name)?;
        state.calls.push(HostCall::AddCapability(name.to_string()));
        if !state.capabilities.iter().any(|c| c == name) {
            state.capabilities.push(name.to_string());
        }
        Ok(())
    }

    async fn remove_capability(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        Self::check(&state, name)?;
        state.calls.push(HostCall::RemoveCapability(name.to_string()));
        state.capabilities.retain(|c| c != name);
        state.options.remove(name);
        state.values.remove(name);
        state.listeners.remove(name);
        Ok(())
    }

    async fn set_capability_options(&self, name: &str, options: &CapabilityOptions) -> Result<()> {
        let mut state = self.state.write().await;
        Self::check(&state, name)?;
        state.calls.push(HostCall::SetOptions(name.to_string()));
        state.options.insert(name.to_string(), options.clone());
        Ok(())
    }

    async fn get_capability_options(&self, name: &str) -> Option<CapabilityOptions> {
        self.state.read().await.options.get(name).cloned()
    }

    async fn get_capability_value(&self, name: &str) -> Option<Value> {
        self.state.read().await.values.get(name).cloned()
    }

    async fn set_capability_value(&self, name: &str, value: Value) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.capabilities.iter().any(|c| c == name) {
            return Err(DeviceError::Host(format!("capability {} is not exposed", name)));
        }
        state
            .calls
            .push(HostCall::SetValue(name.to_string(), value.clone()));
        state.values.insert(name.to_string(), value);
        Ok(())
    }

    async fn register_capability_listener(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .calls
            .push(HostCall::RegisterListener(name.to_string()));
        state.listeners.insert(name.to_string());
        Ok(())
    }

    async fn set_available(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.calls.push(HostCall::SetAvailable);
        state.available = Some(true);
        state.unavailable_reason = None;
        Ok(())
    }

    async fn set_unavailable(&self, reason: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .calls
            .push(HostCall::SetUnavailable(reason.to_string()));
        state.available = Some(false);
        state.unavailable_reason = Some(reason.to_string());
        Ok(())
    }
}
