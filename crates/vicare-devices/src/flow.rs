//! Flow cards: automation conditions, actions and triggers.
//!
//! Cards name a feature path of the base table. Only the capability name is
//! taken from it; the device resolves that name through its own table, so a
//! card keeps working when the path is remapped.
//! Actions go through [`DeviceSession::on_capability_write`] and fail with
//! the remote error when the command is rejected.

use serde_json::Value;

use crate::error::{DeviceError, Result};
use crate::session::DeviceSession;
use crate::table::paths;

/// Trigger fired when a capability's value changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowTrigger {
    pub id: &'static str,
    pub capability: &'static str,
    /// Token carrying the new value.
    pub token: &'static str,
}

pub const HEATING_MODE_CHANGED: FlowTrigger = FlowTrigger {
    id: "heating-mode-changed",
    capability: "thermostat_mode.heating",
    token: "mode",
};

pub const TRIGGERS: &[FlowTrigger] = &[HEATING_MODE_CHANGED];

pub fn trigger_for_capability(capability: &str) -> Option<&'static FlowTrigger> {
    TRIGGERS.iter().find(|t| t.capability == capability)
}

/// Condition cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowCondition {
    CompressorIsRunning,
    BurnerIsRunning,
}

impl FlowCondition {
    pub const ALL: [FlowCondition; 2] = [Self::CompressorIsRunning, Self::BurnerIsRunning];

    pub fn id(&self) -> &'static str {
        match self {
            Self::CompressorIsRunning => "compressor-is-running",
            Self::BurnerIsRunning => "burner-is-running",
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Self::CompressorIsRunning => paths::COMPRESSOR,
            Self::BurnerIsRunning => paths::BURNER,
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.id() == id)
    }
}

/// Action cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowAction {
    SetOperatingMode,
    SetHeatingThermostat,
    SetHotWaterThermostat,
    SetHotWaterThermostat2,
    DoOneTimeHotWaterCharge,
}

impl FlowAction {
    pub const ALL: [FlowAction; 5] = [
        Self::SetOperatingMode,
        Self::SetHeatingThermostat,
        Self::SetHotWaterThermostat,
        Self::SetHotWaterThermostat2,
        Self::DoOneTimeHotWaterCharge,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Self::SetOperatingMode => "set-operating-mode",
            Self::SetHeatingThermostat => "set-heating-thermostat",
            Self::SetHotWaterThermostat => "set-hot-water-thermostat",
            Self::SetHotWaterThermostat2 => "set-hot-water-thermostat2",
            Self::DoOneTimeHotWaterCharge => "do-one-time-hot-water-charge",
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Self::SetOperatingMode => paths::HEATING_CIRCUIT_0_MODE,
            Self::SetHeatingThermostat => paths::HEATING_CIRCUIT_0_TARGET,
            Self::SetHotWaterThermostat => paths::HOT_WATER_TARGET,
            Self::SetHotWaterThermostat2 => paths::HOT_WATER_TARGET_2,
            Self::DoOneTimeHotWaterCharge => paths::HOT_WATER_CHARGE,
        }
    }

    /// Argument range of the temperature actions.
    pub fn range(&self) -> Option<(f64, f64)> {
        match self {
            Self::SetHeatingThermostat => Some((3.0, 37.0)),
            Self::SetHotWaterThermostat | Self::SetHotWaterThermostat2 => Some((10.0, 60.0)),
            _ => None,
        }
    }

    /// Accepted string arguments of the dropdown actions.
    pub fn choices(&self) -> Option<&'static [&'static str]> {
        match self {
            Self::SetOperatingMode => Some(&["dhw", "heating", "dhwAndHeating", "standby"]),
            Self::DoOneTimeHotWaterCharge => Some(&["activate", "deactivate"]),
            _ => None,
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.id() == id)
    }

    fn validate(&self, arg: &Value) -> Result<()> {
        if let Some((min, max)) = self.range() {
            let n = arg.as_f64().ok_or_else(|| {
                DeviceError::InvalidValue(format!("{} expects a number, got {}", self.id(), arg))
            })?;
            if n < min || n > max {
                return Err(DeviceError::InvalidValue(format!(
                    "{} must be between {} and {}, got {}",
                    self.id(),
                    min,
                    max,
                    n
                )));
            }
        }
        if let Some(choices) = self.choices() {
            let ok = arg.as_str().is_some_and(|s| choices.contains(&s));
            if !ok {
                return Err(DeviceError::InvalidValue(format!(
                    "{} expects one of {:?}, got {}",
                    self.id(),
                    choices,
                    arg
                )));
            }
        }
        Ok(())
    }
}

/// Truthiness used by condition cards.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "off" && s != "false",
        Value::Null => false,
        _ => true,
    }
}

/// Evaluate a condition card against the device's current values.
pub async fn evaluate_condition(session: &DeviceSession, condition: FlowCondition) -> Result<bool> {
    let capability = session.base_table().get_capability(condition.path())?;
    Ok(session
        .capability_value(&capability.capability_name)
        .await
        .is_some_and(|v| is_truthy(&v)))
}

/// Run an action card with its single argument.
pub async fn run_action(session: &DeviceSession, action: FlowAction, arg: Value) -> Result<()> {
    action.validate(&arg)?;
    let capability = session.base_table().get_capability(action.path())?;
    session
        .on_capability_write(&capability.capability_name, arg)
        .await
}
