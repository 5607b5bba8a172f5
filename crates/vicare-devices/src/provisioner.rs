//! Capability provisioning.
//!
//! Converges the host's exposed capability set, and each capability's
//! options, onto what the table allows for the device's roles, enabled
//! features and reported constraints. Individual host failures are logged
//! and counted; they never abort the pass.

use tracing::{info, warn};

use crate::capability::{CapabilityDescriptor, CapabilityOptions, EnumValue};
use crate::context::DeviceContext;
use crate::error::DeviceError;
use crate::state::DeviceState;
use crate::table::CapabilityTable;

/// What one reconciliation pass changed.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub removed: Vec<String>,
    pub added: Vec<String>,
    pub options_updated: Vec<String>,
    /// Always [`DeviceError::Provisioning`].
    pub failures: Vec<DeviceError>,
}

impl ReconcileReport {
    fn fail(&mut self, capability: &str, error: impl std::fmt::Display) {
        self.failures.push(DeviceError::Provisioning {
            capability: capability.to_string(),
            message: error.to_string(),
        });
    }

    /// Capabilities that could not be provisioned.
    pub fn failed_capabilities(&self) -> Vec<&str> {
        self.failures
            .iter()
            .filter_map(|e| match e {
                DeviceError::Provisioning { capability, .. } => Some(capability.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn is_noop(&self) -> bool {
        self.removed.is_empty()
            && self.added.is_empty()
            && self.options_updated.is_empty()
            && self.failures.is_empty()
    }
}

/// Static options adjusted by what the device reported for `path`.
///
/// Numeric bounds are only overridden on capabilities that declare them;
/// a missing `stepping` keeps the static step. Enumerated values are pruned
/// to the device's mode set, with unknown device modes appended.
pub fn effective_options(
    descriptor: &CapabilityDescriptor,
    path: &str,
    state: &DeviceState,
) -> CapabilityOptions {
    let mut options = descriptor.options.clone();
    let Some(constraints) = state.constraints.get(path) else {
        return options;
    };

    if options.is_numeric() {
        options.min = constraints.min.or(options.min);
        options.max = constraints.max.or(options.max);
        options.step = constraints.stepping.or(options.step);
    }

    if let Some(declared) = options.values.take() {
        let known = &constraints.enum_values;
        options.values = Some(if known.is_empty() {
            declared
        } else {
            let mut values: Vec<EnumValue> = declared
                .into_iter()
                .filter(|v| known.contains(&v.id))
                .collect();
            for mode in known {
                if !values.iter().any(|v| &v.id == mode) {
                    values.push(EnumValue::new(mode.clone(), mode.clone()));
                }
            }
            values
        });
    }

    options
}

/// Bring the host in line with `table` for this device.
///
/// A removed capability loses its cached value and its path's listener
/// registration, so a later re-add starts from scratch.
pub async fn reconcile(
    table: &CapabilityTable,
    state: &mut DeviceState,
    ctx: &DeviceContext,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let host = &ctx.host;

    // Removal runs to completion before anything is added
    for name in host.get_capabilities().await {
        let owners: Vec<_> = table.owners_of(&name).collect();
        if owners.is_empty() {
            // Not ours
            continue;
        }
        if owners
            .iter()
            .any(|owner| state.is_eligible(owner.path, owner.feature))
        {
            continue;
        }
        match host.remove_capability(&name).await {
            Ok(()) => {
                info!(category = "provision", device_id = %ctx.device_id, capability = %name, "Removed capability");
                state.current_values.remove(&name);
                for owner in &owners {
                    state.registered_listeners.remove(owner.path);
                }
                report.removed.push(name);
            }
            Err(e) => {
                warn!(category = "provision", device_id = %ctx.device_id, capability = %name, error = %e, "Failed to remove capability");
                report.fail(&name, e);
            }
        }
    }

    for (path, feature) in table.iter() {
        if !state.is_eligible(path, feature) {
            continue;
        }
        for descriptor in &feature.capabilities {
            let name = descriptor.capability_name.as_str();
            let options = effective_options(descriptor, path, state);

            if host.has_capability(name).await {
                // Constraints may have arrived after the capability was added
                if host.get_capability_options(name).await.as_ref() == Some(&options) {
                    continue;
                }
                match host.set_capability_options(name, &options).await {
                    Ok(()) => report.options_updated.push(name.to_string()),
                    Err(e) => {
                        warn!(category = "provision", device_id = %ctx.device_id, capability = %name, error = %e, "Failed to update capability options");
                        report.fail(name, e);
                    }
                }
                continue;
            }

            let added = async {
                host.set_capability_options(name, &options).await?;
                host.add_capability(name).await
            }
            .await;

            match added {
                Ok(()) => {
                    info!(category = "provision", device_id = %ctx.device_id, capability = %name, path = %path, "Added capability");
                    report.added.push(name.to_string());
                }
                Err(e) => {
                    warn!(category = "provision", device_id = %ctx.device_id, capability = %name, error = %e, "Failed to add capability");
                    report.fail(name, e);
                }
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::paths;
    use vicare_storage::PathConstraints;

    fn state_with(path: &str, constraints: PathConstraints) -> DeviceState {
        let mut state = DeviceState::default();
        state.constraints.insert(path.to_string(), constraints);
        state
    }

    #[test]
    fn test_numeric_constraints_override_static_bounds() {
        let table = CapabilityTable::viessmann();
        let desc = table.get_capability(paths::HOT_WATER_TARGET).unwrap();
        let state = state_with(
            paths::HOT_WATER_TARGET,
            PathConstraints {
                min: Some(20.0),
                max: Some(55.0),
                ..Default::default()
            },
        );

        let options = effective_options(desc, paths::HOT_WATER_TARGET, &state);
        assert_eq!(options.min, Some(20.0));
        assert_eq!(options.max, Some(55.0));
        // No stepping reported: static step stays
        assert_eq!(options.step, Some(1.0));
    }

    #[test]
    fn test_constraints_ignored_on_non_numeric_capability() {
        let table = CapabilityTable::viessmann();
        let desc = table.get_capability(paths::OUTSIDE_TEMP).unwrap();
        let state = state_with(
            paths::OUTSIDE_TEMP,
            PathConstraints {
                max: Some(99.0),
                ..Default::default()
            },
        );
        let options = effective_options(desc, paths::OUTSIDE_TEMP, &state);
        assert_eq!(options.max, None);
    }

    #[test]
    fn test_enum_values_pruned_and_extended() {
        let table = CapabilityTable::viessmann();
        let desc = table.get_capability(paths::HEATING_CIRCUIT_0_MODE).unwrap();
        let state = state_with(
            paths::HEATING_CIRCUIT_0_MODE,
            PathConstraints {
                enum_values: vec![
                    "dhwAndHeating".to_string(),
                    "standby".to_string(),
                    "forcedReduced".to_string(),
                ],
                ..Default::default()
            },
        );

        let values = effective_options(desc, paths::HEATING_CIRCUIT_0_MODE, &state)
            .values
            .unwrap();
        let ids: Vec<&str> = values.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["dhwAndHeating", "standby", "forcedReduced"]);
        assert_eq!(values[0].title, "Hot water and heating");
        assert_eq!(values[2].title, "forcedReduced");
    }
}
