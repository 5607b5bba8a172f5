//! Runtime state of one device.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use vicare_storage::{CURRENT_SCHEMA_VERSION, PathConstraints, PersistedDeviceState};

use crate::capability::FeatureDescriptor;

/// Roles, enabled features and constraints drive provisioning; the value
/// cache suppresses redundant host writes.
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    pub roles: Vec<String>,
    pub enabled_features: BTreeSet<String>,
    pub constraints: BTreeMap<String, PathConstraints>,
    pub path_overrides: BTreeMap<String, String>,
    /// Capability -> last value written to (or read from) the host.
    pub current_values: HashMap<String, Value>,
    /// Feature paths whose command listeners are registered.
    pub registered_listeners: HashSet<String>,
    /// Last availability signalled to the host.
    pub available: Option<bool>,
}

impl DeviceState {
    pub fn new(roles: Vec<String>) -> Self {
        Self {
            roles,
            ..Default::default()
        }
    }

    pub fn from_persisted(persisted: PersistedDeviceState) -> Self {
        Self {
            roles: persisted.roles,
            enabled_features: persisted.enabled_features,
            constraints: persisted.constraints,
            path_overrides: persisted.path_overrides,
            ..Default::default()
        }
    }

    pub fn to_persisted(&self) -> PersistedDeviceState {
        PersistedDeviceState {
            schema_version: CURRENT_SCHEMA_VERSION,
            roles: self.roles.clone(),
            enabled_features: self.enabled_features.clone(),
            constraints: self.constraints.clone(),
            path_overrides: self.path_overrides.clone(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_feature_enabled(&self, path: &str) -> bool {
        self.enabled_features.contains(path)
    }

    /// Role-eligible and feature-enabled.
    pub fn is_eligible(&self, path: &str, feature: &FeatureDescriptor) -> bool {
        feature.is_role_eligible(&self.roles) && self.is_feature_enabled(path)
    }

    /// Record constraints reported for `path`; empty ones clear the entry.
    /// Returns whether anything changed.
    pub fn update_constraints(&mut self, path: &str, constraints: PathConstraints) -> bool {
        if constraints.is_empty() {
            return self.constraints.remove(path).is_some();
        }
        if self.constraints.get(path) == Some(&constraints) {
            return false;
        }
        self.constraints.insert(path.to_string(), constraints);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persisted_round_trip_keeps_runtime_fields_out() {
        let mut state = DeviceState::new(vec!["type:boiler".to_string()]);
        state.enabled_features.insert("heating.burners.0".to_string());
        state
            .current_values
            .insert("measure_burner_active".to_string(), Value::Bool(true));

        let restored = DeviceState::from_persisted(state.to_persisted());
        assert!(restored.has_role("type:boiler"));
        assert!(restored.is_feature_enabled("heating.burners.0"));
        assert!(restored.current_values.is_empty());
    }

    #[test]
    fn test_update_constraints() {
        let mut state = DeviceState::default();
        let c = PathConstraints {
            max: Some(55.0),
            ..Default::default()
        };
        assert!(state.update_constraints("p", c.clone()));
        assert!(!state.update_constraints("p", c));
        assert!(state.update_constraints("p", PathConstraints::default()));
        assert!(state.constraints.is_empty());
    }
}
