//! Capability descriptors: how one remote feature surfaces as host capabilities.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Dot-segmented remote feature identifier, e.g. `heating.circuits.0.operating.modes.active`.
pub type FeaturePath = String;

/// How a capability write turns into a remote command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandTemplate {
    /// Call `name`, building the body from `parameter_mapping`
    /// (local key -> remote parameter name). The local key `value`
    /// carries the written capability value.
    Named {
        name: String,
        parameter_mapping: BTreeMap<String, String>,
    },
    /// The written value, after `value_mapping`, is the command name.
    ValueAsCommand,
}

impl CommandTemplate {
    /// Single-parameter command: `{ value -> param }`.
    pub fn named(name: impl Into<String>, param: impl Into<String>) -> Self {
        let mut parameter_mapping = BTreeMap::new();
        parameter_mapping.insert("value".to_string(), param.into());
        CommandTemplate::Named {
            name: name.into(),
            parameter_mapping,
        }
    }
}

/// One allowed value of an enumerated capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumValue {
    pub id: String,
    pub title: String,
}

impl EnumValue {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// Display and validation metadata handed to the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<EnumValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_true: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_false: Option<String>,
    #[serde(default)]
    pub prevent_insights: bool,
    #[serde(default)]
    pub prevent_tag: bool,
}

impl CapabilityOptions {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn with_decimals(mut self, decimals: u32) -> Self {
        self.decimals = Some(decimals);
        self
    }

    pub fn with_range(mut self, min: f64, max: f64, step: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self.step = Some(step);
        self
    }

    pub fn with_values(mut self, values: Vec<EnumValue>) -> Self {
        self.values = Some(values);
        self
    }

    pub fn with_bool_titles(mut self, title_true: &str, title_false: &str) -> Self {
        self.title_true = Some(title_true.to_string());
        self.title_false = Some(title_false.to_string());
        self
    }

    pub fn prevent_insights(mut self, prevent: bool) -> Self {
        self.prevent_insights = prevent;
        self
    }

    pub fn prevent_tag(mut self, prevent: bool) -> Self {
        self.prevent_tag = prevent;
        self
    }

    /// Numeric capabilities declare at least one of min/max/step.
    pub fn is_numeric(&self) -> bool {
        self.min.is_some() || self.max.is_some() || self.step.is_some()
    }

    pub fn is_enumerated(&self) -> bool {
        self.values.is_some()
    }
}

/// One capability derived from a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub capability_name: String,
    /// Dot path into the feature's `properties` object.
    pub property_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandTemplate>,
    /// Raw remote value (canonical string form) -> local value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_mapping: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub options: CapabilityOptions,
}

impl CapabilityDescriptor {
    pub fn new(
        capability_name: impl Into<String>,
        property_path: impl Into<String>,
        options: CapabilityOptions,
    ) -> Self {
        Self {
            capability_name: capability_name.into(),
            property_path: property_path.into(),
            command: None,
            value_mapping: None,
            options,
        }
    }

    pub fn with_command(mut self, command: CommandTemplate) -> Self {
        self.command = Some(command);
        self
    }

    pub fn with_value_mapping<K, V>(mut self, mapping: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.value_mapping = Some(
            mapping
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn is_writable(&self) -> bool {
        self.command.is_some()
    }

    /// Remote value -> local value. Unmapped values pass through.
    pub fn map_read(&self, raw: &Value) -> Value {
        self.value_mapping
            .as_ref()
            .and_then(|mapping| mapping.get(&canonical_key(raw)))
            .cloned()
            .unwrap_or_else(|| raw.clone())
    }

    /// Command name sent for a `ValueAsCommand` write of `value`.
    ///
    /// A value that is a mapping key (`true`) is translated (`activate`);
    /// anything else, including an already-mapped value, is used as is.
    pub fn command_for_value(&self, value: &Value) -> String {
        let key = canonical_key(value);
        match self.value_mapping.as_ref().and_then(|m| m.get(&key)) {
            Some(mapped) => canonical_key(mapped),
            None => key,
        }
    }
}

/// All capabilities of one feature path, with the role gating them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_role: Option<String>,
    pub capabilities: Vec<CapabilityDescriptor>,
}

impl FeatureDescriptor {
    pub fn new(capabilities: Vec<CapabilityDescriptor>) -> Self {
        Self {
            require_role: None,
            capabilities,
        }
    }

    pub fn requiring_role(mut self, role: impl Into<String>) -> Self {
        self.require_role = Some(role.into());
        self
    }

    /// A feature without a required role applies to every device.
    pub fn is_role_eligible<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        match &self.require_role {
            Some(required) => roles.iter().any(|r| r.as_ref() == required),
            None => true,
        }
    }

    pub fn capability(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.capabilities.iter().find(|c| c.capability_name == name)
    }
}

/// Key used to look a JSON value up in a value mapping.
///
/// Strings map to themselves; every other value uses its JSON rendering
/// (`true`, `45`, `null`).
pub fn canonical_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
