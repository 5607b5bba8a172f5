//! Remote client interface and the vendor API's data shapes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use vicare_storage::PathConstraints;

use crate::error::RemoteResult;

/// Installation as returned by `/equipment/installations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Installation {
    pub id: i64,
    #[serde(default)]
    pub description: Option<String>,
}

/// Gateway as returned by `/equipment/gateways`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gateway {
    pub serial: String,
    pub installation_id: i64,
    #[serde(default)]
    pub gateway_type: Option<String>,
}

/// Device behind a gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub gateway_serial: Option<String>,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Identifies one device across the three-level API hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress {
    pub installation_id: i64,
    pub gateway_serial: String,
    pub device_id: String,
}

impl DeviceAddress {
    pub fn new(
        installation_id: i64,
        gateway_serial: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            installation_id,
            gateway_serial: gateway_serial.into(),
            device_id: device_id.into(),
        }
    }
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.installation_id, self.gateway_serial, self.device_id
        )
    }
}

/// State of one remote feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRecord {
    pub feature: String,
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub commands: Map<String, Value>,
}

impl FeatureRecord {
    pub fn new(feature: impl Into<String>, is_enabled: bool, properties: Value) -> Self {
        Self {
            feature: feature.into(),
            is_enabled,
            properties: match properties {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            commands: Map::new(),
        }
    }

    pub fn with_commands(mut self, commands: Value) -> Self {
        if let Value::Object(map) = commands {
            self.commands = map;
        }
        self
    }

    pub fn has_properties(&self) -> bool {
        !self.properties.is_empty()
    }

    /// `properties.status.value == "disconnected"`.
    pub fn is_disconnected(&self) -> bool {
        self.properties
            .get("status")
            .and_then(|s| s.get("value"))
            .and_then(Value::as_str)
            == Some("disconnected")
    }

    /// Enabled and not reporting a disconnected sensor.
    pub fn is_active(&self) -> bool {
        self.is_enabled && !self.is_disconnected()
    }

    /// Limits declared by the feature's command parameters.
    ///
    /// Reads `commands.*.params.*.constraints`; the first numeric bound of
    /// each kind wins and every `enum` list is merged.
    pub fn constraints(&self) -> PathConstraints {
        let mut out = PathConstraints::default();
        let params = self
            .commands
            .values()
            .filter_map(|cmd| cmd.get("params").and_then(Value::as_object))
            .flat_map(|params| params.values());

        for param in params {
            let Some(c) = param.get("constraints") else {
                continue;
            };
            if out.min.is_none() {
                out.min = c.get("min").and_then(Value::as_f64);
            }
            if out.max.is_none() {
                out.max = c.get("max").and_then(Value::as_f64);
            }
            if out.stepping.is_none() {
                out.stepping = c.get("stepping").and_then(Value::as_f64);
            }
            if let Some(values) = c.get("enum").and_then(Value::as_array) {
                for v in values.iter().filter_map(Value::as_str) {
                    if !out.enum_values.iter().any(|e| e == v) {
                        out.enum_values.push(v.to_string());
                    }
                }
            }
        }
        out
    }
}

/// Vendor cloud API.
///
/// Token acquisition and refresh sit behind the implementation.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn get_installations(&self) -> RemoteResult<Vec<Installation>>;

    async fn get_gateways(&self) -> RemoteResult<Vec<Gateway>>;

    async fn get_devices(
        &self,
        installation_id: i64,
        gateway_serial: &str,
    ) -> RemoteResult<Vec<Device>>;

    /// Feature states of a device, optionally limited to `filter` paths.
    async fn get_features(
        &self,
        address: &DeviceAddress,
        filter: Option<&[String]>,
    ) -> RemoteResult<Vec<FeatureRecord>>;

    async fn get_feature(&self, address: &DeviceAddress, feature: &str)
    -> RemoteResult<FeatureRecord>;

    /// POST `body` to `features/<feature>/commands/<command>`.
    async fn execute_command(
        &self,
        address: &DeviceAddress,
        feature: &str,
        command: &str,
        body: Value,
    ) -> RemoteResult<Value>;
}
