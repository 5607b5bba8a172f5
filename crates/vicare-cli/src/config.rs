//! Bridge configuration.
//!
//! Sources, highest priority first:
//! 1. Environment variables (`VICARE_ACCESS_TOKEN`, `VICARE_API_URL`, `VICARE_POLL_FLOOR_SECS`)
//! 2. The TOML file (`--config`, `VICARE_CONFIG`, or `config.toml`)
//! 3. Built-in defaults

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use vicare_core::config::{endpoints, env_vars, normalize_api_url, polling};
use vicare_devices::{DeviceAddress, FailurePolicy, SessionConfig, ViessmannClientConfig};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub base_url: String,
    pub access_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: endpoints::VIESSMANN_API.to_string(),
            access_token: None,
            timeout_secs: polling::DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingSection {
    /// Per-device poll floor; the effective interval is this times the
    /// device count.
    pub floor_secs: u64,
    pub unavailable_after: u32,
    pub backoff_after: u32,
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            floor_secs: polling::DEFAULT_POLL_FLOOR_SECS,
            unavailable_after: polling::UNAVAILABLE_AFTER_FAILURES,
            backoff_after: polling::BACKOFF_AFTER_FAILURES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// `redb` or `memory`.
    pub backend: String,
    pub path: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: "redb".to_string(),
            path: "data/vicare.redb".to_string(),
        }
    }
}

/// A device to run without pairing discovery.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    pub id: Option<String>,
    pub installation_id: i64,
    pub gateway_serial: String,
    #[serde(default = "default_device_id")]
    pub device_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Features enabled up front. Empty means ask the API at startup.
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub path_overrides: BTreeMap<String, String>,
}

fn default_device_id() -> String {
    "0".to_string()
}

impl DeviceEntry {
    pub fn address(&self) -> DeviceAddress {
        DeviceAddress::new(self.installation_id, &self.gateway_serial, &self.device_id)
    }

    pub fn session_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| {
            format!(
                "{}-{}-{}",
                self.installation_id, self.gateway_serial, self.device_id
            )
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub api: ApiSection,
    pub polling: PollingSection,
    pub storage: StorageSection,
    pub devices: Vec<DeviceEntry>,
}

impl BridgeConfig {
    /// Load from `path` if given, else from `VICARE_CONFIG` or `config.toml`
    /// when present, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(env_vars::CONFIG_PATH).ok().map(Into::into));

        let mut config = match explicit {
            Some(path) => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                info!(category = "config", path = %path.display(), "Loading config");
                Self::parse(&content)?
            }
            None => match std::fs::read_to_string("config.toml") {
                Ok(content) => {
                    info!(category = "config", "Loading config from: config.toml");
                    Self::parse(&content)?
                }
                Err(_) => {
                    info!(category = "config", "Loading config from environment variables");
                    Self::default()
                }
            },
        };

        config.apply_env();
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: BridgeConfig = toml::from_str(content).context("Invalid config file")?;
        config.api.base_url = normalize_api_url(config.api.base_url);
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var(env_vars::ACCESS_TOKEN) {
            self.api.access_token = Some(token);
        }
        if std::env::var(env_vars::API_URL).is_ok() {
            self.api.base_url = normalize_api_url(env_vars::api_url());
        }
        if std::env::var(env_vars::POLL_FLOOR_SECS).is_ok() {
            self.polling.floor_secs = env_vars::poll_floor_secs();
        }
    }

    pub fn client_config(&self) -> Result<ViessmannClientConfig> {
        let token = self
            .api
            .access_token
            .clone()
            .filter(|t| !t.is_empty())
            .with_context(|| {
                format!(
                    "No access token configured. Set [api].access_token or {}",
                    env_vars::ACCESS_TOKEN
                )
            })?;
        Ok(ViessmannClientConfig::new(token)
            .with_base_url(&self.api.base_url)
            .with_timeout(Duration::from_secs(self.api.timeout_secs.max(1))))
    }

    pub fn poll_floor(&self) -> Duration {
        Duration::from_secs(self.polling.floor_secs.max(1))
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy {
            unavailable_after: self.polling.unavailable_after.max(1),
            backoff_after: self.polling.backoff_after.max(1),
        }
    }

    pub fn storage_config(&self) -> serde_json::Value {
        serde_json::json!({ "path": self.storage.path })
    }

    /// Session settings for a configured device.
    pub fn session_config(&self, entry: &DeviceEntry) -> SessionConfig {
        let mut config = SessionConfig::new(entry.session_id(), entry.address())
            .with_roles(entry.roles.iter().cloned())
            .with_features(entry.features.iter().cloned())
            .with_failure_policy(self.failure_policy());
        for (from, to) in &entry.path_overrides {
            config = config.with_path_override(from, to);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[api]
base_url = "http://localhost:8080/iot/v2/"
access_token = "abc"

[polling]
floor_secs = 60

[storage]
backend = "memory"

[[devices]]
installation_id = 12345
gateway_serial = "7571381573112225"
roles = ["type:heatpump"]
features = ["heating.dhw.temperature.main"]
path_overrides = { "circuits.0" = "circuits.1" }
"#;

    #[test]
    fn test_parse_sample() {
        let config = BridgeConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.api.base_url, "http://localhost:8080/iot/v2");
        assert_eq!(config.api.timeout_secs, polling::DEFAULT_REQUEST_TIMEOUT_SECS);
        assert_eq!(config.poll_floor(), Duration::from_secs(60));
        assert_eq!(config.polling.unavailable_after, 3);
        assert_eq!(config.storage.backend, "memory");

        let device = &config.devices[0];
        assert_eq!(device.device_id, "0");
        assert_eq!(device.session_id(), "12345-7571381573112225-0");

        let session = config.session_config(device);
        assert_eq!(session.roles, vec!["type:heatpump"]);
        assert_eq!(session.path_overrides["circuits.0"], "circuits.1");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = BridgeConfig::parse("").unwrap();
        assert_eq!(config.api.base_url, endpoints::VIESSMANN_API);
        assert_eq!(config.polling.floor_secs, polling::DEFAULT_POLL_FLOOR_SECS);
        assert_eq!(config.storage.backend, "redb");
        assert!(config.devices.is_empty());
        assert!(config.client_config().is_err());
    }
}
