//! Viessmann IoT API client.
//!
//! ## Configuration
//!
//! ```toml
//! [api]
//! base_url = "https://api.viessmann.com/iot/v2"
//! access_token = "..."
//! timeout_secs = 30
//! ```
//!
//! Every response wraps its payload in `{ "data": ... }`. The token is
//! swapped in place by [`ViessmannClient::set_access_token`] so a refresh
//! does not need a new client.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};
use vicare_core::config::{endpoints, normalize_api_url, polling};

use crate::error::{RemoteError, RemoteResult};
use crate::remote::{Device, DeviceAddress, FeatureRecord, Gateway, Installation, RemoteClient};

/// Client settings.
#[derive(Debug, Clone)]
pub struct ViessmannClientConfig {
    pub base_url: String,
    pub access_token: String,
    pub timeout: Duration,
}

impl ViessmannClientConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            base_url: endpoints::VIESSMANN_API.to_string(),
            access_token: access_token.into(),
            timeout: Duration::from_secs(polling::DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = normalize_api_url(url);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// [`RemoteClient`] over the vendor's REST API.
pub struct ViessmannClient {
    client: Client,
    base_url: String,
    token: Arc<RwLock<String>>,
}

impl ViessmannClient {
    pub fn new(config: ViessmannClientConfig) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RemoteError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: normalize_api_url(config.base_url),
            token: Arc::new(RwLock::new(config.access_token)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replace the bearer token used by subsequent requests.
    pub async fn set_access_token(&self, token: impl Into<String>) {
        *self.token.write().await = token.into();
        debug!(category = "remote", "Access token replaced");
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self.token.read().await;
        request.bearer_auth(token.as_str())
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> RemoteResult<T> {
        let response = self
            .authorized(request)
            .await
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let response = check_status(response).await?;
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(envelope.data)
    }
}

async fn check_status(response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });
    warn!(category = "remote", status = status.as_u16(), message = %message, "API request failed");
    Err(RemoteError::from_status(status.as_u16(), message))
}

/// `message` field of an API error body.
fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

fn devices_path(installation_id: i64, gateway_serial: &str) -> String {
    format!(
        "/equipment/installations/{}/gateways/{}/devices",
        installation_id, gateway_serial
    )
}

fn features_path(address: &DeviceAddress) -> String {
    format!(
        "/features/installations/{}/gateways/{}/devices/{}/features",
        address.installation_id, address.gateway_serial, address.device_id
    )
}

fn command_path(address: &DeviceAddress, feature: &str, command: &str) -> String {
    format!("{}/{}/commands/{}", features_path(address), feature, command)
}

#[async_trait]
impl RemoteClient for ViessmannClient {
    async fn get_installations(&self) -> RemoteResult<Vec<Installation>> {
        self.send(self.client.get(self.url("/equipment/installations")))
            .await
    }

    async fn get_gateways(&self) -> RemoteResult<Vec<Gateway>> {
        self.send(self.client.get(self.url("/equipment/gateways")))
            .await
    }

    async fn get_devices(
        &self,
        installation_id: i64,
        gateway_serial: &str,
    ) -> RemoteResult<Vec<Device>> {
        let url = self.url(&devices_path(installation_id, gateway_serial));
        self.send(self.client.get(url)).await
    }

    async fn get_features(
        &self,
        address: &DeviceAddress,
        filter: Option<&[String]>,
    ) -> RemoteResult<Vec<FeatureRecord>> {
        let mut request = self.client.get(self.url(&features_path(address)));
        if let Some(paths) = filter.filter(|p| !p.is_empty()) {
            request = request.query(&[("filter", paths.join(","))]);
        }
        let records: Vec<FeatureRecord> = self.send(request).await?;
        trace!(category = "remote", device = %address, count = records.len(), "Fetched features");
        Ok(records)
    }

    async fn get_feature(
        &self,
        address: &DeviceAddress,
        feature: &str,
    ) -> RemoteResult<FeatureRecord> {
        let url = self.url(&format!("{}/{}", features_path(address), feature));
        self.send(self.client.get(url)).await
    }

    async fn execute_command(
        &self,
        address: &DeviceAddress,
        feature: &str,
        command: &str,
        body: Value,
    ) -> RemoteResult<Value> {
        let url = self.url(&command_path(address, feature, command));
        let request = self.client.post(url).json(&body);
        let response = self
            .authorized(request)
            .await
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let response = check_status(response).await?;
        // Command responses carry `{ "data": { "success": true, ... } }` or nothing.
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        let value: Value =
            serde_json::from_str(&text).map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(value.get("data").cloned().unwrap_or(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn address() -> DeviceAddress {
        DeviceAddress::new(12345, "7571381573112225", "0")
    }

    #[test]
    fn test_paths() {
        assert_eq!(
            devices_path(12345, "7571381573112225"),
            "/equipment/installations/12345/gateways/7571381573112225/devices"
        );
        assert_eq!(
            command_path(&address(), "heating.dhw.oneTimeCharge", "activate"),
            "/features/installations/12345/gateways/7571381573112225/devices/0/features/heating.dhw.oneTimeCharge/commands/activate"
        );
    }

    #[test]
    fn test_base_url_normalized() {
        let client = ViessmannClient::new(
            ViessmannClientConfig::new("token").with_base_url("http://localhost:8080/iot/v2/ "),
        )
        .unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080/iot/v2");
        assert_eq!(
            client.url("/equipment/gateways"),
            "http://localhost:8080/iot/v2/equipment/gateways"
        );
    }

    #[test]
    fn test_error_message_extraction() {
        let body = json!({
            "viErrorId": "abc",
            "statusCode": 429,
            "errorType": "RATE_LIMIT_EXCEEDED",
            "message": "API calls rate limit has been exceeded."
        })
        .to_string();
        assert_eq!(
            error_message(&body).as_deref(),
            Some("API calls rate limit has been exceeded.")
        );
        assert_eq!(error_message("<html>"), None);
    }

    #[test]
    fn test_envelope_decodes_gateways() {
        let envelope: Envelope<Vec<Gateway>> = serde_json::from_value(json!({
            "data": [{ "serial": "7571381573112225", "installationId": 12345, "gatewayType": "VitoconnectOptolink" }]
        }))
        .unwrap();
        assert_eq!(envelope.data[0].installation_id, 12345);
    }

    #[tokio::test]
    async fn test_token_swap() {
        let client = ViessmannClient::new(ViessmannClientConfig::new("old")).unwrap();
        client.set_access_token("new").await;
        assert_eq!(*client.token.read().await, "new");
    }
}
