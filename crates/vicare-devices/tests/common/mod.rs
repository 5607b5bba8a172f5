//! Shared test doubles.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use vicare_devices::{
    CapabilityTable, Device, DeviceAddress, DeviceSession, FeatureRecord, Gateway, Installation,
    MemoryDeviceHost, RemoteClient, RemoteError, RemoteResult, SessionConfig, paths,
};
use vicare_storage::DeviceStateStore;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCommand {
    pub feature: String,
    pub command: String,
    pub body: Value,
}

#[derive(Default)]
struct MockState {
    features: Vec<FeatureRecord>,
    /// Errors returned by the next fetches, in order.
    queued_fetch_errors: VecDeque<RemoteError>,
    /// Returned by every fetch while set.
    fetch_error: Option<RemoteError>,
    command_error: Option<RemoteError>,
    fetch_delay: Option<Duration>,
    commands: Vec<RecordedCommand>,
    fetches: Vec<Instant>,
    filters: Vec<Option<Vec<String>>>,
    installations: Vec<Installation>,
    gateways: Vec<Gateway>,
    devices: HashMap<(i64, String), Vec<Device>>,
}

/// In-memory vendor API recording every call.
#[derive(Default)]
pub struct MockRemote {
    state: RwLock<MockState>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_features(&self, features: Vec<FeatureRecord>) {
        self.state.write().await.features = features;
    }

    pub async fn queue_fetch_error(&self, error: RemoteError) {
        self.state.write().await.queued_fetch_errors.push_back(error);
    }

    pub async fn fail_fetches(&self, error: Option<RemoteError>) {
        self.state.write().await.fetch_error = error;
    }

    pub async fn fail_commands(&self, error: Option<RemoteError>) {
        self.state.write().await.command_error = error;
    }

    pub async fn delay_fetches(&self, delay: Duration) {
        self.state.write().await.fetch_delay = Some(delay);
    }

    pub async fn commands(&self) -> Vec<RecordedCommand> {
        self.state.read().await.commands.clone()
    }

    pub async fn fetch_times(&self) -> Vec<Instant> {
        self.state.read().await.fetches.clone()
    }

    pub async fn fetch_count(&self) -> usize {
        self.state.read().await.fetches.len()
    }

    pub async fn last_filter(&self) -> Option<Vec<String>> {
        self.state.read().await.filters.last().cloned().flatten()
    }

    pub async fn add_installation(&self, installation: Installation) {
        self.state.write().await.installations.push(installation);
    }

    pub async fn add_gateway(&self, gateway: Gateway) {
        self.state.write().await.gateways.push(gateway);
    }

    pub async fn add_device(&self, installation_id: i64, serial: &str, device: Device) {
        self.state
            .write()
            .await
            .devices
            .entry((installation_id, serial.to_string()))
            .or_default()
            .push(device);
    }
}

#[async_trait]
impl RemoteClient for MockRemote {
    async fn get_installations(&self) -> RemoteResult<Vec<Installation>> {
        Ok(self.state.read().await.installations.clone())
    }

    async fn get_gateways(&self) -> RemoteResult<Vec<Gateway>> {
        Ok(self.state.read().await.gateways.clone())
    }

    async fn get_devices(
        &self,
        installation_id: i64,
        gateway_serial: &str,
    ) -> RemoteResult<Vec<Device>> {
        Ok(self
            .state
            .read()
            .await
            .devices
            .get(&(installation_id, gateway_serial.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_features(
        &self,
        _address: &DeviceAddress,
        filter: Option<&[String]>,
    ) -> RemoteResult<Vec<FeatureRecord>> {
        let delay = {
            let mut state = self.state.write().await;
            state.fetches.push(Instant::now());
            state.filters.push(filter.map(|f| f.to_vec()));
            state.fetch_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        if let Some(error) = state.queued_fetch_errors.pop_front() {
            return Err(error);
        }
        if let Some(error) = &state.fetch_error {
            return Err(error.clone());
        }
        let features = state.features.clone();
        Ok(match filter {
            Some(paths) => features
                .into_iter()
                .filter(|r| paths.contains(&r.feature))
                .collect(),
            None => features,
        })
    }

    async fn get_feature(
        &self,
        _address: &DeviceAddress,
        feature: &str,
    ) -> RemoteResult<FeatureRecord> {
        self.state
            .read()
            .await
            .features
            .iter()
            .find(|r| r.feature == feature)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(feature.to_string()))
    }

    async fn execute_command(
        &self,
        _address: &DeviceAddress,
        feature: &str,
        command: &str,
        body: Value,
    ) -> RemoteResult<Value> {
        let mut state = self.state.write().await;
        state.commands.push(RecordedCommand {
            feature: feature.to_string(),
            command: command.to_string(),
            body,
        });
        match &state.command_error {
            Some(error) => Err(error.clone()),
            None => Ok(json!({ "success": true })),
        }
    }
}

pub fn address() -> DeviceAddress {
    DeviceAddress::new(12345, "7571381573112225", "0")
}

pub fn record(path: &str, properties: Value) -> FeatureRecord {
    FeatureRecord::new(path, true, properties)
}

pub fn value_record(path: &str, value: Value) -> FeatureRecord {
    record(path, json!({ "value": { "type": "number", "value": value } }))
}

/// A heat pump reporting hot water, outside temperature and its compressor.
pub fn heatpump_features() -> Vec<FeatureRecord> {
    vec![
        value_record(paths::HOT_WATER_TEMP, json!(45.0)),
        value_record(paths::OUTSIDE_TEMP, json!(3.5)),
        record(paths::COMPRESSOR, json!({ "active": { "type": "boolean", "value": true } })),
        record(
            paths::HEATING_CIRCUIT_0_MODE,
            json!({ "value": { "type": "string", "value": "dhwAndHeating" } }),
        ),
    ]
}

pub struct Harness {
    pub remote: Arc<MockRemote>,
    pub host: Arc<MemoryDeviceHost>,
    pub session: Arc<DeviceSession>,
}

pub fn harness_with(
    config: SessionConfig,
    store: DeviceStateStore,
    host: Arc<MemoryDeviceHost>,
) -> Harness {
    let remote = Arc::new(MockRemote::new());
    let session = DeviceSession::new(
        config,
        CapabilityTable::viessmann(),
        host.clone(),
        remote.clone(),
        store,
    );
    Harness {
        remote,
        host,
        session: Arc::new(session),
    }
}

pub fn harness(roles: &[&str], features: &[&str]) -> Harness {
    harness_for("heatpump-1", roles, features)
}

pub fn harness_for(device_id: &str, roles: &[&str], features: &[&str]) -> Harness {
    let config = SessionConfig::new(device_id, address())
        .with_roles(roles.iter().copied())
        .with_features(features.iter().copied());
    harness_with(
        config,
        DeviceStateStore::memory(),
        Arc::new(MemoryDeviceHost::new()),
    )
}
