//! Pairing: enumerate the account's devices and their initial features.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};
use vicare_storage::PathConstraints;

use crate::error::RemoteResult;
use crate::remote::{DeviceAddress, RemoteClient};
use crate::table::CapabilityTable;

/// A device offered for pairing.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredDevice {
    pub name: String,
    pub address: DeviceAddress,
    pub roles: Vec<String>,
    pub device_type: Option<String>,
    pub model_id: Option<String>,
}

impl DiscoveredDevice {
    /// Stable id used as the session and storage key.
    pub fn device_id(&self) -> String {
        format!(
            "{}-{}-{}",
            self.address.installation_id, self.address.gateway_serial, self.address.device_id
        )
    }
}

/// Walk installations, then their gateways, then the devices behind each.
pub async fn discover_devices(remote: &dyn RemoteClient) -> RemoteResult<Vec<DiscoveredDevice>> {
    let installations = remote.get_installations().await?;
    let gateways = remote.get_gateways().await?;
    let mut found = Vec::new();

    for installation in &installations {
        for gateway in gateways
            .iter()
            .filter(|g| g.installation_id == installation.id)
        {
            let devices = remote.get_devices(installation.id, &gateway.serial).await?;
            debug!(
                category = "pairing",
                installation_id = installation.id,
                gateway = %gateway.serial,
                devices = devices.len(),
                "Listed gateway devices"
            );
            for device in devices {
                let name = match (&device.model_id, &installation.description) {
                    (Some(model), Some(desc)) => format!("{} ({})", model, desc),
                    (Some(model), None) => model.clone(),
                    (None, _) => format!("Device {}", device.id),
                };
                found.push(DiscoveredDevice {
                    name,
                    address: DeviceAddress::new(installation.id, &gateway.serial, &device.id),
                    roles: device.roles,
                    device_type: device.device_type,
                    model_id: device.model_id,
                });
            }
        }
    }

    info!(category = "pairing", count = found.len(), "Discovered devices");
    Ok(found)
}

/// Features a device reports as active at pairing time, with the
/// constraints of the ones the table models.
pub async fn initial_features(
    remote: &dyn RemoteClient,
    address: &DeviceAddress,
    table: &CapabilityTable,
) -> RemoteResult<(BTreeSet<String>, BTreeMap<String, PathConstraints>)> {
    let records = remote.get_features(address, None).await?;
    let mut features = BTreeSet::new();
    let mut constraints = BTreeMap::new();

    for record in records.iter().filter(|r| r.is_active()) {
        features.insert(record.feature.clone());
        if table.contains(&record.feature) {
            let c = record.constraints();
            if !c.is_empty() {
                constraints.insert(record.feature.clone(), c);
            }
        }
    }
    Ok((features, constraints))
}
