//! Per-device scoped state store.
//!
//! Each device gets its own key space (`device:<id>`) on a shared
//! [`StorageBackend`]. Values are JSON encoded. The layout is versioned:
//! [`DeviceStateStore::upgrade`] walks a device forward through every
//! migration it has not seen yet, and is safe to call on every start.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::backends::{MemoryBackend, StorageBackend};
use crate::error::{Result, StorageError};

/// Current persisted layout version.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

pub const KEY_SCHEMA_VERSION: &str = "schema_version";
pub const KEY_ROLES: &str = "roles";
pub const KEY_ENABLED_FEATURES: &str = "enabled_features";
pub const KEY_CONSTRAINTS: &str = "constraints";
pub const KEY_PATH_OVERRIDES: &str = "path_overrides";

/// Enabled feature list as written by the first layout.
const LEGACY_KEY_FEATURES: &str = "features";

/// Device-reported limits of one feature's command parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stepping: Option<f64>,
    /// Accepted values of an enum parameter (operating modes).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
}

impl PathConstraints {
    pub fn is_empty(&self) -> bool {
        self.min.is_none()
            && self.max.is_none()
            && self.stepping.is_none()
            && self.enum_values.is_empty()
    }
}

/// Everything a device session persists between restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedDeviceState {
    pub schema_version: u32,
    pub roles: Vec<String>,
    pub enabled_features: BTreeSet<String>,
    pub constraints: BTreeMap<String, PathConstraints>,
    /// Path segment substitutions, e.g. `circuits.0` -> `circuits.1`.
    pub path_overrides: BTreeMap<String, String>,
}

impl Default for PersistedDeviceState {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            roles: Vec::new(),
            enabled_features: BTreeSet::new(),
            constraints: BTreeMap::new(),
            path_overrides: BTreeMap::new(),
        }
    }
}

type Migration = fn(&DeviceStateStore, &str) -> Result<()>;

/// Migrations indexed by the version they produce.
const MIGRATIONS: &[(u32, Migration)] = &[(1, migrate_v1), (2, migrate_v2)];

/// v1: `features` renamed to `enabled_features`, `roles` always present.
fn migrate_v1(store: &DeviceStateStore, device_id: &str) -> Result<()> {
    if let Some(features) = store.get::<Vec<String>>(device_id, LEGACY_KEY_FEATURES)? {
        if store
            .get::<Vec<String>>(device_id, KEY_ENABLED_FEATURES)?
            .is_none()
        {
            store.set(device_id, KEY_ENABLED_FEATURES, &features)?;
        }
        store.unset(device_id, LEGACY_KEY_FEATURES)?;
    }
    if store.get::<Vec<String>>(device_id, KEY_ROLES)?.is_none() {
        store.set(device_id, KEY_ROLES, &Vec::<String>::new())?;
    }
    Ok(())
}

/// v2: constraints and path overrides introduced.
fn migrate_v2(store: &DeviceStateStore, device_id: &str) -> Result<()> {
    if store
        .get::<BTreeMap<String, PathConstraints>>(device_id, KEY_CONSTRAINTS)?
        .is_none()
    {
        store.set(
            device_id,
            KEY_CONSTRAINTS,
            &BTreeMap::<String, PathConstraints>::new(),
        )?;
    }
    if store
        .get::<BTreeMap<String, String>>(device_id, KEY_PATH_OVERRIDES)?
        .is_none()
    {
        store.set(
            device_id,
            KEY_PATH_OVERRIDES,
            &BTreeMap::<String, String>::new(),
        )?;
    }
    Ok(())
}

/// Scoped key-value store for device runtime state.
#[derive(Clone)]
pub struct DeviceStateStore {
    backend: Arc<dyn StorageBackend>,
}

impl DeviceStateStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Volatile store, for tests and headless runs.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn is_persistent(&self) -> bool {
        self.backend.is_persistent()
    }

    fn table(device_id: &str) -> String {
        format!("device:{}", device_id)
    }

    /// Read one key of a device.
    pub fn get<T: DeserializeOwned>(&self, device_id: &str, key: &str) -> Result<Option<T>> {
        match self.backend.read(&Self::table(device_id), key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Write one key of a device.
    pub fn set<T: Serialize + ?Sized>(&self, device_id: &str, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.backend.write(&Self::table(device_id), key, &bytes)
    }

    /// Remove one key of a device. Returns whether it existed.
    pub fn unset(&self, device_id: &str, key: &str) -> Result<bool> {
        self.backend.delete(&Self::table(device_id), key)
    }

    /// Stored layout version; a device without one predates versioning.
    pub fn schema_version(&self, device_id: &str) -> Result<u32> {
        Ok(self.get(device_id, KEY_SCHEMA_VERSION)?.unwrap_or(0))
    }

    /// Bring a device's layout up to [`CURRENT_SCHEMA_VERSION`].
    ///
    /// Each migration runs at most once and the version only moves forward.
    /// Returns the version the device ended at.
    pub fn upgrade(&self, device_id: &str) -> Result<u32> {
        let mut version = self.schema_version(device_id)?;
        if version > CURRENT_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchema {
                found: version,
                supported: CURRENT_SCHEMA_VERSION,
            });
        }

        for (target, migrate) in MIGRATIONS {
            if *target <= version {
                continue;
            }
            migrate(self, device_id)?;
            self.set(device_id, KEY_SCHEMA_VERSION, target)?;
            tracing::info!(
                category = "storage",
                device_id = %device_id,
                from = version,
                to = *target,
                "Upgraded device state schema"
            );
            version = *target;
        }

        Ok(version)
    }

    /// Load a device's state. Missing keys fall back to defaults.
    pub fn load(&self, device_id: &str) -> Result<PersistedDeviceState> {
        Ok(PersistedDeviceState {
            schema_version: self.schema_version(device_id)?,
            roles: self.get(device_id, KEY_ROLES)?.unwrap_or_default(),
            enabled_features: self
                .get(device_id, KEY_ENABLED_FEATURES)?
                .unwrap_or_default(),
            constraints: self.get(device_id, KEY_CONSTRAINTS)?.unwrap_or_default(),
            path_overrides: self.get(device_id, KEY_PATH_OVERRIDES)?.unwrap_or_default(),
        })
    }

    /// Persist a device's state in one batch.
    pub fn save(&self, device_id: &str, state: &PersistedDeviceState) -> Result<()> {
        let items = vec![
            (
                KEY_SCHEMA_VERSION.to_string(),
                serde_json::to_vec(&state.schema_version)?,
            ),
            (KEY_ROLES.to_string(), serde_json::to_vec(&state.roles)?),
            (
                KEY_ENABLED_FEATURES.to_string(),
                serde_json::to_vec(&state.enabled_features)?,
            ),
            (
                KEY_CONSTRAINTS.to_string(),
                serde_json::to_vec(&state.constraints)?,
            ),
            (
                KEY_PATH_OVERRIDES.to_string(),
                serde_json::to_vec(&state.path_overrides)?,
            ),
        ];
        self.backend.write_batch(&Self::table(device_id), items)
    }

    /// Delete every key of a device. Returns the number removed.
    pub fn remove_device(&self, device_id: &str) -> Result<usize> {
        let table = Self::table(device_id);
        let mut removed = 0;
        for (key, _) in self.backend.scan(&table, "")? {
            if self.backend.delete(&table, &key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
