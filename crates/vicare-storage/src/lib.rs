//! Storage layer for the ViCare bridge.
//!
//! - [`backends`]: the [`StorageBackend`] trait with memory and redb implementations
//! - [`device_store`]: per-device scoped state with schema upgrades

pub mod backends;
pub mod device_store;
pub mod error;

pub use backends::{MemoryBackend, StorageBackend, create_backend};
#[cfg(feature = "redb")]
pub use backends::{RedbBackend, RedbBackendConfig};
pub use device_store::{
    CURRENT_SCHEMA_VERSION, DeviceStateStore, PathConstraints, PersistedDeviceState,
};
pub use error::{Result, StorageError};
