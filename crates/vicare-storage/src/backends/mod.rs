//! Storage backend implementations.
//!
//! Every backend stores opaque bytes under `(table, key)` pairs. The redb
//! backend is feature-gated; the memory backend is always available.

use serde_json::Value;
use std::sync::Arc;

use crate::error::{Result, StorageError};

pub mod memory;

#[cfg(feature = "redb")]
pub mod redb;

pub use memory::MemoryBackend;

#[cfg(feature = "redb")]
pub use redb::{RedbBackend, RedbBackendConfig};

/// Core storage backend trait.
pub trait StorageBackend: Send + Sync {
    /// Write a value to a key in the specified table.
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Read a value by key from the specified table.
    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a key from the specified table.
    fn delete(&self, table: &str, key: &str) -> Result<bool>;

    /// Scan keys with a given prefix in the specified table.
    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Batch write multiple values to the specified table.
    fn write_batch(&self, table: &str, items: Vec<(String, Vec<u8>)>) -> Result<()>;

    /// Check if this backend supports persistent storage.
    fn is_persistent(&self) -> bool;
}

/// Create a storage backend by type identifier.
///
/// # Example
/// ```no_run
/// use vicare_storage::backends::create_backend;
/// use serde_json::json;
///
/// let backend = create_backend("redb", &json!({ "path": "./data/vicare.redb" })).unwrap();
/// assert!(backend.is_persistent());
/// ```
pub fn create_backend(backend_type: &str, config: &Value) -> Result<Arc<dyn StorageBackend>> {
    match backend_type {
        #[cfg(feature = "redb")]
        "redb" => {
            let cfg: RedbBackendConfig = serde_json::from_value(config.clone()).map_err(|e| {
                StorageError::Configuration(format!("Invalid redb config: {}", e))
            })?;
            Ok(Arc::new(RedbBackend::new(cfg)?))
        }
        "memory" => Ok(Arc::new(MemoryBackend::new())),
        other => Err(StorageError::Configuration(format!(
            "Unknown storage backend: {}",
            other
        ))),
    }
}

/// Create a namespaced key for single-table backends.
pub(crate) fn make_key(table: &str, key: &str) -> String {
    let mut result = String::with_capacity(table.len() + key.len() + 1);
    result.push_str(table);
    result.push(':');
    result.push_str(key);
    result
}
