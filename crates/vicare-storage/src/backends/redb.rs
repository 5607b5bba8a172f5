//! Redb storage backend.
//!
//! Persists device state in a single redb table using `table:key` namespaced
//! keys, with a write-through LRU cache in front of reads.

use lru::LruCache;
use redb::{Database, TableDefinition};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{StorageBackend, make_key};
use crate::error::{Result, StorageError};

const UNIFIED_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("vicare_state");

const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Configuration for RedbBackend.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct RedbBackendConfig {
    /// Path to the database file, or `:memory:` for a throwaway file.
    pub path: String,

    /// Create parent directories if they don't exist.
    #[serde(default = "default_create_dirs")]
    pub create_dirs: bool,

    /// LRU cache capacity (number of entries).
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_create_dirs() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

impl RedbBackendConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            create_dirs: true,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    pub fn with_create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn memory() -> Self {
        Self {
            path: ":memory:".to_string(),
            create_dirs: false,
            cache_capacity: 64,
        }
    }
}

fn backend_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(e.to_string())
}

type StateTable<'txn> = redb::Table<'txn, &'static str, &'static [u8]>;

/// redb-based persistent storage backend.
pub struct RedbBackend {
    db: Database,
    path: String,
    /// Backing file of a `:memory:` database, removed on drop.
    scratch_file: Option<PathBuf>,
    cache: Mutex<LruCache<String, Vec<u8>>>,
}

impl RedbBackend {
    pub fn new(config: RedbBackendConfig) -> Result<Self> {
        let scratch_file = (config.path == ":memory:").then(|| {
            // redb has no in-memory mode
            std::env::temp_dir().join(format!("vicare_{}.redb", uuid::Uuid::new_v4()))
        });
        let file = match &scratch_file {
            Some(scratch) => scratch.clone(),
            None => PathBuf::from(&config.path),
        };

        if config.create_dirs && scratch_file.is_none() {
            if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(&file).map_err(backend_err)?;

        let capacity = NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        let backend = Self {
            db,
            path: config.path,
            scratch_file,
            cache: Mutex::new(LruCache::new(capacity)),
        };
        // Read transactions fail on a file that never saw the table
        backend.update(|_| Ok(()))?;

        tracing::debug!(
            category = "storage",
            path = %backend.path,
            cache_capacity = capacity.get(),
            "Opened redb backend"
        );
        Ok(backend)
    }

    /// Open or create a redb backend at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(RedbBackendConfig::new(path.as_ref().to_string_lossy()))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Run `f` against the state table inside one committed write transaction.
    fn update<T>(&self, f: impl FnOnce(&mut StateTable<'_>) -> Result<T>) -> Result<T> {
        let txn = self.db.begin_write().map_err(backend_err)?;
        let out = {
            let mut table = txn.open_table(UNIFIED_TABLE).map_err(backend_err)?;
            f(&mut table)?
        };
        txn.commit().map_err(backend_err)?;
        Ok(out)
    }

    fn with_cache(&self, f: impl FnOnce(&mut LruCache<String, Vec<u8>>)) {
        if let Ok(mut cache) = self.cache.lock() {
            f(&mut cache);
        }
    }
}

impl StorageBackend for RedbBackend {
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        let full = make_key(table, key);
        self.update(|t| {
            t.insert(full.as_str(), value).map_err(backend_err)?;
            Ok(())
        })?;
        self.with_cache(|cache| {
            cache.put(full, value.to_vec());
        });
        Ok(())
    }

    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let full = make_key(table, key);

        let mut hit = None;
        self.with_cache(|cache| hit = cache.get(&full).cloned());
        if hit.is_some() {
            return Ok(hit);
        }

        let txn = self.db.begin_read().map_err(backend_err)?;
        let t = txn.open_table(UNIFIED_TABLE).map_err(backend_err)?;
        let Some(stored) = t.get(full.as_str()).map_err(backend_err)? else {
            return Ok(None);
        };
        let bytes = stored.value().to_vec();
        self.with_cache(|cache| {
            cache.put(full, bytes.clone());
        });
        Ok(Some(bytes))
    }

    fn delete(&self, table: &str, key: &str) -> Result<bool> {
        let full = make_key(table, key);
        self.with_cache(|cache| {
            cache.pop(&full);
        });
        self.update(|t| Ok(t.remove(full.as_str()).map_err(backend_err)?.is_some()))
    }

    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let start = make_key(table, prefix);
        let strip = table.len() + 1;

        let txn = self.db.begin_read().map_err(backend_err)?;
        let t = txn.open_table(UNIFIED_TABLE).map_err(backend_err)?;

        let mut found = Vec::new();
        for entry in t.range(start.as_str()..).map_err(backend_err)? {
            let (key, value) = entry.map_err(backend_err)?;
            let key = key.value();
            if !key.starts_with(&start) {
                break;
            }
            if let Some(local) = key.get(strip..) {
                found.push((local.to_string(), value.value().to_vec()));
            }
        }
        Ok(found)
    }

    fn write_batch(&self, table: &str, items: Vec<(String, Vec<u8>)>) -> Result<()> {
        let entries: Vec<(String, Vec<u8>)> = items
            .into_iter()
            .map(|(key, value)| (make_key(table, &key), value))
            .collect();

        self.update(|t| {
            for (key, value) in &entries {
                t.insert(key.as_str(), value.as_slice())
                    .map_err(backend_err)?;
            }
            Ok(())
        })?;
        self.with_cache(|cache| {
            for (key, value) in entries {
                cache.put(key, value);
            }
        });
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        self.scratch_file.is_none()
    }
}

impl Drop for RedbBackend {
    fn drop(&mut self) {
        let Some(scratch) = self.scratch_file.take() else {
            return;
        };
        if let Err(e) = std::fs::remove_file(&scratch) {
            tracing::debug!(
                category = "storage",
                path = %scratch.display(),
                error = %e,
                "Could not remove scratch database"
            );
        }
    }
}
