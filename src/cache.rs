//! Versioned persistent model cache
//!
//! The model payload lives in a key-value store under a single fixed key
//! ([`MODEL_CACHE_KEY`]). Each record carries the version it was written for;
//! a record whose version differs from the expected one is treated as absent.
//! Every public operation degrades to a miss (with a warning) when the store
//! is unavailable or fails, so callers never see cache errors.

use crate::download::{sha256_hex, verify_integrity};
use crate::error::{BgRemovalError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Key of the single persisted model record
pub const MODEL_CACHE_KEY: &str = "segmentation-model";

/// Environment variable overriding the cache directory
pub const CACHE_DIR_ENV: &str = "NOBG_CACHE_DIR";

/// Metadata stored next to each payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub key: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Record as held by a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub metadata: RecordMetadata,
    pub payload: Vec<u8>,
}

/// Usable cache hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedModelEntry {
    pub key: String,
    pub version: String,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// Cache status snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    /// A record with the expected version is present
    pub cached: bool,
    /// Version of whatever record is stored, even a stale one
    pub stored_version: Option<String>,
    pub expected_version: String,
    pub size_bytes: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub location: Option<PathBuf>,
}

/// Persistent key-value storage
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// Metadata only, without loading the payload
    ///
    /// # Errors
    /// - Storage unreadable or metadata corrupt
    fn read_metadata(&self, key: &str) -> Result<Option<RecordMetadata>>;

    /// # Errors
    /// - Storage unreadable or metadata corrupt
    fn read(&self, key: &str) -> Result<Option<StoredRecord>>;

    /// Replace any existing record under `record.metadata.key`
    ///
    /// # Errors
    /// - Storage not writable
    fn write(&self, record: &StoredRecord) -> Result<()>;

    /// Remove the record; missing records are not an error
    ///
    /// # Errors
    /// - Storage not writable
    fn delete(&self, key: &str) -> Result<()>;

    /// Where records live, for diagnostics
    fn location(&self) -> Option<PathBuf> {
        None
    }
}

/// Filesystem store: `<key>.json` metadata plus `<key>.bin` payload
#[derive(Debug, Clone)]
pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    /// Open (and create if needed) a store rooted at `dir`
    ///
    /// # Errors
    /// - Directory cannot be created
    pub fn open<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| BgRemovalError::file_io_error("create cache directory", &dir, &e))?;
        Ok(Self { dir })
    }

    fn file_stem(key: &str) -> String {
        key.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", Self::file_stem(key)))
    }

    fn payload_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", Self::file_stem(key)))
    }

    fn write_atomic(&self, target: &Path, bytes: &[u8]) -> Result<()> {
        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| BgRemovalError::file_io_error("create temp file in", &self.dir, &e))?;
        temp.write_all(bytes)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| BgRemovalError::file_io_error("write temp file for", target, &e))?;
        temp.persist(target)
            .map_err(|e| BgRemovalError::file_io_error("persist", target, &e.error))?;
        Ok(())
    }

    fn remove_if_present(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BgRemovalError::file_io_error("remove", path, &e)),
        }
    }
}

impl KeyValueStore for FsStore {
    fn read_metadata(&self, key: &str) -> Result<Option<RecordMetadata>> {
        let path = self.metadata_path(key);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BgRemovalError::file_io_error("read", &path, &e)),
        };

        let metadata = serde_json::from_str(&json).map_err(|e| {
            BgRemovalError::internal(format!("Corrupt cache metadata {}: {e}", path.display()))
        })?;
        Ok(Some(metadata))
    }

    fn read(&self, key: &str) -> Result<Option<StoredRecord>> {
        let Some(metadata) = self.read_metadata(key)? else {
            return Ok(None);
        };

        let path = self.payload_path(key);
        match fs::read(&path) {
            Ok(payload) => Ok(Some(StoredRecord { metadata, payload })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BgRemovalError::file_io_error("read", &path, &e)),
        }
    }

    fn write(&self, record: &StoredRecord) -> Result<()> {
        let key = &record.metadata.key;
        let json = serde_json::to_vec_pretty(&record.metadata)
            .map_err(|e| BgRemovalError::internal(format!("Failed to encode cache metadata: {e}")))?;

        // Payload first so metadata never points at a missing payload
        self.write_atomic(&self.payload_path(key), &record.payload)?;
        self.write_atomic(&self.metadata_path(key), &json)
    }

    fn delete(&self, key: &str) -> Result<()> {
        Self::remove_if_present(&self.metadata_path(key))?;
        Self::remove_if_present(&self.payload_path(key))
    }

    fn location(&self) -> Option<PathBuf> {
        Some(self.dir.clone())
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, StoredRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredRecord>>> {
        self.records
            .lock()
            .map_err(|_| BgRemovalError::internal("Memory store lock poisoned"))
    }
}

impl KeyValueStore for MemoryStore {
    fn read_metadata(&self, key: &str) -> Result<Option<RecordMetadata>> {
        Ok(self.records()?.get(key).map(|r| r.metadata.clone()))
    }

    fn read(&self, key: &str) -> Result<Option<StoredRecord>> {
        Ok(self.records()?.get(key).cloned())
    }

    fn write(&self, record: &StoredRecord) -> Result<()> {
        self.records()?
            .insert(record.metadata.key.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.records()?.remove(key);
        Ok(())
    }
}

/// Versioned view over a store holding the model payload
#[derive(Debug, Clone)]
pub struct ModelCache {
    store: Option<Arc<dyn KeyValueStore>>,
    expected_version: String,
}

impl ModelCache {
    pub fn new<S: Into<String>>(store: Option<Arc<dyn KeyValueStore>>, expected_version: S) -> Self {
        Self {
            store,
            expected_version: expected_version.into(),
        }
    }

    /// Cache without storage; every lookup misses
    pub fn disabled<S: Into<String>>(expected_version: S) -> Self {
        Self::new(None, expected_version)
    }

    /// Filesystem-backed cache in the resolved cache directory
    ///
    /// Falls back to a disabled cache when no directory can be used.
    pub fn open_default<S: Into<String>>(explicit_dir: Option<&Path>, expected_version: S) -> Self {
        let Some(dir) = resolve_cache_dir(explicit_dir) else {
            log::warn!("No cache directory available, model caching disabled");
            return Self::disabled(expected_version);
        };

        match FsStore::open(&dir) {
            Ok(store) => {
                log::debug!("Model cache at {}", dir.display());
                Self::new(Some(Arc::new(store)), expected_version)
            },
            Err(e) => {
                log::warn!("Model cache unavailable: {}", e);
                Self::disabled(expected_version)
            },
        }
    }

    #[must_use]
    pub fn expected_version(&self) -> &str {
        &self.expected_version
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Whether [`ModelCache::get`] would hit
    ///
    /// Reads and hashes the payload, so this costs as much as a `get`.
    pub fn is_cached(&self) -> bool {
        self.get().is_some()
    }

    /// Payload for the expected version, verified against its digest
    pub fn get(&self) -> Option<CachedModelEntry> {
        let store = self.store.as_ref()?;
        let record = match store.read(MODEL_CACHE_KEY) {
            Ok(record) => record?,
            Err(e) => {
                log::warn!("Model cache read failed: {}", e);
                return None;
            },
        };

        if record.metadata.version != self.expected_version {
            log::info!(
                "Cached model version {} does not match expected {}, ignoring",
                record.metadata.version,
                self.expected_version
            );
            return None;
        }

        if !verify_integrity(&record.payload, Some(&record.metadata.sha256)) {
            log::warn!("Cached model payload failed integrity check, ignoring");
            return None;
        }

        Some(CachedModelEntry {
            key: record.metadata.key,
            version: record.metadata.version,
            payload: record.payload,
            timestamp: record.metadata.timestamp,
        })
    }

    /// Store the payload under the expected version, replacing any prior record
    ///
    /// Returns whether the record was written.
    pub fn put(&self, payload: &[u8]) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };

        let record = StoredRecord {
            metadata: RecordMetadata {
                key: MODEL_CACHE_KEY.to_string(),
                version: self.expected_version.clone(),
                timestamp: Utc::now(),
                size_bytes: payload.len() as u64,
                sha256: sha256_hex(payload),
            },
            payload: payload.to_vec(),
        };

        match store.write(&record) {
            Ok(()) => {
                log::info!(
                    "💾 Cached model v{} ({:.2} MB)",
                    self.expected_version,
                    payload.len() as f64 / (1024.0 * 1024.0)
                );
                true
            },
            Err(e) => {
                log::warn!("Model cache write failed: {}", e);
                false
            },
        }
    }

    /// Delete the record; returns whether the store accepted the deletion
    pub fn clear(&self) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };

        match store.delete(MODEL_CACHE_KEY) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Model cache clear failed: {}", e);
                false
            },
        }
    }

    pub fn info(&self) -> CacheInfo {
        let metadata = self.current_metadata();
        CacheInfo {
            cached: metadata.is_some() && self.is_cached(),
            stored_version: metadata.as_ref().map(|m| m.version.clone()),
            expected_version: self.expected_version.clone(),
            size_bytes: metadata.as_ref().map(|m| m.size_bytes),
            timestamp: metadata.as_ref().map(|m| m.timestamp),
            location: self.store.as_ref().and_then(|s| s.location()),
        }
    }

    fn current_metadata(&self) -> Option<RecordMetadata> {
        let store = self.store.as_ref()?;
        match store.read_metadata(MODEL_CACHE_KEY) {
            Ok(metadata) => metadata,
            Err(e) => {
                log::warn!("Model cache metadata read failed: {}", e);
                None
            },
        }
    }
}

/// Cache directory: explicit path, then `NOBG_CACHE_DIR`, then the user cache dir
#[must_use]
pub fn resolve_cache_dir(explicit_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = explicit_dir {
        return Some(dir.to_path_buf());
    }

    if let Some(dir) = std::env::var_os(CACHE_DIR_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(dir));
    }

    dirs::cache_dir().map(|dir| dir.join("nobg").join("models"))
}
