//! Persistent cache for vendor API responses
//!
//! Entries are JSON files under `<dir>/<namespace>/<function>-<key>.json`,
//! where the namespace is the vendor id and the key is the SHA-256 of the
//! function name and its arguments. Writes go through a temp file and an
//! atomic rename, so concurrent readers never see a half-written entry.

use crate::config::CacheConfig;
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::OpenOptions;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// A single cached value as stored on disk
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    /// Unix timestamp in milliseconds
    created_at: i64,
    key: String,
    value: Value,
}

/// Disk-backed memoization of deterministic vendor calls
#[derive(Debug, Clone)]
pub struct RecordCache {
    /// `None` when caching is disabled
    dir: Option<PathBuf>,
    ttl: Duration,
    lock_staleness: Duration,
}

impl RecordCache {
    pub fn new(config: &CacheConfig) -> Self {
        let dir = if config.enabled {
            if let Err(e) = std::fs::create_dir_all(&config.dir) {
                log::warn!("Failed to create cache directory: {}", e);
            } else {
                log::info!("Record cache directory: {:?}", config.dir);
            }
            Some(config.dir.clone())
        } else {
            None
        };
        Self {
            dir,
            ttl: config.ttl,
            lock_staleness: config.lock_staleness,
        }
    }

    /// A cache that never stores anything
    pub fn disabled() -> Self {
        Self {
            dir: None,
            ttl: Duration::ZERO,
            lock_staleness: Duration::ZERO,
        }
    }

    /// Hash of function identity and arguments
    pub fn cache_key(function: &str, args: &Value) -> String {
        let identity = serde_json::json!({ "function": function, "args": args });
        hex::encode(Sha256::digest(identity.to_string().as_bytes()))
    }

    fn entry_path(&self, namespace: &str, function: &str, key: &str) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(namespace).join(format!("{}-{}.json", function, key)))
    }

    /// Return the cached value, if present, readable and within TTL
    pub fn get<T: DeserializeOwned>(&self, namespace: &str, function: &str, args: &Value) -> Option<T> {
        let key = Self::cache_key(function, args);
        let path = self.entry_path(namespace, function, &key)?;

        let json = std::fs::read_to_string(&path).ok()?;
        let entry: CacheEntry = match serde_json::from_str(&json) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Ignoring corrupt cache entry {}: {}", path.display(), e);
                return None;
            }
        };
        if entry.key != key {
            log::warn!("Ignoring cache entry with mismatched key: {}", path.display());
            return None;
        }

        let age_ms = chrono::Utc::now().timestamp_millis() - entry.created_at;
        if age_ms < 0 || age_ms as u128 >= self.ttl.as_millis() {
            log::debug!("Cache entry expired: {}/{}", namespace, function);
            return None;
        }

        match serde_json::from_value(entry.value) {
            Ok(value) => {
                log::debug!("Cache hit: {}/{}", namespace, function);
                Some(value)
            }
            Err(e) => {
                log::warn!("Failed to decode cached {}/{}: {}", namespace, function, e);
                None
            }
        }
    }

    /// Store a value. Failures are logged and otherwise ignored.
    pub fn put<T: Serialize>(&self, namespace: &str, function: &str, args: &Value, value: &T) {
        let key = Self::cache_key(function, args);
        let Some(path) = self.entry_path(namespace, function, &key) else {
            return;
        };

        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Failed to serialize {}/{} for caching: {}", namespace, function, e);
                return;
            }
        };
        let entry = CacheEntry {
            created_at: chrono::Utc::now().timestamp_millis(),
            key,
            value,
        };

        if let Err(e) = self.write_entry(&path, &entry) {
            log::warn!("Failed to cache {}/{}: {}", namespace, function, e);
        }
    }

    fn write_entry(&self, path: &Path, entry: &CacheEntry) -> Result<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        std::fs::create_dir_all(parent)?;

        let lock_path = path.with_extension("lock");
        let Some(_lock) = LockGuard::acquire(&lock_path, self.lock_staleness)? else {
            log::debug!("Cache entry locked by another writer, skipping: {}", path.display());
            return Ok(());
        };

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(serde_json::to_string(entry)?.as_bytes())?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Return the cached result of `fetch`, calling it on a miss.
    ///
    /// Errors from `fetch` are returned as-is and never cached.
    pub async fn cached<T, F, Fut>(
        &self,
        namespace: &str,
        function: &str,
        args: &Value,
        fetch: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get(namespace, function, args) {
            return Ok(value);
        }
        let value = fetch().await?;
        self.put(namespace, function, args, &value);
        Ok(value)
    }

    /// Drop every entry of one namespace. Returns the number of files removed.
    pub fn clear_namespace(&self, namespace: &str) -> Result<usize> {
        let Some(dir) = self.dir.as_ref().map(|d| d.join(namespace)) else {
            return Ok(0);
        };
        if !dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        log::info!("Cleared {} cached entries for {}", removed, namespace);
        Ok(removed)
    }
}

/// Exclusive writer lock implemented as a lock file next to the entry
struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Take the lock, or return `None` if another writer holds a fresh one.
    /// A lock older than `staleness` is assumed abandoned and broken.
    fn acquire(path: &Path, staleness: Duration) -> Result<Option<Self>> {
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(_) => {
                    return Ok(Some(Self {
                        path: path.to_path_buf(),
                    }))
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let age = std::fs::metadata(path)
                        .and_then(|m| m.modified())
                        .ok()
                        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                        .unwrap_or(Duration::ZERO);
                    if age < staleness {
                        return Ok(None);
                    }
                    log::warn!("Breaking stale cache lock: {}", path.display());
                    if let Err(e) = std::fs::remove_file(path) {
                        log::debug!("Could not remove stale lock {}: {}", path.display(), e);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("Could not release cache lock {}: {}", self.path.display(), e);
        }
    }
}
