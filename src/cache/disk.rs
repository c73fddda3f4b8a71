//! Disk cache store for data-set snapshots
//!
//! Persists one JSON payload, one timestamp file and an optional change-flag
//! file per data-set key. Writes go to a temporary file first and are renamed
//! into place, so an interrupted write never leaves a readable-but-corrupt
//! entry behind. Reads never fail: missing or corrupt files are reported as
//! absent and logged.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised inside the store before they are downgraded to "absent"
#[derive(Debug, Error)]
pub enum CacheError {
    /// Reading or writing a cache file failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A cache file exists but cannot be interpreted
    #[error("corrupt cache entry '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    /// The payload could not be serialized
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Reads and writes cached payloads in a dedicated directory
///
/// File layout per key: `{key}.json` (payload), `{key}_timestamp.txt`
/// (RFC 3339 time of the last save) and `{key}_changed.txt` (time of the last
/// save that altered the payload). Writers are serialized through a lock held
/// by the store instance.
#[derive(Debug)]
pub struct DiskCache {
    /// Directory where cache files are stored
    cache_dir: PathBuf,
    /// Maximum age at which an entry is still valid
    ttl: Duration,
    write_lock: Mutex<()>,
}

impl DiskCache {
    /// Creates a store rooted at `cache_dir` with the given validity window
    ///
    /// The directory is created lazily on the first save.
    pub fn with_dir(cache_dir: PathBuf, ttl: Duration) -> Self {
        Self {
            cache_dir,
            ttl,
            write_lock: Mutex::new(()),
        }
    }

    /// Directory holding the cache files
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    fn payload_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", key))
    }

    fn timestamp_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}_timestamp.txt", key))
    }

    fn changed_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}_changed.txt", key))
    }

    /// Returns true iff a readable payload and timestamp exist for `key` and
    /// the timestamp is younger than the store's TTL
    pub fn is_valid(&self, key: &str) -> bool {
        let Some(saved_at) = self.fetched_at(key) else {
            return false;
        };
        if self.load(key).is_none() {
            return false;
        }

        // A timestamp from the future (clock skew) counts as age zero
        match (Utc::now() - saved_at).to_std() {
            Ok(age) => age < self.ttl,
            Err(_) => true,
        }
    }

    /// Loads the last persisted payload regardless of staleness
    ///
    /// Returns `None` if nothing was saved for `key` or the file is corrupt.
    pub fn load(&self, key: &str) -> Option<Value> {
        match self.try_load(key) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key, error = %e, "Treating unreadable cache entry as absent");
                None
            }
        }
    }

    fn try_load(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let Some(content) = read_optional(&self.payload_path(key))? else {
            return Ok(None);
        };
        let payload = serde_json::from_str(&content).map_err(|e| CacheError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        debug!(key, "Loaded payload from disk cache");
        Ok(Some(payload))
    }

    /// Persists `payload` with the current timestamp
    ///
    /// When `changed` is true the change flag for `key` is stamped as well.
    /// Returns whether the save succeeded; failures are logged, never raised.
    pub fn save(&self, key: &str, payload: &Value, changed: bool) -> bool {
        match self.try_save(key, payload, changed) {
            Ok(()) => {
                info!(key, changed, "Saved payload to disk cache");
                true
            }
            Err(e) => {
                warn!(key, error = %e, "Failed to save payload to disk cache");
                false
            }
        }
    }

    fn try_save(&self, key: &str, payload: &Value, changed: bool) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(payload)?;
        let now = Utc::now().to_rfc3339();

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        fs::create_dir_all(&self.cache_dir)?;

        // Payload first: a crash before the timestamp lands leaves the old
        // timestamp, which can only under-report freshness.
        write_atomic(&self.payload_path(key), json.as_bytes())?;
        write_atomic(&self.timestamp_path(key), now.as_bytes())?;
        if changed {
            write_atomic(&self.changed_path(key), now.as_bytes())?;
        }
        Ok(())
    }

    /// Time of the last successful save for `key`
    pub fn fetched_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.read_timestamp(key, &self.timestamp_path(key))
    }

    /// Elapsed whole days since the last save, `None` if never saved
    pub fn age_days(&self, key: &str) -> Option<i64> {
        self.fetched_at(key)
            .map(|saved_at| (Utc::now() - saved_at).num_days().max(0))
    }

    /// Time of the last save that produced a materially different payload
    pub fn changed_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.read_timestamp(key, &self.changed_path(key))
    }

    /// Removes the change flag for `key`, leaving payload and timestamp alone
    pub fn clear_change_flag(&self, key: &str) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        remove_if_present(&self.changed_path(key));
    }

    /// Deletes payload, timestamp and change flag for `key`
    pub fn clear(&self, key: &str) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.remove_entry(key);
        info!(key, "Cleared disk cache entry");
    }

    /// Deletes the entries of every key in `keys`
    ///
    /// Only files named after those keys are removed, so a shared directory
    /// keeps everything else.
    pub fn clear_all<'a>(&self, keys: impl IntoIterator<Item = &'a str>) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut cleared = 0;
        for key in keys {
            self.remove_entry(key);
            cleared += 1;
        }
        info!(cleared, "Cleared disk cache entries");
    }

    /// Removes every file of one entry, leftover temp files included
    fn remove_entry(&self, key: &str) {
        for path in [
            self.payload_path(key),
            self.timestamp_path(key),
            self.changed_path(key),
        ] {
            remove_if_present(&tmp_path(&path));
            remove_if_present(&path);
        }
    }

    fn read_timestamp(&self, key: &str, path: &Path) -> Option<DateTime<Utc>> {
        let content = match read_optional(path) {
            Ok(content) => content?,
            Err(e) => {
                warn!(key, error = %e, "Failed to read cache timestamp");
                return None;
            }
        };
        match DateTime::parse_from_rfc3339(content.trim()) {
            Ok(parsed) => Some(parsed.with_timezone(&Utc)),
            Err(e) => {
                let err = CacheError::Corrupt {
                    key: key.to_string(),
                    reason: format!("bad timestamp: {}", e),
                };
                warn!(key, error = %err, "Ignoring unreadable cache timestamp");
                None
            }
        }
    }
}

/// Reads a file, mapping "not found" to `None`
fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Writes `contents` next to `path` and renames it into place
fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = tmp_path(path);
    if let Err(e) = fs::write(&tmp, contents) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        e
    })
}

fn remove_if_present(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove cache file");
        }
    }
}
