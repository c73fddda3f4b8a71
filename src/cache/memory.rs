//! Short-lived in-memory mirror of the disk cache
//!
//! Every key shares one mutex. Reads and writes are O(payload size) and rare
//! next to request volume, so per-key locking is not worth it.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct MemoryEntry {
    payload: Value,
    fetched_at: Instant,
}

/// Mapping from data-set key to the last payload seen, valid for `ttl`
pub struct MemoryCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MemoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the payload for `key` if it was set less than `ttl` ago
    pub fn get(&self, key: &str) -> Option<Value> {
        let entries = self.lock();
        let entry = entries.get(key)?;
        if entry.fetched_at.elapsed() < self.ttl {
            Some(entry.payload.clone())
        } else {
            None
        }
    }

    /// Returns the payload for `key` even if it has expired
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.lock().get(key).map(|entry| entry.payload.clone())
    }

    pub fn is_fresh(&self, key: &str) -> bool {
        self.lock()
            .get(key)
            .is_some_and(|entry| entry.fetched_at.elapsed() < self.ttl)
    }

    /// Stores `payload` for `key`, resetting its fetch time to now
    pub fn set(&self, key: &str, payload: Value) {
        self.lock().insert(
            key.to_string(),
            MemoryEntry {
                payload,
                fetched_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
