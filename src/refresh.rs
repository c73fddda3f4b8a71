//! Cache refresh orchestration
//!
//! [`CacheService`] owns both cache layers and decides, per data-set, whether
//! a request is served from memory, served from disk while a background
//! refresh is queued, or refused because nothing was ever cached. Background
//! refreshes go through one bounded queue drained by a single worker task,
//! and a per-key in-flight set keeps at most one refresh per data-set running
//! across request-triggered refreshes and the periodic sweep.
//!
//! [`SweepHandle`] runs the sweep that proactively refreshes every data-set
//! whose disk entry has outlived the disk TTL.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::cache::{change, DiskCache, MemoryCache, StalenessPolicy};
use crate::data::{DataSet, DataSetFetcher, ProviderError};

/// Pending background refreshes; more than one per data-set is never queued
const QUEUE_CAPACITY: usize = 16;

/// Refresh events buffered for slow subscribers
const EVENT_CAPACITY: usize = 64;

/// Where a data-set currently stands across the two cache layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    /// Nothing cached anywhere
    Empty,
    /// Memory holds an entry younger than the memory TTL
    MemoryFresh,
    /// Disk entry is within the disk TTL but memory is stale or empty
    DiskFreshMemoryStale,
    /// Only a disk entry older than the disk TTL
    DiskStale,
}

/// Request could not be served
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServeError {
    #[error("data for '{0}' is temporarily unavailable, try again shortly")]
    NoCacheAvailable(DataSet),
}

/// A refresh cycle that did not complete
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("fetch failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("fetched '{0}' but could not persist it to disk")]
    Persist(DataSet),
}

/// Published whenever a refresh cycle ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshEvent {
    Refreshed { key: DataSet, changed: bool },
    Failed { key: DataSet, error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Error,
}

/// Per data-set result of an admin refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub status: OutcomeStatus,
    pub message: String,
}

impl From<&Result<bool, RefreshError>> for RefreshOutcome {
    fn from(result: &Result<bool, RefreshError>) -> Self {
        match result {
            Ok(true) => RefreshOutcome {
                status: OutcomeStatus::Success,
                message: "Data refreshed, changes detected".to_string(),
            },
            Ok(false) => RefreshOutcome {
                status: OutcomeStatus::Success,
                message: "Data refreshed, no changes".to_string(),
            },
            Err(e) => RefreshOutcome {
                status: OutcomeStatus::Error,
                message: e.to_string(),
            },
        }
    }
}

/// How warm-up prepared one data-set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmUp {
    /// A valid disk entry was loaded into memory
    Loaded,
    /// The disk entry was missing or stale and a fresh payload was fetched
    Fetched,
    Failed(String),
}

/// Cache health of one data-set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatus {
    pub valid: bool,
    pub age_days: Option<i64>,
    pub needs_update: bool,
    pub state: CacheState,
    pub changed_at: Option<DateTime<Utc>>,
}

/// Change flags raised since they were last acknowledged
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataUpdates {
    pub updated: bool,
    pub updated_data: BTreeMap<DataSet, DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

/// Data-sets the sweep refreshed or failed to refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub refreshed: Vec<DataSet>,
    pub failed: Vec<DataSet>,
}

struct Shared {
    disk: DiskCache,
    memory: MemoryCache,
    fetcher: Arc<dyn DataSetFetcher>,
    in_flight: Mutex<HashSet<DataSet>>,
    events: broadcast::Sender<RefreshEvent>,
}

/// Claim on a data-set's refresh slot, released on drop
struct InFlightGuard {
    shared: Arc<Shared>,
    key: DataSet,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.shared
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl Shared {
    fn try_claim(self: &Arc<Self>, key: DataSet) -> Option<InFlightGuard> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(key) {
            return None;
        }
        Some(InFlightGuard {
            shared: Arc::clone(self),
            key,
        })
    }

    /// Fetch, compare against disk, persist, then mirror into memory
    ///
    /// Returns whether the payload changed.
    async fn refresh(&self, key: DataSet) -> Result<bool, RefreshError> {
        let fresh = self.fetcher.fetch(key).await?;

        let previous = self.disk.load(key.as_str());
        let changed = change::changed(previous.as_ref(), Some(&fresh));
        let saved = self.disk.save(key.as_str(), &fresh, changed);
        self.memory.set(key.as_str(), fresh);

        if saved {
            Ok(changed)
        } else {
            Err(RefreshError::Persist(key))
        }
    }

    async fn refresh_logged(&self, key: DataSet) -> Result<bool, RefreshError> {
        let result = self.refresh(key).await;
        let event = match &result {
            Ok(changed) => {
                info!(key = %key, changed, "Refreshed data set");
                RefreshEvent::Refreshed {
                    key,
                    changed: *changed,
                }
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Refresh failed");
                RefreshEvent::Failed {
                    key,
                    error: e.to_string(),
                }
            }
        };
        // No subscribers is fine
        let _ = self.events.send(event);
        result
    }
}

/// Handle to the cache and its refresh machinery
///
/// Cheap to clone; every clone shares the same caches and worker.
#[derive(Clone)]
pub struct CacheService {
    shared: Arc<Shared>,
    queue: mpsc::Sender<InFlightGuard>,
}

impl CacheService {
    /// Creates the service and spawns its background refresh worker
    ///
    /// Must be called from within a Tokio runtime. The worker exits once
    /// every clone of the service has been dropped.
    pub fn new(
        cache_dir: PathBuf,
        policy: StalenessPolicy,
        fetcher: Arc<dyn DataSetFetcher>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            disk: DiskCache::with_dir(cache_dir, policy.disk_ttl()),
            memory: MemoryCache::new(policy.memory_ttl()),
            fetcher,
            in_flight: Mutex::new(HashSet::new()),
            events,
        });

        let (queue, mut pending) = mpsc::channel::<InFlightGuard>(QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some(claim) = pending.recv().await {
                let _ = claim.shared.refresh_logged(claim.key).await;
            }
            debug!("Background refresh worker stopped");
        });

        Self { shared, queue }
    }

    /// The durable cache layer
    pub fn disk(&self) -> &DiskCache {
        &self.shared.disk
    }

    /// Receives an event for every refresh cycle that ends from now on
    pub fn subscribe(&self) -> broadcast::Receiver<RefreshEvent> {
        self.shared.events.subscribe()
    }

    /// Serves the payload for `key`
    ///
    /// Memory is consulted first. On a miss the disk entry is served whatever
    /// its age and a background refresh is queued. Without any disk entry the
    /// request fails immediately instead of waiting on an upstream fetch.
    /// Data-sets that are computed on request skip the caches unless that
    /// computation fails.
    pub async fn get(&self, key: DataSet) -> Result<Value, ServeError> {
        if key.fetch_on_request() {
            return self.get_computed(key).await;
        }
        self.get_cached(key, true)
    }

    fn get_cached(&self, key: DataSet, schedule: bool) -> Result<Value, ServeError> {
        let name = key.as_str();
        if let Some(payload) = self.shared.memory.get(name) {
            debug!(key = %key, "Serving from memory");
            return Ok(payload);
        }

        let payload = self
            .shared
            .disk
            .load(name)
            .ok_or(ServeError::NoCacheAvailable(key))?;
        debug!(key = %key, "Serving from disk");
        self.shared.memory.set(name, payload.clone());
        if schedule {
            self.schedule_refresh(key);
        }
        Ok(payload)
    }

    async fn get_computed(&self, key: DataSet) -> Result<Value, ServeError> {
        let name = key.as_str();
        let fresh = match self.shared.fetcher.fetch(key).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(key = %key, error = %e, "Fetch failed, falling back to cache");
                return self.get_cached(key, false);
            }
        };

        let baseline = self
            .shared
            .memory
            .peek(name)
            .or_else(|| self.shared.disk.load(name));
        let needs_write = match &baseline {
            Some(old) => change::changed(Some(old), Some(&fresh)),
            None => true,
        };
        if needs_write {
            let changed = change::changed(baseline.as_ref(), Some(&fresh));
            if self.shared.disk.save(name, &fresh, changed) {
                let _ = self.shared.events.send(RefreshEvent::Refreshed { key, changed });
            }
        }

        self.shared.memory.set(name, fresh.clone());
        Ok(fresh)
    }

    /// Queues a background refresh of `key`
    ///
    /// Returns false when a refresh of `key` is already in flight or the
    /// queue is full; either way the caller is never blocked.
    pub fn schedule_refresh(&self, key: DataSet) -> bool {
        let Some(claim) = self.shared.try_claim(key) else {
            debug!(key = %key, "Refresh already in flight");
            return false;
        };
        match self.queue.try_send(claim) {
            Ok(()) => {
                debug!(key = %key, "Queued background refresh");
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(key = %key, "Refresh queue full, dropping refresh");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(key = %key, "Refresh worker gone, dropping refresh");
                false
            }
        }
    }

    /// Readies every data-set before traffic is accepted
    ///
    /// Valid disk entries are loaded into memory; anything else is fetched
    /// synchronously. Failures are reported, not raised, so the server can
    /// start with whatever succeeded.
    pub async fn warm_up(&self) -> BTreeMap<DataSet, WarmUp> {
        let results = join_all(
            DataSet::ALL
                .into_iter()
                .map(|key| async move { (key, self.warm_up_key(key).await) }),
        )
        .await;
        results.into_iter().collect()
    }

    async fn warm_up_key(&self, key: DataSet) -> WarmUp {
        let name = key.as_str();
        if self.shared.disk.is_valid(name) {
            if let Some(payload) = self.shared.disk.load(name) {
                self.shared.memory.set(name, payload);
                info!(key = %key, "Loaded valid cache entry");
                return WarmUp::Loaded;
            }
        }

        match self.shared.refresh_logged(key).await {
            Ok(_) => WarmUp::Fetched,
            Err(e) => WarmUp::Failed(e.to_string()),
        }
    }

    /// Refreshes every data-set now and reports each result
    ///
    /// One data-set failing does not stop the others.
    pub async fn refresh_all(&self) -> BTreeMap<DataSet, RefreshOutcome> {
        let results = join_all(DataSet::ALL.into_iter().map(|key| async move {
            let result = self.shared.refresh_logged(key).await;
            (key, RefreshOutcome::from(&result))
        }))
        .await;
        results.into_iter().collect()
    }

    /// Refreshes every data-set whose disk entry is no longer valid
    ///
    /// Data-sets with a refresh already in flight are skipped.
    pub async fn sweep(&self) -> SweepSummary {
        let mut summary = SweepSummary::default();
        for key in DataSet::ALL {
            if self.shared.disk.is_valid(key.as_str()) {
                continue;
            }
            let Some(_claim) = self.shared.try_claim(key) else {
                debug!(key = %key, "Sweep skipping data set with refresh in flight");
                continue;
            };
            match self.shared.refresh_logged(key).await {
                Ok(_) => summary.refreshed.push(key),
                Err(_) => summary.failed.push(key),
            }
        }
        summary
    }

    pub fn state(&self, key: DataSet) -> CacheState {
        let name = key.as_str();
        if self.shared.memory.is_fresh(name) {
            CacheState::MemoryFresh
        } else if self.shared.disk.is_valid(name) {
            CacheState::DiskFreshMemoryStale
        } else if self.shared.disk.load(name).is_some() {
            CacheState::DiskStale
        } else {
            CacheState::Empty
        }
    }

    pub fn status(&self) -> BTreeMap<DataSet, CacheStatus> {
        DataSet::ALL
            .into_iter()
            .map(|key| {
                let name = key.as_str();
                let valid = self.shared.disk.is_valid(name);
                let status = CacheStatus {
                    valid,
                    age_days: self.shared.disk.age_days(name),
                    needs_update: !valid,
                    state: self.state(key),
                    changed_at: self.shared.disk.changed_at(name),
                };
                (key, status)
            })
            .collect()
    }

    /// Drops one data-set, or everything, from both layers
    pub fn clear(&self, key: Option<DataSet>) {
        match key {
            Some(key) => {
                self.shared.disk.clear(key.as_str());
                self.shared.memory.invalidate(key.as_str());
            }
            None => {
                self.shared.disk.clear_all(DataSet::ALL.iter().map(|key| key.as_str()));
                self.shared.memory.clear();
            }
        }
    }

    /// Reports raised change flags, acknowledging them when `clear` is set
    pub fn data_updates(&self, clear: bool) -> DataUpdates {
        let updated_data: BTreeMap<DataSet, DateTime<Utc>> = DataSet::ALL
            .into_iter()
            .filter_map(|key| Some((key, self.shared.disk.changed_at(key.as_str())?)))
            .collect();

        if clear {
            for key in updated_data.keys() {
                self.shared.disk.clear_change_flag(key.as_str());
            }
        }

        DataUpdates {
            updated: !updated_data.is_empty(),
            updated_data,
            timestamp: Utc::now(),
        }
    }
}

/// Configuration for the periodic sweep
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// Shorter wait after a sweep in which some refresh failed
    pub retry_interval: Duration,
    pub enabled: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),      // 1 hour
            retry_interval: Duration::from_secs(300), // 5 minutes
            enabled: true,
        }
    }
}

/// Handle for controlling the periodic sweep
pub struct SweepHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SweepHandle {
    /// Spawns the sweep task
    ///
    /// The first sweep runs one interval after spawning; warm-up covers
    /// startup. The task stops on [`SweepHandle::shutdown`] or when the
    /// handle is dropped.
    pub fn spawn(service: CacheService, config: SweepConfig) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        if config.enabled {
            tokio::spawn(async move {
                let mut wait = config.interval;
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {
                            let summary = service.sweep().await;
                            wait = if summary.failed.is_empty() {
                                config.interval
                            } else {
                                warn!(
                                    failed = ?summary.failed,
                                    retry_in = ?config.retry_interval,
                                    "Sweep incomplete, retrying early"
                                );
                                config.retry_interval
                            };
                        }
                        _ = shutdown_rx.recv() => {
                            break;
                        }
                    }
                }
                debug!("Sweep stopped");
            });
        }

        Self { shutdown_tx }
    }

    /// Stops the sweep task
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}
