//! TtlSeries Memory Store
//!
//! In-process chunk store with sliding per-key expiration. Implements both
//! the atomic [`ChunkStore`] interface (the whole batch is applied under one
//! lock) and the [`CasBackend`] primitives, so it can stand in for either
//! kind of backing store in tests and single-process deployments.
//!
//! @version 0.1.0
//! @author TtlSeries Development Team

use crate::aggregation::apply_sample;
use crate::store::{CasBackend, ChunkStore, SlotBatch};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use ttlseries_common::Result;

// =============================================================================
// Clock
// =============================================================================

/// Source of the current time for expiration.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.write() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

// =============================================================================
// Memory Store
// =============================================================================

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Remove `key` if it has expired. Returns true if an entry was dropped.
fn evict_expired(entries: &mut HashMap<String, Entry>, key: &str, now: DateTime<Utc>) -> bool {
    if entries.get(key).map_or(false, |e| !e.is_live(now)) {
        entries.remove(key);
        true
    } else {
        false
    }
}

/// Aggregate calls between full sweeps of expired keys.
pub const DEFAULT_SWEEP_INTERVAL: u64 = 1024;

/// Counters for store operations.
#[derive(Debug, Clone, Default)]
pub struct MemoryStoreStats {
    pub aggregate_calls: u64,
    pub slots_written: u64,
    pub fetch_calls: u64,
    pub keys_fetched: u64,
    pub cas_attempts: u64,
    pub cas_conflicts: u64,
    pub keys_expired: u64,
}

/// In-memory key-value store with per-key expiration.
///
/// Expired keys are dropped when a read touches them and by a full sweep
/// every `sweep_interval` aggregate calls.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    stats: Mutex<MemoryStoreStats>,
    sweep_interval: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            stats: Mutex::new(MemoryStoreStats::default()),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Sweep expired keys every `interval` aggregate calls; 0 disables it.
    pub fn with_sweep_interval(mut self, interval: u64) -> Self {
        self.sweep_interval = interval;
        self
    }

    fn record_expired(&self, count: usize) {
        if count > 0 {
            self.stats.lock().keys_expired += count as u64;
        }
    }

    fn expiry(&self, now: DateTime<Utc>, ttl: i64) -> DateTime<Utc> {
        now + Duration::seconds(ttl)
    }

    /// Get the live contents of a key.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = self.clock.now();
        let (expired, data) = {
            let mut entries = self.entries.lock();
            let expired = evict_expired(&mut entries, key, now);
            (expired, entries.get(key).map(|e| e.data.clone()))
        };
        self.record_expired(expired as usize);
        data
    }

    /// Overwrite a key. `ttl` of `None` keeps it forever.
    pub fn set(&self, key: impl Into<String>, data: Vec<u8>, ttl: Option<i64>) {
        let now = self.clock.now();
        let entry = Entry {
            data,
            expires_at: ttl.map(|ttl| self.expiry(now, ttl)),
        };
        self.entries.lock().insert(key.into(), entry);
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Remaining lifetime of a live key in whole seconds; `None` if the key
    /// is absent, expired, or never expires.
    pub fn ttl(&self, key: &str) -> Option<i64> {
        let now = self.clock.now();
        let (expired, ttl) = {
            let mut entries = self.entries.lock();
            let expired = evict_expired(&mut entries, key, now);
            let ttl = entries
                .get(key)
                .and_then(|e| e.expires_at)
                .map(|at| (at - now).num_seconds());
            (expired, ttl)
        };
        self.record_expired(expired as usize);
        ttl
    }

    /// Live keys, sorted. Drops every expired key on the way.
    pub fn keys(&self) -> Vec<String> {
        self.purge_expired();
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Entries held, including expired ones not yet dropped.
    pub fn raw_len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let removed = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|_, e| e.is_live(now));
            before - entries.len()
        };

        if removed > 0 {
            self.record_expired(removed);
            tracing::debug!("Purged {} expired chunks", removed);
        }
        removed
    }

    pub fn stats(&self) -> MemoryStoreStats {
        self.stats.lock().clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkStore for MemoryStore {
    fn aggregate(&self, batch: &SlotBatch) -> Result<()> {
        let now = self.clock.now();
        let expires_at = self.expiry(now, batch.ttl);

        {
            let mut entries = self.entries.lock();
            for (key, value) in batch.iter() {
                let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                    data: Vec::new(),
                    expires_at: None,
                });
                if !entry.is_live(now) {
                    entry.data.clear();
                }
                apply_sample(batch.layout, batch.method, &mut entry.data, batch.slot, value);
                entry.expires_at = Some(expires_at);
            }
        }

        let calls = {
            let mut stats = self.stats.lock();
            stats.aggregate_calls += 1;
            stats.slots_written += batch.len() as u64;
            stats.aggregate_calls
        };
        if self.sweep_interval > 0 && calls % self.sweep_interval == 0 {
            self.purge_expired();
        }
        Ok(())
    }

    fn fetch_chunks(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.get_many(keys)
    }
}

impl CasBackend for MemoryStore {
    fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let now = self.clock.now();
        let mut expired = 0;
        let chunks = {
            let mut entries = self.entries.lock();
            keys.iter()
                .map(|key| {
                    expired += evict_expired(&mut entries, key, now) as u64;
                    entries.get(key).map(|e| e.data.clone())
                })
                .collect()
        };

        let mut stats = self.stats.lock();
        stats.keys_expired += expired;
        stats.fetch_calls += 1;
        stats.keys_fetched += keys.len() as u64;
        Ok(chunks)
    }

    fn compare_and_swap(&self, key: &str, expected: Option<&[u8]>, new: &[u8], ttl: i64) -> Result<bool> {
        let now = self.clock.now();
        let swapped = {
            let mut entries = self.entries.lock();
            if evict_expired(&mut entries, key, now) {
                self.record_expired(1);
            }
            let current = entries.get(key).map(|e| e.data.as_slice());

            if current == expected {
                entries.insert(
                    key.to_string(),
                    Entry {
                        data: new.to_vec(),
                        expires_at: Some(self.expiry(now, ttl)),
                    },
                );
                true
            } else {
                false
            }
        };

        let mut stats = self.stats.lock();
        stats.cas_attempts += 1;
        if !swapped {
            stats.cas_conflicts += 1;
        }
        Ok(swapped)
    }
}

// =============================================================================
// Tests
// =============================================================================
