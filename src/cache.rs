//! Bounded TTL + LRU cache for resolved track metadata.
//!
//! One cache instance is constructed at startup and handed by reference to
//! every resolver; there is no process-global state. Expired entries are
//! dropped lazily on read and by a periodic sweep task, and inserting past
//! capacity evicts the least-recently-used entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::metadata::TrackDescriptor;

/// In-memory descriptor cache with TTL expiry and LRU eviction.
#[derive(Debug)]
pub struct MetadataCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    capacity: usize,
}

#[derive(Debug)]
struct CacheEntry {
    value: TrackDescriptor,
    inserted_at: Instant,
    last_access: Instant,
    hits: u64,
}

impl MetadataCache {
    /// Creates a cache holding at most `capacity` entries, each valid for
    /// `ttl` after insertion.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Looks up `key`, refreshing its recency and hit count.
    ///
    /// An expired entry is removed on the spot and reported as a miss.
    pub fn get(&self, key: &str) -> Option<TrackDescriptor> {
        let mut entries = self.entries.lock();
        let expired = matches!(
            entries.get(key),
            Some(entry) if entry.inserted_at.elapsed() >= self.ttl
        );
        if expired {
            entries.remove(key);
            debug!(%key, "expired cache entry dropped on read");
            return None;
        }
        entries.get_mut(key).map(|entry| {
            entry.hits += 1;
            entry.last_access = Instant::now();
            entry.value.clone()
        })
    }

    /// Stores `value` under `key`, evicting the least-recently-used entry
    /// when the cache is full and `key` is new.
    pub fn put(&self, key: String, value: TrackDescriptor) {
        let mut entries = self.entries.lock();
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let lru = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone());
            if let Some(lru) = lru {
                debug!(key = %lru, "evicting least recently used cache entry");
                entries.remove(&lru);
            }
        }
        let now = Instant::now();
        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                last_access: now,
                hits: 0,
            },
        );
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        before - entries.len()
    }

    /// Number of live entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// How often `key` has been served from the cache.
    pub fn hit_count(&self, key: &str) -> Option<u64> {
        self.entries.lock().get(key).map(|entry| entry.hits)
    }

    /// Spawns the periodic sweep task. It runs until `shutdown` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = self.evict_expired();
                        if evicted > 0 {
                            debug!(evicted, "swept expired metadata cache entries");
                        }
                    }
                }
            }
        })
    }
}
