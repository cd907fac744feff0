//! Bounded TTL cache for computed feature vectors
//!
//! Maps a content fingerprint to the feature vector a previous inference
//! produced, so repeated detection of identical media skips the model.
//! Eviction is FIFO by insertion order (a `get` does not refresh an
//! entry's age) plus a periodic TTL sweep driven by the orchestrator's
//! maintenance thread.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// A cached feature vector with its insertion timestamp
#[derive(Debug, Clone)]
struct CacheEntry {
    features: Vec<f32>,
    inserted_at: Instant,
}

/// Map plus parallel FIFO queue of keys, guarded together by one mutex
#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

/// Cache occupancy snapshot
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub enabled: bool,
}

/// Thread-safe feature cache with capacity-bounded FIFO eviction and
/// TTL expiry
///
/// When constructed disabled, `get` always misses and `put` is a no-op,
/// so callers never special-case the disabled state.
pub struct FeatureCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    enabled: bool,
}

impl FeatureCache {
    /// Create a cache holding at most `capacity` entries
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: capacity.max(1),
            enabled: true,
        }
    }

    /// Create a pass-through cache that never stores anything
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: 0,
            enabled: false,
        }
    }

    /// Look up a feature vector by fingerprint
    ///
    /// Does not refresh the entry's insertion age.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        if !self.enabled {
            return None;
        }
        let inner = self.inner.lock().unwrap();
        inner.entries.get(key).map(|e| e.features.clone())
    }

    /// Insert a feature vector, evicting the oldest entry at capacity
    ///
    /// A re-insert under an existing key replaces the whole entry and
    /// its timestamp.
    pub fn put(&self, key: impl Into<String>, features: Vec<f32>) {
        if !self.enabled {
            return;
        }
        let key = key.into();
        let mut inner = self.inner.lock().unwrap();

        if inner.entries.contains_key(&key) {
            inner.order.retain(|k| k != &key);
        } else if inner.entries.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
                debug!(key = %oldest, "evicted oldest cache entry");
            }
        }

        inner.entries.insert(
            key.clone(),
            CacheEntry {
                features,
                inserted_at: Instant::now(),
            },
        );
        inner.order.push_back(key);
    }

    /// Remove every entry older than `ttl`
    ///
    /// O(n) per sweep; called infrequently from the maintenance thread.
    pub fn sweep_expired(&self, ttl: Duration) {
        self.sweep_expired_at(ttl, Instant::now());
    }

    fn sweep_expired_at(&self, ttl: Duration, now: Instant) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        let before = inner.entries.len();
        let CacheInner { entries, order } = &mut *inner;
        entries.retain(|_, entry| now.duration_since(entry.inserted_at) <= ttl);
        order.retain(|k| entries.contains_key(k));
        let removed = before - inner.entries.len();
        if removed > 0 {
            debug!(removed, remaining = inner.entries.len(), "swept expired cache entries");
        }
    }

    /// Number of entries currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// Check whether the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Occupancy snapshot for status reporting
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            capacity: self.capacity,
            enabled: self.enabled,
        }
    }
}
