//! In-memory cache implementation
//!
//! Bounded, thread-safe map with per-entry time-to-live. Expired entries are
//! invisible to readers immediately and are physically removed when the
//! cache needs room.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use nlu_core::cache::Cache;

/// Entry in the memory cache
#[derive(Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    /// When this entry expires (None for no expiration)
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}

/// Configuration for the memory cache
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// Name used in log lines
    pub name: String,
    /// TTL for entries
    pub ttl: Option<Duration>,
    /// Maximum number of entries
    pub max_entries: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            name: "cache".to_string(),
            ttl: Some(Duration::from_secs(3600)),
            max_entries: 1000,
        }
    }
}

impl MemoryCacheConfig {
    pub fn new(name: &str, ttl: Option<Duration>, max_entries: usize) -> Self {
        Self {
            name: name.to_string(),
            ttl,
            max_entries,
        }
    }
}

/// Thread-safe TTL cache
pub struct MemoryCache<K, V> {
    entries: Arc<RwLock<HashMap<K, CacheEntry<V>>>>,
    config: MemoryCacheConfig,
}

impl<K, V> Clone for MemoryCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            config: self.config.clone(),
        }
    }
}

impl<K, V> MemoryCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::with_capacity(config.max_entries.min(1024)))),
            config,
        }
    }

    /// Make room for one entry: expired entries go first, then the oldest.
    fn evict(&self, entries: &mut HashMap<K, CacheEntry<V>>, now: Instant) {
        let before = entries.len();
        entries.retain(|_, v| !v.is_expired(now));
        if entries.len() < before {
            debug!(
                cache = %self.config.name,
                removed = before - entries.len(),
                "Evicted expired entries"
            );
            if entries.len() < self.config.max_entries {
                return;
            }
        }

        let oldest = entries
            .iter()
            .min_by_key(|(_, v)| v.inserted_at)
            .map(|(k, _)| k.clone());

        if let Some(key) = oldest {
            entries.remove(&key);
            trace!(cache = %self.config.name, "Evicted oldest entry");
        }
    }
}

impl<K, V> Cache<K, V> for MemoryCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let entries = self.entries.read();

        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                trace!(cache = %self.config.name, "Cache hit");
                Some(entry.value.clone())
            }
            _ => {
                trace!(cache = %self.config.name, "Cache miss");
                None
            }
        }
    }

    fn insert(&self, key: K, value: V) {
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            inserted_at: now,
            // A deadline past the clock's range never expires
            expires_at: self.config.ttl.and_then(|ttl| now.checked_add(ttl)),
        };

        let mut entries = self.entries.write();

        // Evict if at capacity
        if entries.len() >= self.config.max_entries && !entries.contains_key(&key) {
            self.evict(&mut entries, now);
        }

        entries.insert(key, entry);
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn clear(&self) {
        self.entries.write().clear();
        debug!(cache = %self.config.name, "Cleared all cache entries");
    }
}
