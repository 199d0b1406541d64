//! Small TTL cache for market data responses

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// Best-effort cache: values expire after `ttl`, stale values stay readable
/// through [`TtlCache::get_stale`] for fallback paths.
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, Entry<V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value only
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().unwrap();
        entries
            .get(key)
            .filter(|e| e.inserted_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    /// Value regardless of age
    pub fn get_stale(&self, key: &K) -> Option<V> {
        self.entries.read().unwrap().get(key).map(|e| e.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.write().unwrap().insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop expired entries, returns how many were removed
    pub fn purge_expired(&self) -> usize {
        self.purge_older_than(self.ttl)
    }

    /// Drop entries inserted more than `max_age` ago
    pub fn purge_older_than(&self, max_age: Duration) -> usize {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, e| e.inserted_at.elapsed() < max_age);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
