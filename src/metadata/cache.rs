//! Bounded loading cache
//!
//! An entry-count LRU over `lru::LruCache`. Values are handed out as `Arc`s,
//! so a caller holding a value keeps it alive after it is evicted.
//!
//! The whole lookup-load-insert sequence runs under one mutex: a miss triggers
//! exactly one load, and entries inserted by one thread are visible to the
//! next lookup on any thread. The load itself also runs under that mutex, so
//! concurrent misses are served one at a time, even for unrelated keys.

use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Hit/miss counters of a cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// LRU cache that loads missing values on demand
pub struct LoadingCache<K: Hash + Eq, V> {
    inner: Mutex<LruCache<K, Arc<V>>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K: Hash + Eq + Clone, V> LoadingCache<K, V> {
    /// Create a cache holding at most `capacity` entries (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            capacity: capacity.get(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<K, Arc<V>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached value for `key`, loading and inserting it on a miss
    ///
    /// A failed load inserts nothing.
    pub fn get_or_load<E, F>(&self, key: &K, load: F) -> Result<Arc<V>, E>
    where
        F: FnOnce(&K) -> Result<V, E>,
    {
        let mut cache = self.lock();
        if let Some(value) = cache.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(value));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = Arc::new(load(key)?);
        cache.put(key.clone(), Arc::clone(&value));
        Ok(value)
    }

    /// Insert or replace a value, evicting the least-recently-used entry if full
    pub fn insert(&self, key: K, value: V) {
        self.lock().put(key, Arc::new(value));
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains(key)
    }

    /// Keys currently cached, most recently used first
    pub fn keys(&self) -> Vec<K> {
        self.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl<K: Hash + Eq + Clone, V> std::fmt::Debug for LoadingCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadingCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
