//! Bounded, time-expiring result cache.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::time::Instant;

/// Default capacity.
pub const DEFAULT_MAX_SIZE: usize = 100;

/// Default time-to-live (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    seq: u64,
    ttl: Duration,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    next_seq: u64,
}

/// Result cache with TTL expiry and oldest-insertion eviction.
///
/// Expiry is lazy: an entry is dropped when a `get` finds it stale. When
/// full, inserting a new key evicts the entry inserted longest ago, whether
/// or not it was read since.
pub struct ResultCache<V> {
    inner: Mutex<Inner<V>>,
    max_size: usize,
    ttl: Duration,
}

impl<V: Clone> Default for ResultCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, DEFAULT_TTL)
    }
}

impl<V: Clone> ResultCache<V> {
    /// Create a cache holding at most `max_size` entries for `ttl` each.
    #[must_use]
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(max_size.min(1024)),
                next_seq: 0,
            }),
            max_size,
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a live entry, dropping it if it has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.lock();
        let entry = inner.entries.get(key)?;
        if entry.inserted_at.elapsed() >= entry.ttl {
            inner.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    /// Insert with the cache-wide TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.ttl);
    }

    /// Insert with a per-entry TTL. Re-setting a key refreshes its value and
    /// insertion time.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        if self.max_size == 0 {
            return;
        }

        let key = key.into();
        let mut inner = self.lock();
        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_size {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| (e.inserted_at, e.seq))
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
                tracing::debug!(key = %oldest, "Evicted oldest cache entry");
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                seq,
                ttl,
            },
        );
    }

    /// Remove a single entry.
    pub fn remove(&self, key: &str) -> Option<V> {
        self.lock().entries.remove(key).map(|e| e.value)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Number of stored entries, expired ones included until read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is stored, without checking expiry.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Configured capacity.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Configured default TTL.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }
}
