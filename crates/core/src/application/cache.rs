// Bounded TTL cache for read-heavy store queries
//
// Eviction is by insertion time (oldest first), not LRU. Expired entries are
// dropped lazily on read; there is no background sweeper.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default maximum number of entries
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Default entry lifetime (5 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    seq: u64,
}

struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// (insertion instant, sequence) -> key; first entry is the oldest
    by_age: BTreeMap<(Instant, u64), String>,
    next_seq: u64,
}

impl<V> CacheInner<V> {
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.by_age.remove(&(entry.inserted_at, entry.seq));
        Some(entry)
    }
}

/// Size- and age-bounded key/value cache
pub struct BoundedCache<V> {
    inner: Mutex<CacheInner<V>>,
    max_entries: usize,
    ttl: Duration,
}

impl<V: Clone> BoundedCache<V> {
    /// # Arguments
    /// * `max_entries` - Capacity (clamped to at least 1)
    /// * `ttl` - Entries older than this are never returned
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                by_age: BTreeMap::new(),
                next_seq: 0,
            }),
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    /// Return a clone of the cached value if it is younger than the TTL
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get(key) {
            None => return None,
            Some(entry) => entry.inserted_at.elapsed() > self.ttl,
        };
        if expired {
            inner.remove(key);
            debug!(key = %key, "Cache entry expired");
            return None;
        }
        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Insert or refresh a value
    ///
    /// A new key at capacity evicts the single oldest entry. Re-setting an
    /// existing key refreshes its value and age without evicting anything.
    pub fn set(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let mut inner = self.inner.lock();

        let refreshing = inner.remove(&key).is_some();
        if !refreshing && inner.entries.len() >= self.max_entries {
            if let Some((_, oldest)) = inner.by_age.pop_first() {
                inner.entries.remove(&oldest);
                debug!(evicted = %oldest, "Cache at capacity, evicted oldest entry");
            }
        }

        let now = Instant::now();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.by_age.insert((now, seq), key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                seq,
            },
        );
    }

    /// Remove keys containing `pattern`, or everything when `None`
    ///
    /// Returns the number of removed entries.
    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        let mut inner = self.inner.lock();
        match pattern {
            None => {
                let removed = inner.entries.len();
                inner.entries.clear();
                inner.by_age.clear();
                removed
            }
            Some(pattern) => {
                let doomed: Vec<String> = inner
                    .entries
                    .keys()
                    .filter(|k| k.contains(pattern))
                    .cloned()
                    .collect();
                for key in &doomed {
                    inner.remove(key);
                }
                doomed.len()
            }
        }
    }

    pub fn clear(&self) {
        self.invalidate(None);
    }

    /// Number of stored entries, including expired ones not yet read
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-through helper: return the cached value or load, store and return it
    ///
    /// The lock is not held while `load` runs, so concurrent misses may load
    /// the same key twice; the last writer wins.
    pub async fn get_or_try_insert_with<E, F, Fut>(&self, key: &str, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let value = load().await?;
        self.set(key, value.clone());
        Ok(value)
    }
}

impl<V: Clone> Default for BoundedCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_TTL)
    }
}
