//! Bounded TTL+LRU cache used for request memoization and indexing dedup.
//!
//! Entries expire `ttl` after creation regardless of access pattern; when the
//! store is at capacity, inserting a new key evicts the entry with the oldest
//! last-access time (true LRU, not insertion order). A background sweep task
//! bounds worst-case memory even when entries are never read again.

use std::{
  collections::HashMap,
  hash::Hash,
  sync::{Arc, Mutex},
  time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// A single cached value with its bookkeeping metadata.
///
/// The hit counter is diagnostics-only; eviction and expiry decisions use
/// only `created` and `last_access`.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
  value: V,
  created: Instant,
  last_access: Instant,
  hits: u64,
}

/// Cache statistics for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
  pub entries: usize,
  pub total_hits: u64,
}

/// TTL+LRU key/value store.
///
/// Cloning is cheap and shares the underlying store, so one cache can be
/// handed to every call site that needs it.
#[derive(Debug, Clone)]
pub struct BoundedCache<K, V> {
  inner: Arc<Mutex<HashMap<K, CacheEntry<V>>>>,
  max_size: usize,
  ttl: Duration,
}

impl<K, V> BoundedCache<K, V>
where
  K: Eq + Hash + Clone + Send + 'static,
  V: Clone + Send + 'static,
{
  pub fn new(max_size: usize, ttl: Duration) -> Self {
    Self {
      inner: Arc::new(Mutex::new(HashMap::new())),
      max_size,
      ttl,
    }
  }

  /// Get a value if present and not older than the TTL.
  ///
  /// Expired entries are lazily removed, so expiry holds even when no sweep
  /// has run. A hit refreshes the LRU timestamp.
  pub fn get(&self, key: &K) -> Option<V> {
    let mut map = self.inner.lock().unwrap();

    let expired = match map.get(key) {
      Some(entry) => entry.created.elapsed() >= self.ttl,
      None => return None,
    };

    if expired {
      map.remove(key);
      return None;
    }

    let entry = map.get_mut(key)?;
    entry.last_access = Instant::now();
    entry.hits += 1;
    Some(entry.value.clone())
  }

  /// Insert a value with fresh metadata.
  ///
  /// When at capacity and the key is new, the entry with the oldest
  /// last-access time is evicted first, so the store never exceeds
  /// `max_size` after the insertion completes.
  pub fn insert(&self, key: K, value: V) {
    let mut map = self.inner.lock().unwrap();

    while !map.contains_key(&key) && map.len() >= self.max_size {
      if let Some(oldest_key) = map
        .iter()
        .min_by_key(|(_, entry)| entry.last_access)
        .map(|(k, _)| k.clone())
      {
        trace!("Evicting least recently used cache entry");
        map.remove(&oldest_key);
      } else {
        break;
      }
    }

    let now = Instant::now();
    map.insert(
      key,
      CacheEntry {
        value,
        created: now,
        last_access: now,
        hits: 0,
      },
    );
  }

  /// Remove a single entry.
  pub fn remove(&self, key: &K) {
    self.inner.lock().unwrap().remove(key);
  }

  /// Empty the store unconditionally.
  pub fn clear(&self) {
    self.inner.lock().unwrap().clear();
  }

  pub fn len(&self) -> usize {
    self.inner.lock().unwrap().len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.lock().unwrap().is_empty()
  }

  /// Remove every entry older than the TTL regardless of access pattern.
  ///
  /// Returns the number of entries removed.
  pub fn sweep(&self) -> usize {
    let mut map = self.inner.lock().unwrap();
    let before = map.len();
    map.retain(|_, entry| entry.created.elapsed() < self.ttl);
    let removed = before - map.len();
    if removed > 0 {
      debug!(removed, remaining = map.len(), "Cache sweep removed expired entries");
    }
    removed
  }

  /// Get cache statistics.
  pub fn stats(&self) -> CacheStats {
    let map = self.inner.lock().unwrap();
    CacheStats {
      entries: map.len(),
      total_hits: map.values().map(|e| e.hits).sum(),
    }
  }

  /// Spawn the periodic sweep task. Runs until the token is cancelled.
  pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    let cache = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      // The first tick fires immediately; skip it so a fresh cache isn't swept at once
      ticker.tick().await;

      loop {
        tokio::select! {
          biased;

          _ = cancel.cancelled() => {
            debug!("Cache sweeper shutting down");
            break;
          }

          _ = ticker.tick() => {
            cache.sweep();
          }
        }
      }
    })
  }
}
