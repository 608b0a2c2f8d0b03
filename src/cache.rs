use crate::builder::CacheBuilder;
use crate::entry::CacheEntry;
use crate::error::LoadError;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::refresh_queue::RefreshQueue;
use crate::refresher::Refresher;
use crate::segment::{Freshness, GetPlan, Segment};

use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_utils::CachePadded;

pub(crate) fn hash_key<K: Hash>(hasher: &ahash::RandomState, key: &K) -> u64 {
  let mut state = hasher.build_hasher();
  key.hash(&mut state);
  state.finish()
}

pub(crate) struct CacheShared<K: Eq + Hash + Clone, V> {
  pub(crate) segments: Box<[CachePadded<Segment<K, V>>]>,
  pub(crate) hasher: ahash::RandomState,
  pub(crate) freshness: Freshness,
  // Per-segment cap; 0 disables the size limit.
  pub(crate) maximum_size_per_segment: usize,
  pub(crate) refresher: Arc<Refresher<K, V>>,
  pub(crate) refresh_queue: Arc<RefreshQueue<K, V>>,
  pub(crate) metrics: Arc<Metrics>,
}

/// A cache that keeps serving cached entries when reloading fails.
///
/// `FaultTolerantCache` is useful when your system loads data from a remote
/// server and should stay alive while that server is down. During an outage,
/// cached entries remain visible for longer than the regular refresh period.
///
/// The worst case is a server that is not down but extremely slow. To
/// contain the impact, the cache refreshes entries on background workers
/// and uses the calling thread only when an entry is older than the hard
/// expiry horizon, or was never loaded; on those paths loader errors pass
/// through to the caller.
pub struct FaultTolerantCache<K: Eq + Hash + Clone, V> {
  pub(crate) shared: Arc<CacheShared<K, V>>,
}

impl<K: Eq + Hash + Clone, V> Clone for FaultTolerantCache<K, V> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<K: Eq + Hash + Clone, V> fmt::Debug for FaultTolerantCache<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FaultTolerantCache")
      .field("segments", &self.shared.segments.len())
      .field("maximum_size_per_segment", &self.shared.maximum_size_per_segment)
      .finish_non_exhaustive()
  }
}

impl<K, V> FaultTolerantCache<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  /// Creates a new builder.
  pub fn builder() -> CacheBuilder<K, V> {
    CacheBuilder::new()
  }

  /// Returns the cached value, loading or reloading it as its age demands.
  ///
  /// Depending on when the entry was last written this behaves differently:
  ///
  /// - Past `expire_after_write`, or never loaded: the loader runs on the
  ///   current thread and its error, if any, is returned.
  /// - Past `refresh_after_write`: the loader runs on the current thread; on
  ///   failure the cached value is returned instead of the error.
  /// - Past `asynchronous_refresh_after_write`: the cached value is returned
  ///   and the key is enqueued for a background refresh.
  /// - Otherwise: the cached value is returned.
  pub fn get(&self, key: &K) -> Result<Arc<V>, LoadError> {
    let shared = &self.shared;
    let plan = self.segment_of(key).plan_get(
      key,
      &shared.freshness,
      shared.maximum_size_per_segment,
      &shared.metrics,
    );
    match plan {
      GetPlan::Fresh(value) => {
        shared.metrics.hits.fetch_add(1, Ordering::Relaxed);
        Ok(value)
      }
      GetPlan::Mandatory(entry) => {
        shared.metrics.misses.fetch_add(1, Ordering::Relaxed);
        shared.refresher.refresh_or_join(&entry).map(|v| v.value())
      }
      GetPlan::AsyncRefresh(entry, current) => {
        shared.metrics.hits.fetch_add(1, Ordering::Relaxed);
        RefreshQueue::add(&shared.refresh_queue, entry);
        Ok(current.value())
      }
      GetPlan::SyncRefresh(entry, current) => {
        shared.metrics.hits.fetch_add(1, Ordering::Relaxed);
        match shared.refresher.refresh_or_join(&entry) {
          Ok(version) => Ok(version.value()),
          // A maintenance refresh failing is not the caller's problem while
          // a servable version exists.
          Err(_) => Ok(entry.current_version().unwrap_or(current).value()),
        }
      }
    }
  }

  /// Returns the cached value if present and not hard-expired.
  ///
  /// This never triggers loading.
  pub fn get_if_present(&self, key: &K) -> Option<Arc<V>> {
    let result = self.segment_of(key).get_if_present(key, &self.shared.freshness);
    match &result {
      Some(_) => self.shared.metrics.hits.fetch_add(1, Ordering::Relaxed),
      None => self.shared.metrics.misses.fetch_add(1, Ordering::Relaxed),
    };
    result
  }

  /// Removes the given key, returning whether it was cached.
  pub fn invalidate(&self, key: &K) -> bool {
    self.segment_of(key).invalidate(key, &self.shared.metrics)
  }

  /// Removes the given keys, returning whether at least one was cached.
  pub fn invalidate_keys<'a>(&self, keys: impl IntoIterator<Item = &'a K>) -> bool
  where
    K: 'a,
  {
    let mut changed = false;
    for key in keys {
      if self.invalidate(key) {
        changed = true;
      }
    }
    changed
  }

  /// Removes all keys.
  pub fn invalidate_all(&self) {
    for segment in self.shared.segments.iter() {
      segment.invalidate_all();
    }
  }

  /// Refreshes cached values that are due for refresh.
  ///
  /// Scans every segment; entries past a refresh horizon but not hard
  /// expired are enqueued, then the queue is drained on the calling thread.
  /// Hard-expired entries found along the way are dropped. Loader and
  /// reloader failures are not raised; they reach the exception listener.
  pub fn refresh(&self) {
    self.refresh_impl(false);
  }

  /// Refreshes all cached values.
  ///
  /// Same as [`refresh`](Self::refresh), except entries are enqueued whether
  /// or not they are due for refresh.
  pub fn refresh_now(&self) {
    self.refresh_impl(true);
  }

  /// Returns a snapshot of the cache's counters.
  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  fn refresh_impl(&self, all: bool) {
    let shared = &self.shared;
    let mut to_refresh: Vec<Arc<CacheEntry<K, V>>> = Vec::new();
    for segment in shared.segments.iter() {
      segment.collect_refreshable(&shared.freshness, all, &mut to_refresh);
    }
    if !to_refresh.is_empty() {
      shared.refresh_queue.add_all_no_run(to_refresh);
      shared.refresh_queue.run();
    }
  }

  fn segment_of(&self, key: &K) -> &Segment<K, V> {
    let shared = &self.shared;
    let index = hash_key(&shared.hasher, key) as usize % shared.segments.len();
    &shared.segments[index]
  }
}
