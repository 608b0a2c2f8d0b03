use crate::access_order::AccessOrderList;
use crate::entry::{CacheEntry, ValueVersion};
use crate::metrics::Metrics;
use crate::time;

use std::hash::Hash;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use ahash::{HashMap, HashMapExt};
use parking_lot::Mutex;

/// The configured freshness horizons, in monotonic milliseconds.
///
/// An entry with `written_at = w` is classified against `now` as:
/// hard-expired when `w + expire < now`, sync-refresh-wanted when
/// `w + refresh < now`, async-refresh-wanted when `w + async_refresh < now`.
/// A `None` horizon disables that tier. An entry without a version is
/// treated as both refresh-wanted and hard-expired.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Freshness {
  expire_after_write: Option<u64>,
  refresh_after_write: Option<u64>,
  async_refresh_after_write: Option<u64>,
}

impl Freshness {
  pub(crate) fn new(
    expire_after_write: Option<Duration>,
    refresh_after_write: Option<Duration>,
    async_refresh_after_write: Option<Duration>,
  ) -> Self {
    let to_millis = |d: Duration| d.as_millis() as u64;
    Self {
      expire_after_write: expire_after_write.map(to_millis),
      refresh_after_write: refresh_after_write.map(to_millis),
      async_refresh_after_write: async_refresh_after_write.map(to_millis),
    }
  }

  fn hard_expired<V>(&self, version: &ValueVersion<V>, now: u64) -> bool {
    self
      .expire_after_write
      .map_or(false, |horizon| version.written_at() + horizon < now)
  }

  fn sync_refresh_wanted<V>(&self, version: &ValueVersion<V>, now: u64) -> bool {
    self
      .refresh_after_write
      .map_or(false, |horizon| version.written_at() + horizon < now)
  }

  fn refresh_wanted<V>(&self, version: &ValueVersion<V>, now: u64) -> bool {
    self.sync_refresh_wanted(version, now)
      || self
        .async_refresh_after_write
        .map_or(false, |horizon| version.written_at() + horizon < now)
  }
}

/// What `get` decided under the segment lock; the reload itself (if any)
/// happens after the lock is released.
pub(crate) enum GetPlan<K, V> {
  /// The cached value is fresh; no reload wanted.
  Fresh(Arc<V>),
  /// No servable value (miss or hard-expired): reload and propagate errors.
  Mandatory(Arc<CacheEntry<K, V>>),
  /// Sync-refresh horizon passed: reload, fall back to the current version
  /// on failure.
  SyncRefresh(Arc<CacheEntry<K, V>>, Arc<ValueVersion<V>>),
  /// Only the async horizon passed: enqueue a background refresh and serve
  /// the current version.
  AsyncRefresh(Arc<CacheEntry<K, V>>, Arc<ValueVersion<V>>),
}

struct SegmentInner<K: Eq + Hash + Clone, V> {
  map: HashMap<K, Arc<CacheEntry<K, V>>>,
  access_order: AccessOrderList<K>,
}

/// One lock's worth of the cache: a key-to-entry map plus the recency list
/// that drives LRU eviction. Both structures mutate only under the segment
/// lock and stay consistent with each other.
pub(crate) struct Segment<K: Eq + Hash + Clone, V> {
  inner: Mutex<SegmentInner<K, V>>,
}

impl<K, V> Segment<K, V>
where
  K: Eq + Hash + Clone,
{
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(SegmentInner {
        map: HashMap::new(),
        access_order: AccessOrderList::new(),
      }),
    }
  }

  /// Classifies the entry for `key` and records the touch. Creates the entry
  /// on a miss, evicting from the tail first when the segment is full.
  pub(crate) fn plan_get(
    &self,
    key: &K,
    freshness: &Freshness,
    maximum_size: usize,
    metrics: &Metrics,
  ) -> GetPlan<K, V> {
    let now = time::now_millis();
    let mut inner = self.inner.lock();

    let entry = match inner.map.get(key) {
      Some(entry) => entry.clone(),
      None => {
        // No entry yet. Insert one immediately so concurrent gets for the
        // same key join this thread's load instead of starting their own.
        Self::evict_for_insert(&mut inner, 1, maximum_size, metrics);
        let entry = Arc::new(CacheEntry::new(key.clone()));
        inner.map.insert(key.clone(), entry.clone());
        inner.access_order.push_front(key.clone());
        return GetPlan::Mandatory(entry);
      }
    };

    inner.access_order.move_to_front(key);
    match entry.current_version() {
      None => GetPlan::Mandatory(entry),
      Some(version) if freshness.hard_expired(&version, now) => GetPlan::Mandatory(entry),
      Some(version) if freshness.sync_refresh_wanted(&version, now) => {
        GetPlan::SyncRefresh(entry, version)
      }
      Some(version) if freshness.refresh_wanted(&version, now) => {
        GetPlan::AsyncRefresh(entry, version)
      }
      Some(version) => GetPlan::Fresh(version.value()),
    }
  }

  /// Returns the cached value if present and not hard-expired. Never loads,
  /// never enqueues a refresh; a served value still counts as a touch.
  pub(crate) fn get_if_present(&self, key: &K, freshness: &Freshness) -> Option<Arc<V>> {
    let now = time::now_millis();
    let mut inner = self.inner.lock();
    let entry = inner.map.get(key)?.clone();
    match entry.current_version() {
      None => None,
      Some(version) if freshness.hard_expired(&version, now) => None,
      Some(version) => {
        inner.access_order.move_to_front(key);
        Some(version.value())
      }
    }
  }

  /// Removes `key`, returning whether it was present.
  pub(crate) fn invalidate(&self, key: &K, metrics: &Metrics) -> bool {
    let mut inner = self.inner.lock();
    match inner.map.remove(key) {
      Some(entry) => {
        inner.access_order.remove(key);
        entry.set_evicted();
        metrics.invalidations.fetch_add(1, Ordering::Relaxed);
        true
      }
      None => false,
    }
  }

  /// Removes everything.
  pub(crate) fn invalidate_all(&self) {
    let mut inner = self.inner.lock();
    for entry in inner.map.values() {
      entry.set_evicted();
    }
    inner.map.clear();
    inner.access_order.clear();
  }

  /// Walks the recency list collecting entries due for refresh. Hard-expired
  /// entries are dropped on the way instead of collected.
  pub(crate) fn collect_refreshable(
    &self,
    freshness: &Freshness,
    all: bool,
    results: &mut Vec<Arc<CacheEntry<K, V>>>,
  ) {
    let now = time::now_millis();
    let mut inner = self.inner.lock();
    for key in inner.access_order.keys() {
      let entry = match inner.map.get(&key) {
        Some(entry) => entry.clone(),
        None => continue,
      };
      match entry.current_version() {
        Some(version) if !freshness.hard_expired(&version, now) => {
          if all || freshness.refresh_wanted(&version, now) {
            results.push(entry);
          }
        }
        // No version or past the hard horizon: lazily swept out.
        _ => {
          inner.map.remove(&key);
          inner.access_order.remove(&key);
          entry.set_evicted();
        }
      }
    }
  }

  fn evict_for_insert(
    inner: &mut SegmentInner<K, V>,
    num_to_add: usize,
    maximum_size: usize,
    metrics: &Metrics,
  ) {
    if maximum_size == 0 {
      return;
    }
    while inner.map.len() + num_to_add > maximum_size {
      match inner.access_order.pop_back() {
        Some(key) => {
          if let Some(entry) = inner.map.remove(&key) {
            entry.set_evicted();
            metrics.evicted_by_capacity.fetch_add(1, Ordering::Relaxed);
          }
        }
        None => break,
      }
    }
  }
}
