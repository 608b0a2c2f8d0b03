use crate::refresher::ReloadHandle;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

/// An immutable value together with the monotonic millisecond it was loaded.
///
/// Every successful reload produces a fresh version; freshness classification
/// compares `written_at` against the configured horizons.
#[derive(Debug)]
pub(crate) struct ValueVersion<V> {
  value: Arc<V>,
  written_at: u64,
}

impl<V> ValueVersion<V> {
  pub(crate) fn new(value: V, written_at: u64) -> Self {
    Self {
      value: Arc::new(value),
      written_at,
    }
  }

  #[inline]
  pub(crate) fn value(&self) -> Arc<V> {
    self.value.clone()
  }

  #[inline]
  pub(crate) fn written_at(&self) -> u64 {
    self.written_at
  }
}

/// One record per present key.
///
/// The entry outlives its residence in a segment: an in-flight reload keeps
/// it alive after eviction and may still publish a version to it, but an
/// evicted entry is never found by later lookups.
#[derive(Debug)]
pub(crate) struct CacheEntry<K, V> {
  key: K,
  // Absent only before the first successful load. Updated exclusively by the
  // completion of a reload; failures leave it untouched.
  current_version: RwLock<Option<Arc<ValueVersion<V>>>>,
  // Claim-or-observe slot. Whoever swaps in a handle owns the reload; the
  // completion path clears the slot before waking joiners.
  refresh_lock: Mutex<Option<Arc<ReloadHandle<V>>>>,
  // Hint that the entry left its segment; background refresh short-circuits
  // on it.
  evicted: AtomicBool,
}

impl<K, V> CacheEntry<K, V> {
  pub(crate) fn new(key: K) -> Self {
    Self {
      key,
      current_version: RwLock::new(None),
      refresh_lock: Mutex::new(None),
      evicted: AtomicBool::new(false),
    }
  }

  #[inline]
  pub(crate) fn key(&self) -> &K {
    &self.key
  }

  #[inline]
  pub(crate) fn current_version(&self) -> Option<Arc<ValueVersion<V>>> {
    self.current_version.read().clone()
  }

  pub(crate) fn set_current_version(&self, version: Arc<ValueVersion<V>>) {
    *self.current_version.write() = Some(version);
  }

  pub(crate) fn refresh_lock(&self) -> &Mutex<Option<Arc<ReloadHandle<V>>>> {
    &self.refresh_lock
  }

  #[inline]
  pub(crate) fn is_evicted(&self) -> bool {
    self.evicted.load(Ordering::Acquire)
  }

  pub(crate) fn set_evicted(&self) {
    self.evicted.store(true, Ordering::Release);
  }
}
