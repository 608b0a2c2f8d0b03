use crate::bucket::LeakyBucket;
use crate::entry::{CacheEntry, ValueVersion};
use crate::error::{BoxError, LoadError};
use crate::metrics::Metrics;
use crate::time;

use std::hash::Hash;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, Thread};

use ahash::{HashMap, HashMapExt};
use parking_lot::Mutex;

/// The single-key loader. Invoked on the calling thread by whichever thread
/// owns the reload.
pub(crate) type Loader<K, V> = Arc<dyn Fn(&K) -> Result<V, BoxError> + Send + Sync>;

/// The bulk reloader. Receives the claimed keys and a sink; every `(key,
/// value)` pushed into the sink resolves that key's reload.
pub(crate) type BulkReloader<K, V> =
  Arc<dyn Fn(&[K], &mut dyn FnMut(K, V)) -> Result<(), BoxError> + Send + Sync>;

/// Best-effort failure side channel.
pub(crate) type ExceptionListener = Arc<dyn Fn(&LoadError) + Send + Sync>;

enum HandleState<V> {
  Pending,
  Complete(Result<Arc<ValueVersion<V>>, LoadError>),
}

struct HandleInner<V> {
  state: HandleState<V>,
  waiters: Vec<Thread>,
}

/// A one-shot completion handle for an in-flight reload.
///
/// The owning thread completes it exactly once; any number of joining
/// threads block in `wait` and all observe the same result.
pub(crate) struct ReloadHandle<V> {
  inner: Mutex<HandleInner<V>>,
}

impl<V> ReloadHandle<V> {
  fn new() -> Self {
    Self {
      inner: Mutex::new(HandleInner {
        state: HandleState::Pending,
        waiters: Vec::new(),
      }),
    }
  }

  fn complete(&self, result: Result<Arc<ValueVersion<V>>, LoadError>) {
    let mut inner = self.inner.lock();
    inner.state = HandleState::Complete(result);
    for waiter in inner.waiters.drain(..) {
      waiter.unpark();
    }
  }

  fn wait(&self) -> Result<Arc<ValueVersion<V>>, LoadError> {
    loop {
      {
        let mut inner = self.inner.lock();
        match &inner.state {
          HandleState::Complete(result) => return result.clone(),
          HandleState::Pending => inner.waiters.push(thread::current()),
        }
      }
      thread::park();
    }
  }
}

impl<V> std::fmt::Debug for ReloadHandle<V> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ReloadHandle").finish_non_exhaustive()
  }
}

enum Claim<V> {
  /// This thread swapped its handle into the slot and runs the reload.
  Owned(Arc<ReloadHandle<V>>),
  /// Another thread's reload is in flight.
  InFlight(Arc<ReloadHandle<V>>),
}

/// Coordinates reloads so that each entry has at most one in flight.
///
/// Threads that lose the claim either join (await the owner's result) or
/// leave (background refresh finds the work already underway). The same
/// discipline applies to the bulk path, which claims a whole batch before
/// handing the keys to the bulk reloader.
pub(crate) struct Refresher<K, V> {
  loader: Loader<K, V>,
  reloader: Option<BulkReloader<K, V>>,
  failure_rate_limit: Option<LeakyBucket>,
  exception_listener: Option<ExceptionListener>,
  metrics: Arc<Metrics>,
}

impl<K, V> Refresher<K, V>
where
  K: Eq + Hash + Clone,
{
  pub(crate) fn new(
    loader: Loader<K, V>,
    reloader: Option<BulkReloader<K, V>>,
    failure_rate_limit: Option<LeakyBucket>,
    exception_listener: Option<ExceptionListener>,
    metrics: Arc<Metrics>,
  ) -> Self {
    Self {
      loader,
      reloader,
      failure_rate_limit,
      exception_listener,
      metrics,
    }
  }

  pub(crate) fn has_bulk_reloader(&self) -> bool {
    self.reloader.is_some()
  }

  /// Reloads the entry, or joins a reload already in flight and returns its
  /// result.
  pub(crate) fn refresh_or_join(
    &self,
    entry: &Arc<CacheEntry<K, V>>,
  ) -> Result<Arc<ValueVersion<V>>, LoadError> {
    match self.claim(entry) {
      Claim::Owned(handle) => self.run_owner(entry, &handle),
      Claim::InFlight(handle) => handle.wait(),
    }
  }

  /// Reloads the entry unless a reload is already in flight or the entry has
  /// been evicted. Failures are absorbed; they reach the listener and the
  /// failure bucket but never the caller.
  pub(crate) fn refresh_or_leave(&self, entry: &Arc<CacheEntry<K, V>>) {
    if entry.is_evicted() {
      return;
    }
    if let Claim::Owned(handle) = self.claim(entry) {
      let _ = self.run_owner(entry, &handle);
    }
  }

  /// Bulk variant of `refresh_or_leave`: claims what is claimable out of
  /// `entries` (deduplicated by key) and feeds the claimed keys to the bulk
  /// reloader in one call.
  pub(crate) fn refresh_or_leave_bulk(&self, entries: &[Arc<CacheEntry<K, V>>]) {
    let reloader = self
      .reloader
      .as_ref()
      .expect("bulk refresh requires a reloader");

    if let Some(bucket) = &self.failure_rate_limit {
      if bucket.available_capacity() < 1.0 {
        tracing::debug!("skipping bulk reload, failure rate limit reached");
        self.notify(&LoadError::RateLimited);
        return;
      }
    }

    let mut owned: HashMap<K, (Arc<CacheEntry<K, V>>, Arc<ReloadHandle<V>>)> = HashMap::new();
    let mut keys = Vec::new();
    for entry in entries {
      if owned.contains_key(entry.key()) {
        continue;
      }
      let mut slot = entry.refresh_lock().lock();
      if slot.is_none() {
        let handle = Arc::new(ReloadHandle::new());
        *slot = Some(handle.clone());
        drop(slot);
        keys.push(entry.key().clone());
        owned.insert(entry.key().clone(), (entry.clone(), handle));
      }
    }
    if keys.is_empty() {
      return;
    }

    let result = reloader(&keys, &mut |key, value| {
      if let Some((entry, handle)) = owned.remove(&key) {
        let version = Arc::new(ValueVersion::new(value, time::now_millis()));
        Self::publish(&entry, &handle, Ok(version));
      }
    });

    match result {
      Ok(()) => {
        // The reloader answered without these keys. Fail their handles so
        // concurrent joiners are not stranded on a cleared lock.
        for (_key, (entry, handle)) in owned.drain() {
          Self::publish(&entry, &handle, Err(LoadError::Reloader(None)));
        }
      }
      Err(cause) => {
        let err = LoadError::Reloader(Some(cause.into()));
        self.metrics.load_failures.fetch_add(1, Ordering::Relaxed);
        if let Some(bucket) = &self.failure_rate_limit {
          bucket.flow_in(1.0);
        }
        tracing::warn!(error = %err, "bulk reload failed");
        self.notify(&err);
        for (_key, (entry, handle)) in owned.drain() {
          Self::publish(&entry, &handle, Err(err.clone()));
        }
      }
    }
  }

  fn claim(&self, entry: &CacheEntry<K, V>) -> Claim<V> {
    let mut slot = entry.refresh_lock().lock();
    match &*slot {
      Some(handle) => Claim::InFlight(handle.clone()),
      None => {
        let handle = Arc::new(ReloadHandle::new());
        *slot = Some(handle.clone());
        Claim::Owned(handle)
      }
    }
  }

  fn run_owner(
    &self,
    entry: &CacheEntry<K, V>,
    handle: &Arc<ReloadHandle<V>>,
  ) -> Result<Arc<ValueVersion<V>>, LoadError> {
    if let Some(bucket) = &self.failure_rate_limit {
      if bucket.available_capacity() < 1.0 {
        let err = LoadError::RateLimited;
        Self::publish(entry, handle, Err(err.clone()));
        tracing::debug!("skipping reload, failure rate limit reached");
        self.notify(&err);
        return Err(err);
      }
    }

    self.metrics.loads.fetch_add(1, Ordering::Relaxed);
    match (self.loader)(entry.key()) {
      Ok(value) => {
        let version = Arc::new(ValueVersion::new(value, time::now_millis()));
        Self::publish(entry, handle, Ok(version.clone()));
        Ok(version)
      }
      Err(cause) => {
        let err = LoadError::Loader(cause.into());
        Self::publish(entry, handle, Err(err.clone()));
        self.metrics.load_failures.fetch_add(1, Ordering::Relaxed);
        if let Some(bucket) = &self.failure_rate_limit {
          bucket.flow_in(1.0);
        }
        tracing::debug!(error = %err, "reload failed");
        self.notify(&err);
        Err(err)
      }
    }
  }

  // The completion hook: on success the new version becomes current, and in
  // every case the lock slot is cleared before waiters wake, so the next
  // refresh_or_join starts a fresh reload.
  fn publish(
    entry: &CacheEntry<K, V>,
    handle: &ReloadHandle<V>,
    result: Result<Arc<ValueVersion<V>>, LoadError>,
  ) {
    if let Ok(version) = &result {
      entry.set_current_version(version.clone());
    }
    *entry.refresh_lock().lock() = None;
    handle.complete(result);
  }

  fn notify(&self, err: &LoadError) {
    if let Some(listener) = &self.exception_listener {
      listener(err);
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn handle_wait_returns_completed_result() {
    let handle = Arc::new(ReloadHandle::new());
    let version = Arc::new(ValueVersion::new("v", 7));
    handle.complete(Ok(version));

    let got = handle.wait().unwrap();
    assert_eq!(*got.value(), "v");
    assert_eq!(got.written_at(), 7);
  }

  #[test]
  fn handle_wakes_parked_waiters() {
    let handle = Arc::new(ReloadHandle::<&str>::new());
    let waiter = {
      let handle = handle.clone();
      thread::spawn(move || handle.wait())
    };
    // Give the waiter a moment to park.
    thread::sleep(std::time::Duration::from_millis(50));
    handle.complete(Err(LoadError::RateLimited));

    let result = waiter.join().unwrap();
    assert!(matches!(result, Err(LoadError::RateLimited)));
  }
}
