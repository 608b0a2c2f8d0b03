use crate::bucket::LeakyBucket;
use crate::cache::{CacheShared, FaultTolerantCache};
use crate::error::{BoxError, BuildError, LoadError};
use crate::executor::{Executor, SpawnExecutor};
use crate::metrics::Metrics;
use crate::refresh_queue::RefreshQueue;
use crate::refresher::{BulkReloader, ExceptionListener, Loader, Refresher};
use crate::segment::{Freshness, Segment};

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::CachePadded;

const DEFAULT_CONCURRENCY_LEVEL: usize = 4;
const DEFAULT_BULK_RELOAD_SIZE_LIMIT: usize = 100;

/// A builder for [`FaultTolerantCache`].
pub struct CacheBuilder<K, V> {
  maximum_size: usize,
  concurrency_level: usize,
  expire_after_write: Option<Duration>,
  refresh_after_write: Option<Duration>,
  asynchronous_refresh_after_write: Option<Duration>,
  executor: Option<Arc<dyn Executor>>,
  loader: Option<Loader<K, V>>,
  reloader: Option<BulkReloader<K, V>>,
  bulk_reload_size_limit: usize,
  failure_rate_limit: Option<(f64, f64)>,
  exception_listener: Option<ExceptionListener>,
}

impl<K, V> fmt::Debug for CacheBuilder<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("maximum_size", &self.maximum_size)
      .field("concurrency_level", &self.concurrency_level)
      .field("expire_after_write", &self.expire_after_write)
      .field("refresh_after_write", &self.refresh_after_write)
      .field(
        "asynchronous_refresh_after_write",
        &self.asynchronous_refresh_after_write,
      )
      .field("bulk_reload_size_limit", &self.bulk_reload_size_limit)
      .field("failure_rate_limit", &self.failure_rate_limit)
      .field("has_loader", &self.loader.is_some())
      .field("has_reloader", &self.reloader.is_some())
      .finish_non_exhaustive()
  }
}

impl<K, V> CacheBuilder<K, V> {
  pub fn new() -> Self {
    Self {
      maximum_size: 0,
      concurrency_level: DEFAULT_CONCURRENCY_LEVEL,
      expire_after_write: None,
      refresh_after_write: None,
      asynchronous_refresh_after_write: None,
      executor: None,
      loader: None,
      reloader: None,
      bulk_reload_size_limit: DEFAULT_BULK_RELOAD_SIZE_LIMIT,
      failure_rate_limit: None,
      exception_listener: None,
    }
  }

  /// Maximum number of entries in the cache; 0 disables the limit.
  ///
  /// When more entries than this are loaded, the least recently accessed
  /// entry is removed. The cap is divided evenly across segments, rounded
  /// up.
  pub fn maximum_size(mut self, maximum_size: usize) -> Self {
    self.maximum_size = maximum_size;
    self
  }

  /// Number of independently locked segments. This option is less common to
  /// configure; the default is 4.
  pub fn concurrency_level(mut self, concurrency_level: usize) -> Self {
    self.concurrency_level = concurrency_level;
    self
  }

  /// Duration after which using an entry triggers a foreground reload whose
  /// failure is returned to the caller. This duration should be long enough.
  pub fn expire_after_write(mut self, duration: Duration) -> Self {
    self.expire_after_write = Some(duration);
    self
  }

  /// Duration after which using an entry triggers a foreground maintenance
  /// reload. Failure of a maintenance reload is not raised; the cached value
  /// is served. Usually shorter than `expire_after_write`.
  pub fn refresh_after_write(mut self, duration: Duration) -> Self {
    self.refresh_after_write = Some(duration);
    self
  }

  /// Duration after which using an entry triggers a background maintenance
  /// reload. Usually the shortest of the three horizons.
  pub fn asynchronous_refresh_after_write(mut self, duration: Duration) -> Self {
    self.asynchronous_refresh_after_write = Some(duration);
    self
  }

  /// Overrides where background refreshes run. The default spawns a thread
  /// per drain.
  pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
    self.executor = Some(executor);
    self
  }

  /// Sets the loader. Required.
  pub fn loader(
    mut self,
    loader: impl Fn(&K) -> Result<V, BoxError> + Send + Sync + 'static,
  ) -> Self {
    self.loader = Some(Arc::new(loader));
    self
  }

  /// Sets a bulk reloader.
  ///
  /// The bulk reloader is called instead of the loader when multiple keys
  /// are queued for maintenance refresh: by `refresh`/`refresh_now`, and by
  /// `get` when the asynchronous refresh horizon has passed. It receives the
  /// batch of keys and a sink to push each `(key, value)` it produces.
  pub fn reloader(
    mut self,
    reloader: impl Fn(&[K], &mut dyn FnMut(K, V)) -> Result<(), BoxError> + Send + Sync + 'static,
  ) -> Self {
    self.reloader = Some(Arc::new(reloader));
    self
  }

  /// Maximum number of keys handed to the reloader at once. A smaller limit
  /// means more reloader calls.
  pub fn bulk_reload_size_limit(mut self, bulk_reload_size_limit: usize) -> Self {
    self.bulk_reload_size_limit = bulk_reload_size_limit;
    self
  }

  /// Enables failure rate limiting backed by a [`LeakyBucket`].
  ///
  /// When enabled, reload attempts are skipped while loads fail too
  /// frequently; a skipped attempt behaves like a repetition of the previous
  /// failure without calling the loader.
  pub fn failure_rate_limit(mut self, burst_limit: f64, allowed_failures_per_second: f64) -> Self {
    self.failure_rate_limit = Some((burst_limit, allowed_failures_per_second));
    self
  }

  /// Observes every loader and reloader failure, including rate-limit
  /// rejections. Best-effort; must not panic.
  pub fn exception_listener(mut self, listener: impl Fn(&LoadError) + Send + Sync + 'static) -> Self {
    self.exception_listener = Some(Arc::new(listener));
    self
  }
}

impl<K, V> CacheBuilder<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  /// Builds the cache.
  pub fn build(mut self) -> Result<FaultTolerantCache<K, V>, BuildError> {
    let loader = self.loader.take().ok_or(BuildError::MissingLoader)?;

    let num_segments = self.concurrency_level.max(1);
    let maximum_size_per_segment = if self.maximum_size == 0 {
      0
    } else {
      ((self.maximum_size + num_segments - 1) / num_segments).max(1)
    };

    let failure_rate_limit = self.failure_rate_limit.map(|(burst, per_second)| {
      LeakyBucket::builder()
        .capacity(burst)
        .leak_rate(per_second)
        .build()
    });

    let metrics = Arc::new(Metrics::new());
    let refresher = Arc::new(Refresher::new(
      loader,
      self.reloader.take(),
      failure_rate_limit,
      self.exception_listener.take(),
      metrics.clone(),
    ));
    let executor = self
      .executor
      .take()
      .unwrap_or_else(|| Arc::new(SpawnExecutor));
    let refresh_queue = Arc::new(RefreshQueue::new(
      executor,
      refresher.clone(),
      self.bulk_reload_size_limit,
      metrics.clone(),
    ));

    let segments: Vec<CachePadded<Segment<K, V>>> = (0..num_segments)
      .map(|_| CachePadded::new(Segment::new()))
      .collect();

    Ok(FaultTolerantCache {
      shared: Arc::new(CacheShared {
        segments: segments.into_boxed_slice(),
        hasher: ahash::RandomState::new(),
        freshness: Freshness::new(
          self.expire_after_write,
          self.refresh_after_write,
          self.asynchronous_refresh_after_write,
        ),
        maximum_size_per_segment,
        refresher,
        refresh_queue,
        metrics,
      }),
    })
  }
}

impl<K, V> Default for CacheBuilder<K, V> {
  fn default() -> Self {
    Self::new()
  }
}
