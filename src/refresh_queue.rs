use crate::entry::CacheEntry;
use crate::executor::Executor;
use crate::metrics::Metrics;
use crate::refresher::Refresher;

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use ahash::{HashSet, HashSetExt};
use parking_lot::Mutex;

/// A deduplicated FIFO of entries awaiting background refresh.
///
/// `add` schedules a drain on the executor; `refresh`/`refresh_now` batch
/// with `add_all_no_run` and drain on the calling thread. Multiple workers
/// may drain concurrently and cooperatively empty the queue.
pub(crate) struct RefreshQueue<K, V> {
  // Entries already queued, keyed by identity. Guards against enqueueing the
  // same entry twice while its first refresh is still pending.
  deduper: Mutex<HashSet<usize>>,
  queue: Mutex<VecDeque<Arc<CacheEntry<K, V>>>>,
  executor: Arc<dyn Executor>,
  refresher: Arc<Refresher<K, V>>,
  bulk_reload_size_limit: usize,
  metrics: Arc<Metrics>,
}

impl<K, V> RefreshQueue<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  pub(crate) fn new(
    executor: Arc<dyn Executor>,
    refresher: Arc<Refresher<K, V>>,
    bulk_reload_size_limit: usize,
    metrics: Arc<Metrics>,
  ) -> Self {
    Self {
      deduper: Mutex::new(HashSet::new()),
      queue: Mutex::new(VecDeque::new()),
      executor,
      refresher,
      bulk_reload_size_limit,
      metrics,
    }
  }

  /// Enqueues the entry and schedules a worker, unless it is queued already.
  pub(crate) fn add(queue: &Arc<Self>, entry: Arc<CacheEntry<K, V>>) {
    if queue.mark_queued(&entry) {
      queue.queue.lock().push_back(entry);
      let worker = Arc::clone(queue);
      queue.executor.execute(Box::new(move || worker.run()));
    }
  }

  /// Enqueues a batch without scheduling a worker. The caller drains.
  pub(crate) fn add_all_no_run(&self, entries: Vec<Arc<CacheEntry<K, V>>>) {
    let fresh: Vec<_> = entries
      .into_iter()
      .filter(|entry| self.mark_queued(entry))
      .collect();
    if !fresh.is_empty() {
      self.queue.lock().extend(fresh);
    }
  }

  /// Drains the queue on the current thread.
  pub(crate) fn run(&self) {
    if self.refresher.has_bulk_reloader() {
      self.run_bulk();
    } else {
      self.run_single();
    }
  }

  fn run_single(&self) {
    loop {
      let entry = match self.queue.lock().pop_front() {
        Some(entry) => entry,
        None => return,
      };
      self.refresher.refresh_or_leave(&entry);
      self.metrics.background_refreshes.fetch_add(1, Ordering::Relaxed);
      self.unmark_queued(&entry);
    }
  }

  fn run_bulk(&self) {
    loop {
      let batch = self.take_batch();
      if batch.is_empty() {
        return;
      }
      self.refresher.refresh_or_leave_bulk(&batch);
      self
        .metrics
        .background_refreshes
        .fetch_add(batch.len() as u64, Ordering::Relaxed);
      for entry in &batch {
        self.unmark_queued(entry);
      }
    }
  }

  fn take_batch(&self) -> Vec<Arc<CacheEntry<K, V>>> {
    let mut queue = self.queue.lock();
    let take = queue.len().min(self.bulk_reload_size_limit);
    queue.drain(..take).collect()
  }

  fn mark_queued(&self, entry: &Arc<CacheEntry<K, V>>) -> bool {
    self.deduper.lock().insert(Arc::as_ptr(entry) as usize)
  }

  fn unmark_queued(&self, entry: &Arc<CacheEntry<K, V>>) {
    self.deduper.lock().remove(&(Arc::as_ptr(entry) as usize));
  }
}
