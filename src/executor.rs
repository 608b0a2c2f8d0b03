use std::thread;

/// A way to run a task on a background worker.
///
/// The cache hands its background refresh batches to an `Executor` and only
/// requires eventual execution; ordering and threading are up to the
/// implementation. Production systems usually pass a handle to an existing
/// worker pool.
pub trait Executor: Send + Sync + 'static {
  /// Runs a type-erased task, now or later, on some thread.
  fn execute(&self, task: Box<dyn FnOnce() + Send>);
}

/// The default executor: runs each task on a freshly spawned thread.
///
/// Background refresh dispatches one task per drain, not per key, so the
/// spawn rate stays low. A single-threaded pool works just as well.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpawnExecutor;

impl Executor for SpawnExecutor {
  fn execute(&self, task: Box<dyn FnOnce() + Send>) {
    thread::spawn(task);
  }
}
