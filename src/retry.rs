use crate::error::{BoxError, RetryError};
use crate::time;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

type RetryPredicate = Arc<dyn Fn(&BoxError) -> bool + Send + Sync>;
type RetryHook = Arc<dyn Fn(&BoxError, u32, u32, Duration) + Send + Sync>;
type GiveupHook = Arc<dyn Fn(&BoxError, &BoxError) + Send + Sync>;

/// A flag that cancels the backoff sleep of
/// [`run_interruptible`](RetryingExecutor::run_interruptible).
///
/// Stopping is sticky: once signalled, every waiter returns immediately.
#[derive(Debug, Default)]
pub struct StopSignal {
  stopped: Mutex<bool>,
  condvar: Condvar,
}

impl StopSignal {
  pub fn new() -> Self {
    Self::default()
  }

  /// Signals every current and future waiter.
  pub fn stop(&self) {
    let mut stopped = self.stopped.lock();
    *stopped = true;
    self.condvar.notify_all();
  }

  pub fn is_stopped(&self) -> bool {
    *self.stopped.lock()
  }

  // Waits up to `timeout`; returns whether the signal fired.
  fn wait_timeout(&self, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let mut stopped = self.stopped.lock();
    while !*stopped {
      if self.condvar.wait_until(&mut stopped, deadline).timed_out() {
        return *stopped;
      }
    }
    true
  }
}

/// Runs fallible operations with retrying and exponential backoff.
///
/// Retrying stops when the retry count exceeds the limit, when the retry
/// predicate rejects the error, or when the next wait would overrun the
/// giveup timeout; the error of the first attempt is then returned inside
/// [`RetryError::Giveup`].
#[derive(Clone)]
pub struct RetryingExecutor {
  retry_limit: u32,
  initial_retry_wait: Duration,
  max_retry_wait: Duration,
  wait_grow_rate: f64,
  giveup_timeout: Option<Duration>,
  retry_predicate: Option<RetryPredicate>,
  on_retry: Option<RetryHook>,
  on_giveup: Option<GiveupHook>,
}

impl std::fmt::Debug for RetryingExecutor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RetryingExecutor")
      .field("retry_limit", &self.retry_limit)
      .field("initial_retry_wait", &self.initial_retry_wait)
      .field("max_retry_wait", &self.max_retry_wait)
      .field("wait_grow_rate", &self.wait_grow_rate)
      .field("giveup_timeout", &self.giveup_timeout)
      .finish_non_exhaustive()
  }
}

impl RetryingExecutor {
  /// Creates a new builder.
  pub fn builder() -> RetryingExecutorBuilder {
    RetryingExecutorBuilder::new()
  }

  /// Runs `op` until it succeeds or retrying gives up. The backoff sleep
  /// cannot be interrupted.
  pub fn run<T, F>(&self, op: F) -> Result<T, RetryError>
  where
    F: FnMut() -> Result<T, BoxError>,
  {
    self.run_impl(op, None)
  }

  /// Like [`run`](Self::run), but the backoff sleep is cut short when `stop`
  /// fires, returning [`RetryError::Interrupted`].
  pub fn run_interruptible<T, F>(&self, stop: &StopSignal, op: F) -> Result<T, RetryError>
  where
    F: FnMut() -> Result<T, BoxError>,
  {
    self.run_impl(op, Some(stop))
  }

  fn run_impl<T, F>(&self, mut op: F, stop: Option<&StopSignal>) -> Result<T, RetryError>
  where
    F: FnMut() -> Result<T, BoxError>,
  {
    let mut retry_count: u32 = 0;
    let giveup_at_nanos = self
      .giveup_timeout
      .map(|timeout| time::now_nanos() + timeout.as_nanos() as u64);
    let mut first: Option<BoxError> = None;

    loop {
      let err = match op() {
        Ok(value) => return Ok(value),
        Err(err) => err,
      };

      let retryable = self.retry_predicate.as_ref().map_or(true, |p| p(&err));
      if retry_count >= self.retry_limit || !retryable {
        let (first_err, last_err) = match first {
          Some(first_err) => (first_err, Some(err)),
          None => (err, None),
        };
        if let Some(hook) = &self.on_giveup {
          hook(&first_err, last_err.as_ref().unwrap_or(&first_err));
        }
        return Err(RetryError::Giveup(first_err));
      }

      // Exponential backoff with a hard cap.
      let wait_millis = (self.initial_retry_wait.as_millis() as f64
        * self.wait_grow_rate.powi(retry_count as i32))
      .min(self.max_retry_wait.as_millis() as f64);
      let wait = Duration::from_millis(wait_millis as u64);

      if let Some(deadline) = giveup_at_nanos {
        let remaining = Duration::from_nanos(deadline.saturating_sub(time::now_nanos()));
        if remaining <= wait {
          return Err(RetryError::Giveup(first.unwrap_or(err)));
        }
      }

      retry_count += 1;
      if let Some(hook) = &self.on_retry {
        hook(&err, retry_count, self.retry_limit, wait);
      }
      tracing::debug!(
        retry_count,
        retry_limit = self.retry_limit,
        wait_millis = wait.as_millis() as u64,
        "retrying after failure"
      );
      if first.is_none() {
        first = Some(err);
      }

      match stop {
        None => thread::sleep(wait),
        Some(signal) => {
          if signal.wait_timeout(wait) {
            return Err(RetryError::Interrupted);
          }
        }
      }
    }
  }
}

/// A builder for [`RetryingExecutor`].
#[derive(Clone)]
pub struct RetryingExecutorBuilder {
  retry_limit: u32,
  initial_retry_wait: Duration,
  max_retry_wait: Duration,
  wait_grow_rate: f64,
  giveup_timeout: Option<Duration>,
  retry_predicate: Option<RetryPredicate>,
  on_retry: Option<RetryHook>,
  on_giveup: Option<GiveupHook>,
}

impl RetryingExecutorBuilder {
  pub fn new() -> Self {
    Self {
      retry_limit: 5,
      initial_retry_wait: Duration::from_millis(500),
      max_retry_wait: Duration::from_secs(5 * 60),
      wait_grow_rate: 2.0,
      giveup_timeout: None,
      retry_predicate: None,
      on_retry: None,
      on_giveup: None,
    }
  }

  /// Maximum number of retries.
  pub fn retry_limit(mut self, count: u32) -> Self {
    self.retry_limit = count;
    self
  }

  /// The wait before the first retry.
  pub fn initial_retry_wait(mut self, wait: Duration) -> Self {
    self.initial_retry_wait = wait;
    self
  }

  /// The cap on the wait between retries.
  pub fn max_retry_wait(mut self, wait: Duration) -> Self {
    self.max_retry_wait = wait;
    self
  }

  /// Rate at which the wait grows: each retry waits the previous wait
  /// multiplied by this, capped by `max_retry_wait`. Default is 2.0.
  pub fn wait_grow_rate(mut self, rate: f64) -> Self {
    self.wait_grow_rate = rate;
    self
  }

  /// The wall-clock budget after which retrying gives up.
  ///
  /// Retrying stops when the retry count exceeds `retry_limit` or the total
  /// duration since the initial attempt would exceed this budget. Disabled
  /// by default.
  pub fn giveup_timeout(mut self, timeout: Duration) -> Self {
    self.giveup_timeout = Some(timeout);
    self
  }

  /// Decides whether a returned error is retryable. Retrying happens only
  /// when this returns `true`; the default retries every error.
  pub fn retry_if(mut self, predicate: impl Fn(&BoxError) -> bool + Send + Sync + 'static) -> Self {
    self.retry_predicate = Some(Arc::new(predicate));
    self
  }

  /// A hook invoked on every retry with the error, the retry count, the
  /// retry limit, and the upcoming wait. Useful for log messages.
  pub fn on_retry(
    mut self,
    hook: impl Fn(&BoxError, u32, u32, Duration) + Send + Sync + 'static,
  ) -> Self {
    self.on_retry = Some(Arc::new(hook));
    self
  }

  /// A hook invoked when retrying is given up, with the first and the last
  /// error.
  pub fn on_giveup(mut self, hook: impl Fn(&BoxError, &BoxError) + Send + Sync + 'static) -> Self {
    self.on_giveup = Some(Arc::new(hook));
    self
  }

  /// Creates the executor.
  pub fn build(self) -> RetryingExecutor {
    RetryingExecutor {
      retry_limit: self.retry_limit,
      initial_retry_wait: self.initial_retry_wait,
      max_retry_wait: self.max_retry_wait,
      wait_grow_rate: self.wait_grow_rate,
      giveup_timeout: self.giveup_timeout,
      retry_predicate: self.retry_predicate,
      on_retry: self.on_retry,
      on_giveup: self.on_giveup,
    }
  }
}

impl Default for RetryingExecutorBuilder {
  fn default() -> Self {
    Self::new()
  }
}
