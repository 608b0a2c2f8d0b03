use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// The error type user-supplied loaders, reloaders, and retried operations
/// return.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A user error after it has been captured by the cache. Reloads are
/// single-flight, so one failure may be observed by many joining threads.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  /// No loader was configured. The cache cannot populate itself without one.
  MissingLoader,
}

impl fmt::Display for BuildError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BuildError::MissingLoader => write!(f, "a loader is required to build the cache"),
    }
  }
}

impl StdError for BuildError {}

/// Why a `get` could not produce a value.
///
/// Only the mandatory paths (no cached value, or the value is past the hard
/// expiry horizon) surface this to callers; everywhere else the cached value
/// wins and failures go to the exception listener.
#[derive(Debug, Clone)]
pub enum LoadError {
  /// The failure rate limit was reached, so the loader was not invoked.
  RateLimited,
  /// The loader returned an error.
  Loader(SharedError),
  /// The bulk reloader failed, or finished without producing a value for
  /// this key.
  Reloader(Option<SharedError>),
}

impl fmt::Display for LoadError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LoadError::RateLimited => write!(f, "failure rate limit reached"),
      LoadError::Loader(err) => write!(f, "loader failed: {}", err),
      LoadError::Reloader(Some(err)) => write!(f, "bulk reloader failed: {}", err),
      LoadError::Reloader(None) => write!(f, "bulk reloader produced no value for the key"),
    }
  }
}

impl StdError for LoadError {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    match self {
      LoadError::Loader(err) | LoadError::Reloader(Some(err)) => Some(&**err),
      _ => None,
    }
  }
}

/// Errors returned by [`RetryingExecutor`](crate::RetryingExecutor).
#[derive(Debug)]
pub enum RetryError {
  /// Retrying stopped. Carries the error from the first failed attempt.
  Giveup(BoxError),
  /// The backoff sleep was cut short through the stop signal.
  Interrupted,
}

impl fmt::Display for RetryError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RetryError::Giveup(first) => write!(f, "gave up retrying: {}", first),
      RetryError::Interrupted => write!(f, "retrying was interrupted"),
    }
  }
}

impl StdError for RetryError {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    match self {
      RetryError::Giveup(first) => Some(&**first),
      RetryError::Interrupted => None,
    }
  }
}
