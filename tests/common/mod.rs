use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sturdy::{BoxError, CacheBuilder, FaultTolerantCache};

/// A loader that appends "v" to the key and counts invocations.
pub fn counting_loader(
  load_count: Arc<AtomicUsize>,
) -> impl Fn(&String) -> Result<String, BoxError> + Send + Sync + 'static {
  move |key: &String| {
    load_count.fetch_add(1, Ordering::SeqCst);
    Ok(format!("{}v", key))
  }
}

/// The builder shared by most suites: 5 entries in a single segment, 1s
/// foreground-refresh horizon, 2s hard expiry.
pub fn small_cache_builder() -> CacheBuilder<String, String> {
  CacheBuilder::new()
    .maximum_size(5)
    .concurrency_level(1)
    .refresh_after_write(Duration::from_secs(1))
    .expire_after_write(Duration::from_secs(2))
}

/// `get` and unwrap both the result and the Arc, for readable assertions.
pub fn fetch(cache: &FaultTolerantCache<String, String>, key: &str) -> String {
  (*cache.get(&key.to_string()).unwrap()).clone()
}

/// `get_if_present` flattened to an owned Option<String>.
pub fn peek(cache: &FaultTolerantCache<String, String>, key: &str) -> Option<String> {
  cache.get_if_present(&key.to_string()).map(|v| (*v).clone())
}
