mod common;

use common::{counting_loader, fetch, peek, small_cache_builder};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn soft_expired_is_served_then_hard_expired_is_hidden() {
  let load_count = Arc::new(AtomicUsize::new(0));
  let cache = small_cache_builder()
    .loader(counting_loader(load_count.clone()))
    .build()
    .unwrap();

  fetch(&cache, "a0");
  assert_eq!(load_count.load(Ordering::SeqCst), 1);

  thread::sleep(Duration::from_millis(1200));
  // Soft-expired: still cached, and get_if_present never reloads.
  assert_eq!(peek(&cache, "a0"), Some("a0v".to_string()));
  assert_eq!(load_count.load(Ordering::SeqCst), 1);

  thread::sleep(Duration::from_millis(1000));
  // Hard-expired: hidden even though the entry has not been swept yet.
  assert_eq!(peek(&cache, "a0"), None);
  assert_eq!(load_count.load(Ordering::SeqCst), 1);
}

#[test]
fn get_reloads_synchronously_on_soft_expire() {
  let load_count = Arc::new(AtomicUsize::new(0));
  let cache = small_cache_builder()
    .loader(counting_loader(load_count.clone()))
    .build()
    .unwrap();

  fetch(&cache, "a0");
  assert_eq!(load_count.load(Ordering::SeqCst), 1);

  thread::sleep(Duration::from_millis(1200));
  assert_eq!(fetch(&cache, "a0"), "a0v");
  assert_eq!(load_count.load(Ordering::SeqCst), 2);
}

#[test]
fn get_reloads_synchronously_on_hard_expire() {
  let load_count = Arc::new(AtomicUsize::new(0));
  let cache = small_cache_builder()
    .loader(counting_loader(load_count.clone()))
    .build()
    .unwrap();

  fetch(&cache, "a0");
  assert_eq!(load_count.load(Ordering::SeqCst), 1);

  thread::sleep(Duration::from_millis(2200));
  assert_eq!(fetch(&cache, "a0"), "a0v");
  assert_eq!(load_count.load(Ordering::SeqCst), 2);
}

#[test]
fn refresh_without_reloader_runs_loader_on_caller() {
  let load_count = Arc::new(AtomicUsize::new(0));
  let cache = small_cache_builder()
    .loader(counting_loader(load_count.clone()))
    .build()
    .unwrap();

  fetch(&cache, "a0");
  fetch(&cache, "a1");
  assert_eq!(load_count.load(Ordering::SeqCst), 2);

  // Nothing is due yet.
  cache.refresh();
  assert_eq!(load_count.load(Ordering::SeqCst), 2);

  thread::sleep(Duration::from_millis(1200));
  cache.refresh();
  assert_eq!(load_count.load(Ordering::SeqCst), 4);
  assert_eq!(cache.metrics().background_refreshes, 2);
}

#[test]
fn refresh_sweeps_out_hard_expired_entries() {
  let load_count = Arc::new(AtomicUsize::new(0));
  let cache = small_cache_builder()
    .loader(counting_loader(load_count.clone()))
    .build()
    .unwrap();

  fetch(&cache, "a0");
  assert_eq!(load_count.load(Ordering::SeqCst), 1);

  thread::sleep(Duration::from_millis(2200));
  // Hard-expired entries are dropped by the sweep, not refreshed.
  cache.refresh_now();
  assert_eq!(load_count.load(Ordering::SeqCst), 1);
  assert_eq!(peek(&cache, "a0"), None);
}
