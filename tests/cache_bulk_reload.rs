mod common;

use common::{fetch, peek};
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use sturdy::{BoxError, CacheBuilder, FaultTolerantCache, LoadError};

struct Fixture {
  cache: FaultTolerantCache<String, String>,
  load_count: Arc<AtomicUsize>,
  reload_calls: Arc<AtomicUsize>,
  // How many keys the reloader produces before failing; -1 never fails.
  produce_before_failing: Arc<AtomicIsize>,
  seen_errors: Arc<Mutex<Vec<String>>>,
}

fn fixture() -> Fixture {
  let load_count = Arc::new(AtomicUsize::new(0));
  let reload_calls = Arc::new(AtomicUsize::new(0));
  let produce_before_failing = Arc::new(AtomicIsize::new(-1));
  let seen_errors = Arc::new(Mutex::new(Vec::new()));

  let cache = CacheBuilder::new()
    .maximum_size(5)
    .concurrency_level(1)
    .refresh_after_write(Duration::from_secs(1))
    .expire_after_write(Duration::from_secs(2))
    .loader({
      let load_count = load_count.clone();
      move |key: &String| {
        load_count.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}v", key))
      }
    })
    .reloader({
      let reload_calls = reload_calls.clone();
      let produce_before_failing = produce_before_failing.clone();
      move |keys: &[String], sink: &mut dyn FnMut(String, String)| -> Result<(), BoxError> {
        reload_calls.fetch_add(1, Ordering::SeqCst);
        for key in keys {
          let remaining = produce_before_failing.load(Ordering::SeqCst);
          if remaining == 0 {
            return Err("bulk fail".into());
          }
          if remaining > 0 {
            produce_before_failing.fetch_sub(1, Ordering::SeqCst);
          }
          sink(key.clone(), format!("{}b", key));
        }
        Ok(())
      }
    })
    .exception_listener({
      let seen_errors = seen_errors.clone();
      move |err: &LoadError| seen_errors.lock().unwrap().push(err.to_string())
    })
    .build()
    .unwrap();

  Fixture {
    cache,
    load_count,
    reload_calls,
    produce_before_failing,
    seen_errors,
  }
}

#[test]
fn refresh_now_rewrites_everything_through_the_reloader() {
  let f = fixture();
  for i in 0..5 {
    fetch(&f.cache, &format!("a{}", i));
  }

  f.cache.refresh_now();

  assert_eq!(f.load_count.load(Ordering::SeqCst), 5);
  assert_eq!(f.reload_calls.load(Ordering::SeqCst), 1, "one bulk call for the batch");

  for i in 0..5 {
    let key = format!("a{}", i);
    assert_eq!(peek(&f.cache, &key), Some(format!("{}b", key)));
  }
}

#[test]
fn refresh_enqueues_only_entries_past_a_horizon() {
  let f = fixture();
  for i in 0..5 {
    fetch(&f.cache, &format!("a{}", i));
  }

  // Everything is fresh: nothing reloads.
  f.cache.refresh();
  assert_eq!(f.load_count.load(Ordering::SeqCst), 5);
  assert_eq!(f.reload_calls.load(Ordering::SeqCst), 0);

  thread::sleep(Duration::from_millis(1200));

  // Past the sync-refresh horizon: everything reloads.
  f.cache.refresh();
  assert_eq!(f.load_count.load(Ordering::SeqCst), 5);
  assert_eq!(f.reload_calls.load(Ordering::SeqCst), 1);

  for i in 0..5 {
    let key = format!("a{}", i);
    assert_eq!(peek(&f.cache, &key), Some(format!("{}b", key)));
  }
}

#[test]
fn partial_bulk_failure_keeps_prior_values_and_clears_locks() {
  let f = fixture();
  for i in 0..4 {
    fetch(&f.cache, &format!("a{}", i));
  }
  assert_eq!(f.load_count.load(Ordering::SeqCst), 4);

  // The reloader produces two values, then fails the batch.
  f.produce_before_failing.store(2, Ordering::SeqCst);
  f.cache.refresh_now();

  // Entries are swept most recently used first, so a3 and a2 got new
  // values; a1 and a0 keep the versions they had.
  assert_eq!(fetch(&f.cache, "a3"), "a3b");
  assert_eq!(fetch(&f.cache, "a2"), "a2b");
  assert_eq!(fetch(&f.cache, "a1"), "a1v");
  assert_eq!(fetch(&f.cache, "a0"), "a0v");
  assert_eq!(f.load_count.load(Ordering::SeqCst), 4, "no single loads happened");

  {
    let seen = f.seen_errors.lock().unwrap();
    assert_eq!(seen.len(), 1, "the batch failure is reported once");
    assert!(seen[0].contains("bulk fail"), "got: {}", seen[0]);
  }

  // The failed entries' locks were cleared: a full retry succeeds.
  f.produce_before_failing.store(-1, Ordering::SeqCst);
  f.cache.refresh_now();
  for i in 0..4 {
    let key = format!("a{}", i);
    assert_eq!(peek(&f.cache, &key), Some(format!("{}b", key)));
  }
}

#[test]
fn async_horizon_refreshes_through_the_bulk_reloader() {
  let load_count = Arc::new(AtomicUsize::new(0));
  let reload_calls = Arc::new(AtomicUsize::new(0));
  let cache: FaultTolerantCache<String, String> = CacheBuilder::new()
    .concurrency_level(1)
    .asynchronous_refresh_after_write(Duration::from_millis(200))
    .expire_after_write(Duration::from_secs(5))
    .loader({
      let load_count = load_count.clone();
      move |key: &String| {
        load_count.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}v", key))
      }
    })
    .reloader({
      let reload_calls = reload_calls.clone();
      move |keys: &[String], sink: &mut dyn FnMut(String, String)| {
        reload_calls.fetch_add(1, Ordering::SeqCst);
        for key in keys {
          sink(key.clone(), format!("{}b", key));
        }
        Ok(())
      }
    })
    .build()
    .unwrap();

  assert_eq!(fetch(&cache, "a"), "av");
  thread::sleep(Duration::from_millis(400));

  // Past the async horizon: the stale value is served immediately and the
  // refresh goes through the background queue's bulk path.
  assert_eq!(fetch(&cache, "a"), "av");
  thread::sleep(Duration::from_millis(300));

  assert_eq!(peek(&cache, "a"), Some("ab".to_string()));
  assert_eq!(load_count.load(Ordering::SeqCst), 1);
  assert_eq!(reload_calls.load(Ordering::SeqCst), 1);
}
