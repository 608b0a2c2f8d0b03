use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use sturdy::{RetryError, RetryingExecutor, StopSignal};

#[test]
fn gives_up_after_retry_limit_with_first_error() {
  let calls = Arc::new(AtomicUsize::new(0));
  let executor = RetryingExecutor::builder()
    .retry_limit(3)
    .initial_retry_wait(Duration::from_millis(10))
    .wait_grow_rate(2.0)
    .build();

  let started = Instant::now();
  let result: Result<(), _> = executor.run({
    let calls = calls.clone();
    move || {
      let n = calls.fetch_add(1, Ordering::SeqCst);
      Err(format!("fail {}", n).into())
    }
  });

  // retry_limit = 3 means the op runs at most 4 times.
  assert_eq!(calls.load(Ordering::SeqCst), 4);
  // Backoff waits were about 10ms, 20ms, 40ms.
  assert!(started.elapsed() >= Duration::from_millis(70));
  match result {
    Err(RetryError::Giveup(first)) => {
      assert_eq!(first.to_string(), "fail 0", "the first error is reported");
    }
    other => panic!("expected giveup, got {:?}", other.map(|_| ())),
  }
}

#[test]
fn returns_first_success() {
  let calls = Arc::new(AtomicUsize::new(0));
  let executor = RetryingExecutor::builder()
    .retry_limit(5)
    .initial_retry_wait(Duration::from_millis(5))
    .build();

  let result = executor.run({
    let calls = calls.clone();
    move || {
      let n = calls.fetch_add(1, Ordering::SeqCst);
      if n < 2 {
        Err(format!("fail {}", n).into())
      } else {
        Ok(n)
      }
    }
  });

  assert_eq!(result.unwrap(), 2);
  assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn non_retryable_error_gives_up_immediately() {
  let calls = Arc::new(AtomicUsize::new(0));
  let executor = RetryingExecutor::builder()
    .retry_limit(5)
    .initial_retry_wait(Duration::from_millis(5))
    .retry_if(|err| !err.to_string().contains("fatal"))
    .build();

  let result: Result<(), _> = executor.run({
    let calls = calls.clone();
    move || {
      calls.fetch_add(1, Ordering::SeqCst);
      Err("fatal misconfiguration".into())
    }
  });

  assert_eq!(calls.load(Ordering::SeqCst), 1);
  assert!(matches!(result, Err(RetryError::Giveup(_))));
}

#[test]
fn giveup_timeout_bounds_total_wall_clock() {
  let calls = Arc::new(AtomicUsize::new(0));
  let executor = RetryingExecutor::builder()
    .retry_limit(100)
    .initial_retry_wait(Duration::from_millis(50))
    .wait_grow_rate(2.0)
    .giveup_timeout(Duration::from_millis(120))
    .build();

  let started = Instant::now();
  let result: Result<(), _> = executor.run({
    let calls = calls.clone();
    move || {
      calls.fetch_add(1, Ordering::SeqCst);
      Err("down".into())
    }
  });

  assert!(matches!(result, Err(RetryError::Giveup(_))));
  // The second wait (100ms) would overrun the 120ms budget, so retrying
  // stops after two calls, well before the retry limit.
  assert_eq!(calls.load(Ordering::SeqCst), 2);
  assert!(started.elapsed() < Duration::from_millis(300));
}

#[test]
fn hooks_observe_retries_and_giveup() {
  let retries: Arc<Mutex<Vec<(u32, u32, Duration)>>> = Arc::new(Mutex::new(Vec::new()));
  let giveup: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
  let calls = Arc::new(AtomicUsize::new(0));

  let executor = RetryingExecutor::builder()
    .retry_limit(2)
    .initial_retry_wait(Duration::from_millis(5))
    .wait_grow_rate(2.0)
    .on_retry({
      let retries = retries.clone();
      move |_err, count, limit, wait| retries.lock().unwrap().push((count, limit, wait))
    })
    .on_giveup({
      let giveup = giveup.clone();
      move |first, last| {
        giveup
          .lock()
          .unwrap()
          .push((first.to_string(), last.to_string()))
      }
    })
    .build();

  let result: Result<(), _> = executor.run({
    let calls = calls.clone();
    move || {
      let n = calls.fetch_add(1, Ordering::SeqCst);
      Err(format!("fail {}", n).into())
    }
  });
  assert!(matches!(result, Err(RetryError::Giveup(_))));

  let retries = retries.lock().unwrap();
  assert_eq!(
    *retries,
    vec![
      (1, 2, Duration::from_millis(5)),
      (2, 2, Duration::from_millis(10)),
    ]
  );

  let giveup = giveup.lock().unwrap();
  assert_eq!(giveup.len(), 1);
  assert_eq!(giveup[0].0, "fail 0");
  assert_eq!(giveup[0].1, "fail 2");
}

#[test]
fn stop_signal_interrupts_the_backoff_sleep() {
  let executor = RetryingExecutor::builder()
    .retry_limit(5)
    .initial_retry_wait(Duration::from_secs(5))
    .build();

  let stop = Arc::new(StopSignal::new());
  let stopper = {
    let stop = stop.clone();
    thread::spawn(move || {
      thread::sleep(Duration::from_millis(100));
      stop.stop();
    })
  };

  let started = Instant::now();
  let result: Result<(), _> = executor.run_interruptible(&stop, || Err("down".into()));
  stopper.join().unwrap();

  assert!(matches!(result, Err(RetryError::Interrupted)));
  assert!(started.elapsed() < Duration::from_secs(2));
  assert!(stop.is_stopped());
}
