use crate::time;

use parking_lot::Mutex;

/// An implementation of the leaky bucket algorithm.
///
/// This is useful for rate limiting and admission control. Build a bucket
/// with the desired capacity (the burst the bucket tolerates) and leak rate
/// (the sustained rate it allows). When a request arrives, call
/// `try_flow_in(1.0)` and process the request only if it returns `true`.
/// Available capacity recovers up to the configured capacity at `leak_rate`
/// units per second.
///
/// Amounts are fractional so that callers can express partial credits or
/// weight events differently. All operations are serialized by an internal
/// mutex, so a `LeakyBucket` can be shared freely between threads.
#[derive(Debug)]
pub struct LeakyBucket {
  state: Mutex<BucketState>,
  capacity: f64,
  allowed_negative_capacity: f64,
}

#[derive(Debug)]
struct BucketState {
  available_capacity: f64,
  leak_rate: f64,
  last_flow_in_nanos: u64,
}

impl LeakyBucket {
  /// Creates a new builder to configure a `LeakyBucket`.
  pub fn builder() -> LeakyBucketBuilder {
    LeakyBucketBuilder::new()
  }

  // Advances the state by the leak accrued since the last touch, applies
  // `delta`, and clamps into [allowed_negative_capacity, capacity].
  fn adjust_with_delta(&self, state: &mut BucketState, delta: f64) {
    let now = time::now_nanos();
    let leaked = (now - state.last_flow_in_nanos) as f64 * state.leak_rate / 1e9;
    state.available_capacity = (state.available_capacity + delta + leaked)
      .clamp(self.allowed_negative_capacity, self.capacity);
    state.last_flow_in_nanos = now;
  }

  /// Returns the current amount of remaining capacity.
  ///
  /// The returned value grows over time at `leak_rate` units per second, up
  /// to the configured capacity.
  pub fn available_capacity(&self) -> f64 {
    let mut state = self.state.lock();
    self.adjust_with_delta(&mut state, 0.0);
    state.available_capacity
  }

  /// Fills the bucket by `amount` if at least that much capacity is
  /// available, returning whether it flowed in.
  ///
  /// Equivalent to checking `available_capacity() >= amount` and calling
  /// `flow_in(amount)` atomically.
  pub fn try_flow_in(&self, amount: f64) -> bool {
    let mut state = self.state.lock();
    self.adjust_with_delta(&mut state, 0.0);
    if state.available_capacity >= amount {
      state.available_capacity = (state.available_capacity - amount)
        .clamp(self.allowed_negative_capacity, self.capacity);
      true
    } else {
      false
    }
  }

  /// Fills the bucket by `amount` unconditionally.
  ///
  /// Available capacity drops at most to the configured negative floor,
  /// which is 0 unless the builder allowed negative capacity.
  pub fn flow_in(&self, amount: f64) {
    let mut state = self.state.lock();
    self.adjust_with_delta(&mut state, -amount);
  }

  /// Changes the leak rate. The accrual reference point is not rebased.
  pub fn set_leak_rate(&self, leak_rate: f64) {
    self.state.lock().leak_rate = leak_rate;
  }

  /// Resets available capacity to the configured capacity and rebases the
  /// accrual reference point to now.
  pub fn clear(&self) {
    let mut state = self.state.lock();
    state.available_capacity = self.capacity;
    state.last_flow_in_nanos = time::now_nanos();
  }
}

/// A builder for [`LeakyBucket`].
#[derive(Debug, Clone)]
pub struct LeakyBucketBuilder {
  capacity: f64,
  leak_rate: f64,
  allowed_negative_capacity: f64,
  initial_volume: f64,
}

impl LeakyBucketBuilder {
  pub fn new() -> Self {
    Self {
      capacity: 0.0,
      leak_rate: 0.0,
      allowed_negative_capacity: 0.0,
      initial_volume: 0.0,
    }
  }

  /// Size of the bucket. Flowing in can burst at most this amount.
  pub fn capacity(mut self, capacity: f64) -> Self {
    self.capacity = capacity;
    self
  }

  /// Amount of volume removed from the bucket every second.
  pub fn leak_rate(mut self, leak_rate: f64) -> Self {
    self.leak_rate = leak_rate;
    self
  }

  /// Allows capacity to become arbitrarily negative.
  ///
  /// Equivalent to `allowed_negative_capacity(f64::NEG_INFINITY)`.
  pub fn allow_negative_capacity(self) -> Self {
    self.allowed_negative_capacity(f64::NEG_INFINITY)
  }

  /// Allows capacity to drop below zero, down to the given floor.
  ///
  /// Useful when rate limiting wants to hand out a "penalty" for overuse,
  /// which can happen under concurrency or when `available_capacity` checks
  /// are skipped. The floor must be below 0 to be effective.
  pub fn allowed_negative_capacity(mut self, floor: f64) -> Self {
    self.allowed_negative_capacity = floor;
    self
  }

  /// Volume initially flowed into the bucket. This option is less common.
  pub fn initial_volume(mut self, initial_volume: f64) -> Self {
    self.initial_volume = initial_volume;
    self
  }

  /// Creates the bucket.
  pub fn build(self) -> LeakyBucket {
    LeakyBucket {
      state: Mutex::new(BucketState {
        available_capacity: self.capacity - self.initial_volume,
        leak_rate: self.leak_rate,
        last_flow_in_nanos: time::now_nanos(),
      }),
      capacity: self.capacity,
      allowed_negative_capacity: self.allowed_negative_capacity,
    }
  }
}

impl Default for LeakyBucketBuilder {
  fn default() -> Self {
    Self::new()
  }
}
