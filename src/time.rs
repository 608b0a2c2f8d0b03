use once_cell::sync::Lazy;
use std::time::Instant;

// The single, static reference point for all time calculations in the crate.
// It is initialized lazily on its first use.
static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic nanoseconds since the process epoch.
#[inline]
pub(crate) fn now_nanos() -> u64 {
  EPOCH.elapsed().as_nanos() as u64
}

/// Monotonic milliseconds since the process epoch.
///
/// Freshness horizons are compared in this unit. The value is derived from
/// the nanosecond reading so that both clocks agree on "now".
#[inline]
pub(crate) fn now_millis() -> u64 {
  now_nanos() / 1_000_000
}
