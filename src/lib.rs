//! Resilience primitives for systems that depend on slow or intermittently
//! failing upstreams.
//!
//! The crate provides three independent building blocks:
//!
//! - [`FaultTolerantCache`]: a keyed loading cache that prefers serving a
//!   somewhat stale value over propagating a reload failure. Entries move
//!   through tiered freshness horizons (background refresh, foreground
//!   refresh, hard expiry), reloads are single-flight per key, and an
//!   optional leaky-bucket gate keeps a failing upstream from being hammered.
//! - [`LeakyBucket`]: a thread-safe fractional-token meter for rate limiting
//!   and admission control.
//! - [`RetryingExecutor`]: retries a fallible operation with exponential
//!   backoff under a retry count, a wall-clock budget, and a caller-supplied
//!   retry predicate.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use sturdy::FaultTolerantCache;
//!
//! let cache: FaultTolerantCache<String, String> = FaultTolerantCache::builder()
//!   .maximum_size(10_000)
//!   .asynchronous_refresh_after_write(Duration::from_secs(30))
//!   .refresh_after_write(Duration::from_secs(60))
//!   .expire_after_write(Duration::from_secs(300))
//!   .loader(|key: &String| Ok(fetch_from_upstream(key)?))
//!   .build()
//!   .unwrap();
//!
//! let value = cache.get(&"config".to_string()).unwrap();
//! # fn fetch_from_upstream(_: &str) -> Result<String, std::io::Error> { unimplemented!() }
//! ```

mod access_order;
mod bucket;
mod builder;
mod cache;
mod entry;
mod error;
mod executor;
mod metrics;
mod refresh_queue;
mod refresher;
mod retry;
mod segment;
mod time;

pub use bucket::{LeakyBucket, LeakyBucketBuilder};
pub use builder::CacheBuilder;
pub use cache::FaultTolerantCache;
pub use error::{BoxError, BuildError, LoadError, RetryError, SharedError};
pub use executor::{Executor, SpawnExecutor};
pub use metrics::MetricsSnapshot;
pub use retry::{RetryingExecutor, RetryingExecutorBuilder, StopSignal};
