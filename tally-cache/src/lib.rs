//! TALLY Cache - Periodic Result Cache
//!
//! Serves a per-user result that is expensive to compute and valid for one
//! calendar period. Lookups go through three tiers, fastest first:
//!
//! ```text
//! get(user) -> memory -> durable (LMDB) -> remote store (Postgres) -> generator
//!                ^            ^                                          |
//!                +------------+---------- write-through -----------------+
//! ```
//!
//! A result is valid exactly when its period key equals the current period
//! key. The cache never returns a result for another period and never
//! caches a generator failure.
//!
//! # Example
//!
//! ```ignore
//! use tally_cache::PeriodicResultCache;
//!
//! let cache = PeriodicResultCache::<Score>::builder()
//!     .durable_tier(Arc::new(durable))
//!     .remote_store_tier(Arc::new(remote))
//!     .generator(Arc::new(GeneratorClient::new(&config)?))
//!     .build()?;
//!
//! let score = cache.get(&UserId::from("u1"), false).await?;
//! ```

mod builder;
mod cache;
mod inflight;
mod metrics;

pub use builder::PeriodicResultCacheBuilder;
pub use cache::PeriodicResultCache;
