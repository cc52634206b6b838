//! TALLY Storage - Result Tiers
//!
//! The three lookup tiers consulted by the periodic result cache, fastest
//! first:
//!
//! 1. [`MemoryTier`] - process-local map, lifetime of the process.
//! 2. [`LmdbDurableTier`] - LMDB on the local device, survives restarts.
//! 3. [`RemoteStoreTier`] - a shared table reachable from every device,
//!    backed by PostgreSQL through [`PostgresRecordStore`].
//!
//! Every tier answers reads relative to the current period key and never
//! hands back a result computed for another period.

pub mod durable;
pub mod key;
pub mod memory;
pub mod remote;
pub mod tier;

pub use durable::{DurableTierError, LmdbDurableTier};
pub use key::DurableKey;
pub use memory::MemoryTier;
pub use remote::postgres::{create_pool, PostgresRecordStore, PostgresStoreTier};
pub use remote::{RemoteRecord, RemoteRecordStore, RemoteStoreTier};
pub use tier::{ResultTier, TierRead};
