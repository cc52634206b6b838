//! TALLY Core - Periodic Result Types
//!
//! Shared vocabulary for the periodic result cache: period keys and the
//! clock they are derived from, cached result envelopes, the error taxonomy,
//! configuration, and the diagnostic event hook. Every other crate depends
//! on this one; it performs no I/O.

pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod period;
pub mod result;
pub mod stats;

pub use clock::{Clock, SystemClock};
pub use config::{
    DurableConfig, GeneratorConfig, PeriodConfig, RemoteStoreConfig, TallyConfig,
};
pub use error::{ConfigError, GenerationError, StorageError, TallyError, TallyResult};
pub use event::{CacheEvent, CacheEventSink, CacheOutcome, NoopEventSink, TracingEventSink};
pub use identity::UserId;
pub use period::{PeriodCalculator, PeriodKey, PeriodKind};
pub use result::{CachedResult, GeneratedResult, Origin, PeriodicPayload, StoredResult, TierKind};
pub use stats::{CacheStats, TierStats};

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
