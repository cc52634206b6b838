//! Cached result envelopes.
//!
//! A [`CachedResult`] is valid iff its period key equals the current period
//! key at read time. Age alone never decides validity: a result computed
//! yesterday for the current week is valid, one computed this morning for
//! last week is not.

use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::period::PeriodKey;
use crate::Timestamp;

/// Marker trait for application results that can be cached.
///
/// Payloads are opaque to the cache; they only need to survive a JSON round
/// trip through the durable and remote tiers and be shareable across tasks.
pub trait PeriodicPayload: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> PeriodicPayload for T where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Where a returned result came from. Diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Memory,
    Durable,
    RemoteStore,
    FreshlyGenerated,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Durable => "durable",
            Self::RemoteStore => "remote_store",
            Self::FreshlyGenerated => "freshly_generated",
        }
    }
}

/// One of the three lookup tiers, in probe order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    Memory,
    Durable,
    RemoteStore,
}

impl TierKind {
    /// All tiers, fastest first.
    pub const ALL: [TierKind; 3] = [TierKind::Memory, TierKind::Durable, TierKind::RemoteStore];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Durable => "durable",
            Self::RemoteStore => "remote_store",
        }
    }

    /// Origin tag for a hit served by this tier.
    pub fn origin(&self) -> Origin {
        match self {
            Self::Memory => Origin::Memory,
            Self::Durable => Origin::Durable,
            Self::RemoteStore => Origin::RemoteStore,
        }
    }
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A periodic result together with the period it is valid for.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResult<T> {
    payload: T,
    period_key: PeriodKey,
    cached_at: Timestamp,
    origin: Origin,
}

impl<T> CachedResult<T> {
    pub fn new(payload: T, period_key: PeriodKey, cached_at: Timestamp, origin: Origin) -> Self {
        Self {
            payload,
            period_key,
            cached_at,
            origin,
        }
    }

    /// Wrap a result the generator just produced.
    pub fn freshly_generated(payload: T, period_key: PeriodKey) -> Self {
        Self::new(payload, period_key, Utc::now(), Origin::FreshlyGenerated)
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    pub fn period_key(&self) -> &PeriodKey {
        &self.period_key
    }

    pub fn cached_at(&self) -> Timestamp {
        self.cached_at
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// True when this result was computed for `current`.
    pub fn is_valid_for(&self, current: &PeriodKey) -> bool {
        &self.period_key == current
    }

    /// Re-tag the provenance, keeping everything else.
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// Stamp a new write time, as a tier does when it stores its own copy.
    pub fn with_cached_at(mut self, cached_at: Timestamp) -> Self {
        self.cached_at = cached_at;
        self
    }

    pub fn map<U, F>(self, f: F) -> CachedResult<U>
    where
        F: FnOnce(T) -> U,
    {
        CachedResult {
            payload: f(self.payload),
            period_key: self.period_key,
            cached_at: self.cached_at,
            origin: self.origin,
        }
    }
}

impl<T> AsRef<T> for CachedResult<T> {
    fn as_ref(&self) -> &T {
        &self.payload
    }
}

/// Persisted shape of a result: `{ payload, cachedAt, periodKey }`.
///
/// Used verbatim as the durable tier's JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResult<T> {
    pub payload: T,
    pub cached_at: Timestamp,
    pub period_key: PeriodKey,
}

impl<T> StoredResult<T> {
    /// Convert back into a result tagged with the tier it was read from.
    pub fn into_cached(self, origin: Origin) -> CachedResult<T> {
        CachedResult::new(self.payload, self.period_key, self.cached_at, origin)
    }
}

impl<T: Clone> From<&CachedResult<T>> for StoredResult<T> {
    fn from(result: &CachedResult<T>) -> Self {
        Self {
            payload: result.payload.clone(),
            cached_at: result.cached_at,
            period_key: result.period_key.clone(),
        }
    }
}

/// A validated response from the remote generator.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedResult<T> {
    pub payload: T,
    pub period_key: PeriodKey,
}

impl<T> GeneratedResult<T> {
    pub fn new(payload: T, period_key: PeriodKey) -> Self {
        Self {
            payload,
            period_key,
        }
    }

    pub fn into_cached(self) -> CachedResult<T> {
        CachedResult::freshly_generated(self.payload, self.period_key)
    }
}
