//! Tier trait and read outcome.
//!
//! This module defines the contract every lookup tier implements. A tier is
//! asked for a user's result *relative to the current period*; it must
//! either return a result for that period or report that it has none.

use async_trait::async_trait;
use tally_core::{CachedResult, PeriodKey, PeriodicPayload, StorageError, TierKind, UserId};

/// Outcome of a tier read.
///
/// `Stale` carries only the period the stored entry belonged to, never the
/// entry itself, so a stale result cannot leak to a caller.
#[derive(Debug, Clone, PartialEq)]
pub enum TierRead<T> {
    /// A result for the current period.
    Hit(CachedResult<T>),
    /// Nothing stored for this user.
    Miss,
    /// An entry for another period was found and ignored.
    Stale {
        /// Period of the ignored entry.
        stored: PeriodKey,
        /// Whether the tier physically removed it.
        evicted: bool,
    },
}

impl<T> TierRead<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    /// Collapse to the plain "value or miss" view.
    pub fn into_option(self) -> Option<CachedResult<T>> {
        match self {
            Self::Hit(result) => Some(result),
            Self::Miss | Self::Stale { .. } => None,
        }
    }
}

/// A lookup tier for periodic results.
///
/// Implementations should be thread-safe; the cache shares one instance
/// across every concurrent `get`.
///
/// # Contract
///
/// - `read` returns `Hit` only for entries whose period key equals `current`.
/// - `write` upserts unconditionally, replacing any prior entry for the user.
/// - `remove` deletes the user's entry where the tier allows clients to
///   delete, returning whether anything was removed.
#[async_trait]
pub trait ResultTier<T: PeriodicPayload>: Send + Sync {
    /// Which tier this is.
    fn kind(&self) -> TierKind;

    /// Look up the user's result for the current period.
    async fn read(
        &self,
        user_id: &UserId,
        current: &PeriodKey,
    ) -> Result<TierRead<T>, StorageError>;

    /// Store the user's result, overwriting any prior entry.
    async fn write(&self, user_id: &UserId, result: &CachedResult<T>) -> Result<(), StorageError>;

    /// Remove the user's entry.
    async fn remove(&self, user_id: &UserId) -> Result<bool, StorageError>;
}
