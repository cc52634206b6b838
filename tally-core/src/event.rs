//! Cache diagnostic events.
//!
//! The cache reports every tier outcome through a [`CacheEventSink`] so a
//! host application can wire it to its own telemetry. The default sink
//! forwards to `tracing`.

use crate::identity::UserId;
use crate::period::PeriodKey;
use crate::result::TierKind;

/// What happened at a tier (or at the generator when `tier` is `None`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
    /// The tier returned a result for the current period.
    Hit,
    /// The tier had nothing for this user.
    Miss,
    /// The tier held a result for another period; treated as a miss.
    Stale { stored: PeriodKey },
    /// A stale or undecodable entry was physically removed.
    Evicted,
    /// A result was written through to the tier.
    Written,
    /// A tier read or write failed and was absorbed as a miss.
    StorageFailed { reason: String },
    /// The generator produced a result.
    Generated { forced: bool },
    /// The generator failed; nothing was cached.
    GenerationFailed { reason: String },
    /// The user's entry was cleared by an explicit invalidation.
    Invalidated,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Stale { .. } => "stale",
            Self::Evicted => "evicted",
            Self::Written => "written",
            Self::StorageFailed { .. } => "storage_failed",
            Self::Generated { .. } => "generated",
            Self::GenerationFailed { .. } => "generation_failed",
            Self::Invalidated => "invalidated",
        }
    }
}

/// A single diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub user_id: UserId,
    pub tier: Option<TierKind>,
    pub outcome: CacheOutcome,
}

impl CacheEvent {
    pub fn tier(user_id: &UserId, tier: TierKind, outcome: CacheOutcome) -> Self {
        Self {
            user_id: user_id.clone(),
            tier: Some(tier),
            outcome,
        }
    }

    pub fn generator(user_id: &UserId, outcome: CacheOutcome) -> Self {
        Self {
            user_id: user_id.clone(),
            tier: None,
            outcome,
        }
    }
}

/// Receiver of cache diagnostics. Must not block.
pub trait CacheEventSink: Send + Sync {
    fn on_cache_event(&self, event: &CacheEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl CacheEventSink for TracingEventSink {
    fn on_cache_event(&self, event: &CacheEvent) {
        let tier = event.tier.map(|t| t.as_str()).unwrap_or("generator");
        match &event.outcome {
            CacheOutcome::StorageFailed { reason } => tracing::warn!(
                user_id = %event.user_id,
                tier,
                %reason,
                "Cache tier failure absorbed as miss"
            ),
            CacheOutcome::GenerationFailed { reason } => tracing::warn!(
                user_id = %event.user_id,
                %reason,
                "Result generation failed"
            ),
            CacheOutcome::Stale { stored } => tracing::debug!(
                user_id = %event.user_id,
                tier,
                stored_period = %stored,
                "Cache entry is for another period"
            ),
            outcome => tracing::debug!(
                user_id = %event.user_id,
                tier,
                outcome = outcome.as_str(),
                "Cache event"
            ),
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl CacheEventSink for NoopEventSink {
    fn on_cache_event(&self, _event: &CacheEvent) {}
}
