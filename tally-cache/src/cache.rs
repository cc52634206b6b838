//! The periodic result cache orchestrator.
//!
//! `get` is a short-circuiting linear probe over the configured tiers
//! followed, on a full miss, by one generator call:
//!
//! 1. Forced: clear the local tiers, regenerate with `force_refresh`, write
//!    through to every tier.
//! 2. Otherwise probe memory, durable and remote store in order. The first
//!    hit is copied into every faster tier and returned.
//! 3. On a full miss, generate and write through to every tier.
//!
//! Tier failures are absorbed as misses. Generator failures propagate and
//! leave every tier untouched. `refresh_in_background` regenerates with the
//! force flag but skips step 1's clearing, so a failed refresh keeps the
//! entries already cached.

use std::sync::Arc;

use tally_client::ResultGenerator;
use tally_core::{
    CacheEvent, CacheEventSink, CacheOutcome, CacheStats, CachedResult, Clock, GenerationError,
    PeriodCalculator, PeriodKey, PeriodicPayload, StorageError, TierKind, UserId,
};
use tally_storage::{ResultTier, TierRead};
use tokio::task::JoinHandle;

use crate::inflight::InFlight;
use crate::metrics::CacheMetrics;

struct CacheInner<T: PeriodicPayload> {
    /// Fastest first. Memory is always present.
    tiers: Vec<Arc<dyn ResultTier<T>>>,
    generator: Arc<dyn ResultGenerator<T>>,
    clock: Arc<dyn Clock>,
    calculator: PeriodCalculator,
    events: Arc<dyn CacheEventSink>,
    in_flight: InFlight,
    metrics: CacheMetrics,
}

/// Three-tier cache of one per-user result per period.
///
/// Cloning is cheap and clones share tiers, counters and the in-flight
/// guard.
///
/// # Example
///
/// ```ignore
/// let cache = PeriodicResultCache::<Score>::builder()
///     .generator(Arc::new(client))
///     .build()?;
///
/// let first = cache.get(&user, false).await?;   // generated
/// let again = cache.get(&user, false).await?;   // memory hit
/// assert_eq!(again.origin(), Origin::Memory);
/// ```
pub struct PeriodicResultCache<T: PeriodicPayload> {
    inner: Arc<CacheInner<T>>,
}

impl<T: PeriodicPayload> Clone for PeriodicResultCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: PeriodicPayload> std::fmt::Debug for PeriodicResultCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicResultCache")
            .field("tiers", &self.tier_kinds())
            .field("period", &self.inner.calculator.kind())
            .finish_non_exhaustive()
    }
}

impl<T: PeriodicPayload> PeriodicResultCache<T> {
    pub(crate) fn from_parts(
        tiers: Vec<Arc<dyn ResultTier<T>>>,
        generator: Arc<dyn ResultGenerator<T>>,
        clock: Arc<dyn Clock>,
        calculator: PeriodCalculator,
        events: Arc<dyn CacheEventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                tiers,
                generator,
                clock,
                calculator,
                events,
                in_flight: InFlight::default(),
                metrics: CacheMetrics::default(),
            }),
        }
    }

    /// Key of the period that is current right now.
    pub fn current_period(&self) -> PeriodKey {
        self.inner.calculator.current(&*self.inner.clock)
    }

    /// Configured tiers in probe order.
    pub fn tier_kinds(&self) -> Vec<TierKind> {
        self.inner.tiers.iter().map(|tier| tier.kind()).collect()
    }

    /// Snapshot of the hit/miss and generation counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.metrics.snapshot()
    }

    /// Return the current-period result for `user_id`.
    ///
    /// The returned result is tagged with where it came from. Only
    /// generator errors are surfaced; storage errors count as misses.
    pub async fn get(
        &self,
        user_id: &UserId,
        force_refresh: bool,
    ) -> Result<CachedResult<T>, GenerationError> {
        let current = self.current_period();

        if force_refresh {
            let _permit = self.inner.in_flight.acquire(user_id).await;
            self.clear_local(user_id).await;
            return self.generate(user_id, true, &current).await;
        }

        if let Some(hit) = self.probe(user_id, &current, self.inner.tiers.len()).await {
            return Ok(hit);
        }

        let permit = self.inner.in_flight.acquire(user_id).await;
        if permit.waited() {
            // Whoever held the permit has just written through.
            if let Some(hit) = self.probe(user_id, &current, 1).await {
                return Ok(hit);
            }
        }
        self.generate(user_id, false, &current).await
    }

    /// Clear the memory and durable entries for `user_id`.
    ///
    /// The remote store is shared with other devices and is left alone;
    /// its entry expires at the next period rollover. Every local tier is
    /// attempted and the first failure, if any, is returned.
    pub async fn invalidate(&self, user_id: &UserId) -> Result<(), StorageError> {
        tracing::info!(user_id = %user_id, "Invalidating cached result");
        match self.clear_local(user_id).await {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Force a regeneration on a spawned task.
    ///
    /// Unlike `get(user_id, true)` the local tiers are not cleared first, so
    /// a failed refresh leaves the entries already cached in place. A
    /// successful one is written through to every tier. The caller may
    /// await the handle or drop it; failures are reported through the event
    /// sink either way. Must be called from within a Tokio runtime.
    pub fn refresh_in_background(
        &self,
        user_id: &UserId,
    ) -> JoinHandle<Result<CachedResult<T>, GenerationError>> {
        let cache = self.clone();
        let user_id = user_id.clone();
        tokio::spawn(async move {
            let result = cache.regenerate(&user_id).await;
            if let Err(err) = &result {
                tracing::debug!(user_id = %user_id, error = %err, "Background refresh failed");
            }
            result
        })
    }

    /// Forced generation that keeps the current local entries until a
    /// replacement is in hand.
    async fn regenerate(&self, user_id: &UserId) -> Result<CachedResult<T>, GenerationError> {
        let current = self.current_period();
        let _permit = self.inner.in_flight.acquire(user_id).await;
        self.generate(user_id, true, &current).await
    }

    // ------------------------------------------------------------------------
    // Probe
    // ------------------------------------------------------------------------

    /// Read the first `depth` tiers in order, stopping at the first hit.
    async fn probe(
        &self,
        user_id: &UserId,
        current: &PeriodKey,
        depth: usize,
    ) -> Option<CachedResult<T>> {
        let tiers = &self.inner.tiers;
        for (index, tier) in tiers.iter().enumerate().take(depth) {
            let kind = tier.kind();
            match tier.read(user_id, current).await {
                Ok(TierRead::Hit(result)) if result.is_valid_for(current) => {
                    self.inner.metrics.record_hit(kind);
                    self.emit(CacheEvent::tier(user_id, kind, CacheOutcome::Hit));
                    tracing::debug!(
                        user_id = %user_id,
                        tier = kind.as_str(),
                        period_key = %current,
                        "Cache hit"
                    );

                    let result = result.with_origin(kind.origin());
                    self.write_through(user_id, &result, &tiers[..index]).await;
                    return Some(result);
                }
                Ok(TierRead::Hit(result)) => {
                    // A tier that ignored the current key; never serve it.
                    self.record_stale(user_id, kind, result.period_key().clone(), false);
                }
                Ok(TierRead::Stale { stored, evicted }) => {
                    self.record_stale(user_id, kind, stored, evicted);
                }
                Ok(TierRead::Miss) => {
                    self.inner.metrics.record_miss(kind);
                    self.emit(CacheEvent::tier(user_id, kind, CacheOutcome::Miss));
                }
                Err(err) => self.record_storage_failure(user_id, kind, &err),
            }
        }
        None
    }

    fn record_stale(&self, user_id: &UserId, kind: TierKind, stored: PeriodKey, evicted: bool) {
        self.inner.metrics.record_stale(kind);
        self.emit(CacheEvent::tier(user_id, kind, CacheOutcome::Stale { stored }));
        if evicted {
            self.emit(CacheEvent::tier(user_id, kind, CacheOutcome::Evicted));
        }
    }

    fn record_storage_failure(&self, user_id: &UserId, kind: TierKind, err: &StorageError) {
        // A miss as far as the caller is concerned.
        self.inner.metrics.record_read_failure(kind);
        self.emit(CacheEvent::tier(
            user_id,
            kind,
            CacheOutcome::StorageFailed {
                reason: err.to_string(),
            },
        ));
    }

    // ------------------------------------------------------------------------
    // Generate and write through
    // ------------------------------------------------------------------------

    async fn generate(
        &self,
        user_id: &UserId,
        force_refresh: bool,
        current: &PeriodKey,
    ) -> Result<CachedResult<T>, GenerationError> {
        let generated = match self
            .inner
            .generator
            .fetch_or_generate(user_id, force_refresh)
            .await
        {
            Ok(generated) => generated,
            Err(err) => {
                self.inner.metrics.record_generation_failure();
                self.emit(CacheEvent::generator(
                    user_id,
                    CacheOutcome::GenerationFailed {
                        reason: err.to_string(),
                    },
                ));
                return Err(err);
            }
        };

        self.inner.metrics.record_generation();
        self.emit(CacheEvent::generator(
            user_id,
            CacheOutcome::Generated {
                forced: force_refresh,
            },
        ));

        let result = generated.into_cached();
        if result.is_valid_for(current) {
            tracing::info!(
                user_id = %user_id,
                period_key = %current,
                forced = force_refresh,
                "Generated result, writing through"
            );
            self.write_through(user_id, &result, &self.inner.tiers).await;
        } else {
            // Unreadable once stored; hand it back without caching.
            tracing::warn!(
                user_id = %user_id,
                period_key = %current,
                generated_period = %result.period_key(),
                "Generator returned a result for another period, not caching"
            );
        }
        Ok(result)
    }

    async fn write_through(
        &self,
        user_id: &UserId,
        result: &CachedResult<T>,
        tiers: &[Arc<dyn ResultTier<T>>],
    ) {
        for tier in tiers {
            let kind = tier.kind();
            match tier.write(user_id, result).await {
                Ok(()) => self.emit(CacheEvent::tier(user_id, kind, CacheOutcome::Written)),
                Err(err) => {
                    self.inner.metrics.record_write_failure(kind);
                    self.emit(CacheEvent::tier(
                        user_id,
                        kind,
                        CacheOutcome::StorageFailed {
                            reason: err.to_string(),
                        },
                    ));
                }
            }
        }
    }

    /// Remove the user from every tier except the remote store.
    async fn clear_local(&self, user_id: &UserId) -> Option<StorageError> {
        let mut first_error = None;
        for tier in &self.inner.tiers {
            let kind = tier.kind();
            if kind == TierKind::RemoteStore {
                continue;
            }
            match tier.remove(user_id).await {
                Ok(_) => self.emit(CacheEvent::tier(user_id, kind, CacheOutcome::Invalidated)),
                Err(err) => {
                    self.inner.metrics.record_write_failure(kind);
                    self.emit(CacheEvent::tier(
                        user_id,
                        kind,
                        CacheOutcome::StorageFailed {
                            reason: err.to_string(),
                        },
                    ));
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error
    }

    fn emit(&self, event: CacheEvent) {
        self.inner.events.on_cache_event(&event);
    }
}
