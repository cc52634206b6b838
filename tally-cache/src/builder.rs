//! Construction of a [`PeriodicResultCache`].

use std::sync::Arc;

use tally_client::{GeneratorClient, ResultGenerator};
use tally_core::{
    CacheEventSink, Clock, ConfigError, PeriodCalculator, PeriodicPayload, StorageError,
    SystemClock, TallyConfig, TallyResult, TierKind, TracingEventSink,
};
use tally_storage::{
    LmdbDurableTier, MemoryTier, PostgresRecordStore, PostgresStoreTier, ResultTier,
};

use crate::cache::PeriodicResultCache;

/// Builder for [`PeriodicResultCache`].
///
/// Only the generator is required. The memory tier defaults to a fresh
/// [`MemoryTier`]; the durable and remote store tiers are skipped when not
/// set. Time comes from [`SystemClock`] and events go to `tracing` unless
/// overridden.
pub struct PeriodicResultCacheBuilder<T: PeriodicPayload> {
    memory: Option<Arc<dyn ResultTier<T>>>,
    durable: Option<Arc<dyn ResultTier<T>>>,
    remote_store: Option<Arc<dyn ResultTier<T>>>,
    generator: Option<Arc<dyn ResultGenerator<T>>>,
    clock: Arc<dyn Clock>,
    calculator: PeriodCalculator,
    events: Arc<dyn CacheEventSink>,
}

impl<T: PeriodicPayload> Default for PeriodicResultCacheBuilder<T> {
    fn default() -> Self {
        Self {
            memory: None,
            durable: None,
            remote_store: None,
            generator: None,
            clock: Arc::new(SystemClock),
            calculator: PeriodCalculator::iso_weekly(),
            events: Arc::new(TracingEventSink),
        }
    }
}

impl<T: PeriodicPayload> PeriodicResultCacheBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder wired to real infrastructure: LMDB on disk, the Postgres
    /// results table and the HTTP generator.
    ///
    /// The Postgres pool connects lazily, so this does not touch the
    /// network. Call `PostgresRecordStore::ensure_schema` separately when
    /// the table may not exist yet.
    pub fn from_config(config: &TallyConfig) -> TallyResult<Self> {
        config.validate()?;

        let durable =
            LmdbDurableTier::<T>::from_config(&config.durable).map_err(StorageError::from)?;
        let store = PostgresRecordStore::from_config(&config.remote_store)?;
        let generator = GeneratorClient::new(&config.generator)?;

        tracing::info!(
            durable_path = %config.durable.path.display(),
            remote_table = store.table(),
            period = config.period.kind.as_str(),
            "Assembled periodic result cache from config"
        );

        Ok(Self::new()
            .durable_tier(Arc::new(durable))
            .remote_store_tier(Arc::new(PostgresStoreTier::new(store)))
            .generator(Arc::new(generator))
            .period(config.period.calculator()))
    }

    pub fn memory_tier(mut self, tier: Arc<dyn ResultTier<T>>) -> Self {
        self.memory = Some(tier);
        self
    }

    pub fn durable_tier(mut self, tier: Arc<dyn ResultTier<T>>) -> Self {
        self.durable = Some(tier);
        self
    }

    pub fn remote_store_tier(mut self, tier: Arc<dyn ResultTier<T>>) -> Self {
        self.remote_store = Some(tier);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn ResultGenerator<T>>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn period(mut self, calculator: PeriodCalculator) -> Self {
        self.calculator = calculator;
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn CacheEventSink>) -> Self {
        self.events = events;
        self
    }

    /// Assemble the cache.
    ///
    /// Fails when no generator was given or a tier was registered in the
    /// slot of another kind.
    pub fn build(self) -> Result<PeriodicResultCache<T>, ConfigError> {
        let generator = self.generator.ok_or_else(|| ConfigError::MissingRequired {
            field: "generator".to_string(),
        })?;

        let memory = self.memory.unwrap_or_else(|| Arc::new(MemoryTier::new()));
        let slots = [
            (TierKind::Memory, Some(memory)),
            (TierKind::Durable, self.durable),
            (TierKind::RemoteStore, self.remote_store),
        ];

        let mut tiers = Vec::with_capacity(slots.len());
        for (slot, tier) in slots {
            let Some(tier) = tier else { continue };
            if tier.kind() != slot {
                return Err(ConfigError::InvalidValue {
                    field: format!("{}_tier", slot.as_str()),
                    value: tier.kind().as_str().to_string(),
                    reason: "tier kind does not match its slot".to_string(),
                });
            }
            tiers.push(tier);
        }

        Ok(PeriodicResultCache::from_parts(
            tiers,
            generator,
            self.clock,
            self.calculator,
            self.events,
        ))
    }
}

impl<T: PeriodicPayload> PeriodicResultCache<T> {
    pub fn builder() -> PeriodicResultCacheBuilder<T> {
        PeriodicResultCacheBuilder::new()
    }

    /// Cache over real infrastructure with the default clock and sink.
    pub fn from_config(config: &TallyConfig) -> TallyResult<Self> {
        Ok(PeriodicResultCacheBuilder::from_config(config)?.build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{GeneratedResult, GenerationError, UserId};

    struct Unreachable;

    #[async_trait::async_trait]
    impl ResultGenerator<u32> for Unreachable {
        async fn fetch_or_generate(
            &self,
            _user_id: &UserId,
            _force_refresh: bool,
        ) -> Result<GeneratedResult<u32>, GenerationError> {
            Err(GenerationError::service(None, "unreachable"))
        }
    }

    #[test]
    fn test_build_requires_generator() {
        let err = PeriodicResultCache::<u32>::builder().build().unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingRequired {
                field: "generator".to_string()
            }
        );
    }

    #[test]
    fn test_build_defaults_to_memory_only() {
        let cache = PeriodicResultCache::<u32>::builder()
            .generator(Arc::new(Unreachable))
            .build()
            .unwrap();
        assert_eq!(cache.tier_kinds(), vec![TierKind::Memory]);
    }

    #[test]
    fn test_build_rejects_tier_in_wrong_slot() {
        let err = PeriodicResultCache::<u32>::builder()
            .durable_tier(Arc::new(MemoryTier::new()))
            .generator(Arc::new(Unreachable))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "durable_tier"
        ));
    }
}
