//! Lock-free counters behind `PeriodicResultCache::stats`.

use std::sync::atomic::{AtomicU64, Ordering};

use tally_core::{CacheStats, TierKind, TierStats};

#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    failures: AtomicU64,
    write_failures: AtomicU64,
}

impl TierCounters {
    fn snapshot(&self) -> TierStats {
        TierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CacheMetrics {
    memory: TierCounters,
    durable: TierCounters,
    remote_store: TierCounters,
    generations: AtomicU64,
    generation_failures: AtomicU64,
}

impl CacheMetrics {
    fn tier(&self, tier: TierKind) -> &TierCounters {
        match tier {
            TierKind::Memory => &self.memory,
            TierKind::Durable => &self.durable,
            TierKind::RemoteStore => &self.remote_store,
        }
    }

    pub fn record_hit(&self, tier: TierKind) {
        self.tier(tier).hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self, tier: TierKind) {
        self.tier(tier).misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A stale entry counts as a miss too.
    pub fn record_stale(&self, tier: TierKind) {
        let counters = self.tier(tier);
        counters.stale.fetch_add(1, Ordering::Relaxed);
        counters.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A failed read counts as a miss too.
    pub fn record_read_failure(&self, tier: TierKind) {
        let counters = self.tier(tier);
        counters.failures.fetch_add(1, Ordering::Relaxed);
        counters.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self, tier: TierKind) {
        self.tier(tier).write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_generation(&self) {
        self.generations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_generation_failure(&self) {
        self.generation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            memory: self.memory.snapshot(),
            durable: self.durable.snapshot(),
            remote_store: self.remote_store.snapshot(),
            generations: self.generations.load(Ordering::Relaxed),
            generation_failures: self.generation_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counts() {
        let metrics = CacheMetrics::default();
        metrics.record_hit(TierKind::Memory);
        metrics.record_stale(TierKind::Durable);
        metrics.record_read_failure(TierKind::RemoteStore);
        metrics.record_write_failure(TierKind::RemoteStore);
        metrics.record_generation();

        let stats = metrics.snapshot();
        assert_eq!(stats.memory.hits, 1);
        assert_eq!(stats.durable.stale, 1);
        assert_eq!(stats.durable.misses, 1);
        assert_eq!(stats.remote_store.failures, 1);
        assert_eq!(stats.remote_store.misses, 1);
        assert_eq!(stats.remote_store.write_failures, 1);
        assert!((stats.remote_store.hit_rate() - 0.0).abs() < 0.001);
        assert_eq!(stats.generations, 1);
        assert_eq!(stats.generation_failures, 0);
    }
}
