//! Cache statistics snapshots.

use serde::{Deserialize, Serialize};

use crate::result::TierKind;

/// Counters for a single tier.
///
/// Every read is counted once, as either a hit or a miss. `stale` and
/// `failures` break the misses down further and are included in `misses`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierStats {
    /// Reads answered with a current-period result.
    pub hits: u64,
    /// Reads that did not produce a current-period result.
    pub misses: u64,
    /// Misses that found a result for another period.
    pub stale: u64,
    /// Misses caused by a read failure.
    pub failures: u64,
    /// Failed writes and removes. Not reads, so never part of the hit rate.
    #[serde(default)]
    pub write_failures: u64,
}

impl TierStats {
    /// Total reads served by this tier.
    pub fn reads(&self) -> u64 {
        self.hits + self.misses
    }

    /// Hit rate over all reads (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.reads();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Snapshot of a cache's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub memory: TierStats,
    pub durable: TierStats,
    pub remote_store: TierStats,
    /// Successful generator calls.
    pub generations: u64,
    /// Failed generator calls.
    pub generation_failures: u64,
}

impl CacheStats {
    pub fn tier(&self, tier: TierKind) -> &TierStats {
        match tier {
            TierKind::Memory => &self.memory,
            TierKind::Durable => &self.durable,
            TierKind::RemoteStore => &self.remote_store,
        }
    }

    /// Fraction of `get` calls answered without the generator.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory.hits + self.durable.hits + self.remote_store.hits;
        let total = hits + self.generations + self.generation_failures;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            memory: TierStats {
                hits: 6,
                ..Default::default()
            },
            durable: TierStats {
                hits: 1,
                ..Default::default()
            },
            remote_store: TierStats {
                hits: 1,
                ..Default::default()
            },
            generations: 2,
            generation_failures: 0,
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);
        assert!((CacheStats::default().hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_tier_stats_hit_rate_counts_each_read_once() {
        // Three misses, two of them stale and one a failed read.
        let stats = TierStats {
            hits: 1,
            misses: 3,
            stale: 2,
            failures: 1,
            write_failures: 5,
        };
        assert_eq!(stats.reads(), 4);
        assert!((stats.hit_rate() - 0.25).abs() < 0.001);
        assert!((TierStats::default().hit_rate() - 0.0).abs() < 0.001);
    }
}
