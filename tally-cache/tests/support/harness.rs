#![allow(dead_code)]

use std::sync::Arc;

use tally_cache::PeriodicResultCache;
use tally_test_utils::fixtures::{week_of_2024_03_04, Score};
use tally_test_utils::{CountingTier, ManualClock, RecordingEventSink, ScriptedGenerator};

pub const CURRENT: &str = "2024-03-04";
pub const PREVIOUS: &str = "2024-02-26";

/// A cache over three counting tiers, a scripted generator and a manual
/// clock parked on Wednesday of the `2024-03-04` week.
pub struct Harness {
    pub memory: Arc<CountingTier<Score>>,
    pub durable: Arc<CountingTier<Score>>,
    pub remote: Arc<CountingTier<Score>>,
    pub generator: Arc<ScriptedGenerator<Score>>,
    pub clock: Arc<ManualClock>,
    pub events: Arc<RecordingEventSink>,
    pub cache: PeriodicResultCache<Score>,
}

impl Harness {
    pub fn new(generator: ScriptedGenerator<Score>) -> Self {
        let memory = Arc::new(CountingTier::memory());
        let durable = Arc::new(CountingTier::durable());
        let remote = Arc::new(CountingTier::remote_store());
        let generator = Arc::new(generator);
        let clock = Arc::new(ManualClock::new(week_of_2024_03_04()));
        let events = Arc::new(RecordingEventSink::new());

        let cache = PeriodicResultCache::builder()
            .memory_tier(memory.clone())
            .durable_tier(durable.clone())
            .remote_store_tier(remote.clone())
            .generator(generator.clone())
            .clock(clock.clone())
            .event_sink(events.clone())
            .build()
            .expect("harness cache builds");

        Self {
            memory,
            durable,
            remote,
            generator,
            clock,
            events,
            cache,
        }
    }

    pub fn tiers(&self) -> [&CountingTier<Score>; 3] {
        [&*self.memory, &*self.durable, &*self.remote]
    }

    pub fn total_writes(&self) -> usize {
        self.tiers().iter().map(|tier| tier.writes()).sum()
    }
}
