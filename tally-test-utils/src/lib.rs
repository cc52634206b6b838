//! TALLY Test Utilities
//!
//! Shared test infrastructure for the TALLY workspace:
//! - Mock tiers, record store and generator with call counters
//! - A manually driven clock for simulating period rollover
//! - Proptest generators
//! - Fixtures and assertions

pub use tally_core::{
    CacheEvent, CacheEventSink, CacheOutcome, CachedResult, Clock, GeneratedResult,
    GenerationError, Origin, PeriodCalculator, PeriodKey, PeriodKind, PeriodicPayload,
    StorageError, TierKind, Timestamp, UserId,
};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tally_client::ResultGenerator;
use tally_storage::{RemoteRecord, RemoteRecordStore, ResultTier, TierRead};

/// Lock a mutex, ignoring poisoning from a panicked test thread.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// MANUAL CLOCK
// ============================================================================

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Clock set to an RFC 3339 instant. Panics on a malformed literal.
    pub fn at(rfc3339: &str) -> Self {
        Self::new(fixtures::instant(rfc3339))
    }

    pub fn set(&self, now: Timestamp) {
        *lock(&self.now) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *lock(&self.now)
    }
}

// ============================================================================
// COUNTING TIER
// ============================================================================

/// In-memory tier that counts calls and can be told to fail.
///
/// Behaves like the real tier of the same kind: memory and durable tiers
/// drop stale entries when they read them, the remote store tier keeps them.
#[derive(Debug)]
pub struct CountingTier<T> {
    kind: TierKind,
    entries: Mutex<HashMap<UserId, CachedResult<T>>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    removes: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl<T: PeriodicPayload> CountingTier<T> {
    pub fn new(kind: TierKind) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn memory() -> Self {
        Self::new(TierKind::Memory)
    }

    pub fn durable() -> Self {
        Self::new(TierKind::Durable)
    }

    pub fn remote_store() -> Self {
        Self::new(TierKind::RemoteStore)
    }

    /// Store an entry directly, without counting a write.
    pub fn seed(&self, user_id: &UserId, result: CachedResult<T>) {
        lock(&self.entries).insert(user_id.clone(), result);
    }

    /// Current entry for a user, without counting a read.
    pub fn entry(&self, user_id: &UserId) -> Option<CachedResult<T>> {
        lock(&self.entries).get(user_id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    /// Make every subsequent read fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn reset_counts(&self) {
        self.reads.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
        self.removes.store(0, Ordering::SeqCst);
    }

    fn injected_failure(&self, op: &str) -> StorageError {
        StorageError::Unavailable {
            reason: format!("injected {} failure in {} tier", op, self.kind),
        }
    }
}

#[async_trait]
impl<T: PeriodicPayload> ResultTier<T> for CountingTier<T> {
    fn kind(&self) -> TierKind {
        self.kind
    }

    async fn read(
        &self,
        user_id: &UserId,
        current: &PeriodKey,
    ) -> Result<TierRead<T>, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(self.injected_failure("read"));
        }

        let mut entries = lock(&self.entries);
        let Some(entry) = entries.get(user_id).cloned() else {
            return Ok(TierRead::Miss);
        };
        if entry.is_valid_for(current) {
            return Ok(TierRead::Hit(entry.with_origin(self.kind.origin())));
        }

        let evicted = self.kind != TierKind::RemoteStore;
        if evicted {
            entries.remove(user_id);
        }
        Ok(TierRead::Stale {
            stored: entry.period_key().clone(),
            evicted,
        })
    }

    async fn write(&self, user_id: &UserId, result: &CachedResult<T>) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(self.injected_failure("write"));
        }
        let copy = result.clone().with_origin(self.kind.origin());
        lock(&self.entries).insert(user_id.clone(), copy);
        Ok(())
    }

    async fn remove(&self, user_id: &UserId) -> Result<bool, StorageError> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        if self.kind == TierKind::RemoteStore {
            return Ok(false);
        }
        Ok(lock(&self.entries).remove(user_id).is_some())
    }
}

// ============================================================================
// IN-MEMORY RECORD STORE
// ============================================================================

/// `RemoteRecordStore` over a map, for exercising `RemoteStoreTier`
/// without a database.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    rows: Mutex<HashMap<String, RemoteRecord>>,
    fetches: AtomicUsize,
    upserts: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: RemoteRecord) {
        lock(&self.rows).insert(record.user_id.clone(), record);
    }

    pub fn row(&self, user_id: &str) -> Option<RemoteRecord> {
        lock(&self.rows).get(user_id).cloned()
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Simulate the network being down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                reason: "remote store offline".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteRecordStore for InMemoryRecordStore {
    async fn fetch_record(&self, user_id: &UserId) -> Result<Option<RemoteRecord>, StorageError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.row(user_id.as_str()))
    }

    async fn upsert_record(&self, record: &RemoteRecord) -> Result<(), StorageError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.insert(record.clone());
        Ok(())
    }
}

// ============================================================================
// SCRIPTED GENERATOR
// ============================================================================

type Scripted<T> = Result<GeneratedResult<T>, GenerationError>;

/// Generator that replays queued responses and records every call.
///
/// Queued responses are used first, in order; once the queue is empty the
/// fallback (if any) answers every call.
#[derive(Debug)]
pub struct ScriptedGenerator<T> {
    queue: Mutex<VecDeque<Scripted<T>>>,
    fallback: Mutex<Option<Scripted<T>>>,
    calls: Mutex<Vec<(UserId, bool)>>,
    delay: Mutex<Option<Duration>>,
}

impl<T: PeriodicPayload> ScriptedGenerator<T> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        }
    }

    /// Generator that always returns `payload` for `period`.
    pub fn always(payload: T, period: impl Into<PeriodKey>) -> Self {
        let generator = Self::new();
        generator.set_fallback(Ok(GeneratedResult::new(payload, period.into())));
        generator
    }

    /// Generator that always fails with `error`.
    pub fn failing(error: GenerationError) -> Self {
        let generator = Self::new();
        generator.set_fallback(Err(error));
        generator
    }

    pub fn push_ok(&self, payload: T, period: impl Into<PeriodKey>) {
        lock(&self.queue).push_back(Ok(GeneratedResult::new(payload, period.into())));
    }

    pub fn push_err(&self, error: GenerationError) {
        lock(&self.queue).push_back(Err(error));
    }

    pub fn set_fallback(&self, response: Scripted<T>) {
        *lock(&self.fallback) = Some(response);
    }

    /// Sleep before answering, to keep calls in flight.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Every call as `(user, force_refresh)`, oldest first.
    pub fn calls(&self) -> Vec<(UserId, bool)> {
        lock(&self.calls).clone()
    }

    pub fn forced_calls(&self) -> usize {
        lock(&self.calls).iter().filter(|(_, forced)| *forced).count()
    }

    fn next_response(&self) -> Scripted<T> {
        if let Some(response) = lock(&self.queue).pop_front() {
            return response;
        }
        lock(&self.fallback).clone().unwrap_or_else(|| {
            Err(GenerationError::service(None, "scripted generator has no response"))
        })
    }
}

impl<T: PeriodicPayload> Default for ScriptedGenerator<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: PeriodicPayload> ResultGenerator<T> for ScriptedGenerator<T> {
    async fn fetch_or_generate(
        &self,
        user_id: &UserId,
        force_refresh: bool,
    ) -> Result<GeneratedResult<T>, GenerationError> {
        lock(&self.calls).push((user_id.clone(), force_refresh));
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.next_response()
    }
}

// ============================================================================
// RECORDING EVENT SINK
// ============================================================================

/// Event sink that keeps every event for later inspection.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<CacheEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CacheEvent> {
        lock(&self.events).clone()
    }

    /// Outcomes reported for one tier, in order.
    pub fn outcomes_for(&self, tier: TierKind) -> Vec<CacheOutcome> {
        lock(&self.events)
            .iter()
            .filter(|event| event.tier == Some(tier))
            .map(|event| event.outcome.clone())
            .collect()
    }

    /// Outcomes reported by the generator path, in order.
    pub fn generator_outcomes(&self) -> Vec<CacheOutcome> {
        lock(&self.events)
            .iter()
            .filter(|event| event.tier.is_none())
            .map(|event| event.outcome.clone())
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }
}

impl CacheEventSink for RecordingEventSink {
    fn on_cache_event(&self, event: &CacheEvent) {
        lock(&self.events).push(event.clone());
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for TALLY types.

    use super::*;
    use chrono::Weekday;
    use proptest::prelude::*;

    /// Generate a user id.
    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        "[a-z0-9]{1,12}".prop_map(|id: String| UserId::new(id))
    }

    /// Generate an instant between 2000 and 2100.
    pub fn arb_instant() -> impl Strategy<Value = Timestamp> {
        (946_684_800i64..4_102_444_800i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_default()
        })
    }

    pub fn arb_weekday() -> impl Strategy<Value = Weekday> {
        (0u8..7).prop_map(|n| match n {
            0 => Weekday::Mon,
            1 => Weekday::Tue,
            2 => Weekday::Wed,
            3 => Weekday::Thu,
            4 => Weekday::Fri,
            5 => Weekday::Sat,
            _ => Weekday::Sun,
        })
    }

    pub fn arb_period_kind() -> impl Strategy<Value = PeriodKind> {
        prop_oneof![
            Just(PeriodKind::Daily),
            arb_weekday().prop_map(|starts_on| PeriodKind::Weekly { starts_on }),
            Just(PeriodKind::Monthly),
        ]
    }

    /// Generate a score payload.
    pub fn arb_score() -> impl Strategy<Value = fixtures::Score> {
        (0u32..=100).prop_map(|score| fixtures::Score { score })
    }

    /// Generate any generator failure.
    pub fn arb_generation_error() -> impl Strategy<Value = GenerationError> {
        prop_oneof![
            "[a-z ]{0,20}".prop_map(|m: String| GenerationError::unauthorized(m)),
            proptest::option::of(0u64..600)
                .prop_map(|secs| GenerationError::rate_limited(secs.map(Duration::from_secs))),
            (proptest::option::of(500u16..600), "[a-z ]{0,20}")
                .prop_map(|(status, message)| GenerationError::service(status, message)),
            "[a-z ]{0,20}".prop_map(|r: String| GenerationError::invalid_response(r)),
        ]
    }

    /// Which tiers hold a current entry, as `(memory, durable, remote_store)`.
    pub fn arb_tier_population() -> impl Strategy<Value = (bool, bool, bool)> {
        (any::<bool>(), any::<bool>(), any::<bool>())
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use serde::{Deserialize, Serialize};

    /// A typical periodic payload.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Score {
        pub score: u32,
    }

    pub fn score(score: u32) -> Score {
        Score { score }
    }

    /// Parse an RFC 3339 instant. Panics on a malformed literal.
    pub fn instant(rfc3339: &str) -> Timestamp {
        chrono::DateTime::parse_from_rfc3339(rfc3339)
            .unwrap_or_else(|e| panic!("bad fixture instant {rfc3339}: {e}"))
            .with_timezone(&chrono::Utc)
    }

    /// Wednesday of the week keyed `2024-03-04`.
    pub fn week_of_2024_03_04() -> Timestamp {
        instant("2024-03-06T12:00:00Z")
    }

    pub fn period(key: &str) -> PeriodKey {
        PeriodKey::from(key)
    }

    /// A result as if it had been generated earlier in `period`.
    pub fn cached(score: u32, period: &str, origin: Origin) -> CachedResult<Score> {
        CachedResult::new(
            Score { score },
            PeriodKey::from(period),
            instant("2024-03-05T08:00:00Z"),
            origin,
        )
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cache outcomes.

    use super::*;

    /// Assert a `get` failed with the given `GenerationError::kind()`.
    #[track_caller]
    pub fn assert_generation_error<T: std::fmt::Debug>(
        result: &Result<T, GenerationError>,
        kind: &str,
    ) {
        match result {
            Err(err) => assert_eq!(err.kind(), kind, "wrong error kind: {:?}", err),
            Ok(value) => panic!("Expected {} error, got Ok: {:?}", kind, value),
        }
    }

    /// Assert a tier holds exactly `payload` for `period`.
    #[track_caller]
    pub fn assert_tier_holds<T: PeriodicPayload + PartialEq + std::fmt::Debug>(
        tier: &CountingTier<T>,
        user_id: &UserId,
        payload: &T,
        period: &str,
    ) {
        let entry = tier
            .entry(user_id)
            .unwrap_or_else(|| panic!("{} tier has no entry for {}", tier.kind(), user_id));
        assert_eq!(entry.payload(), payload, "{} tier payload", tier.kind());
        assert_eq!(entry.period_key().as_str(), period, "{} tier period", tier.kind());
    }
}
