//! End-to-End Tests
//!
//! Real tiers all the way down: `MemoryTier`, an LMDB environment in a
//! temporary directory, `RemoteStoreTier` over an in-memory record store,
//! and `GeneratorClient` talking HTTP to a `wiremock` server. Time is a
//! `ManualClock` so the week rollover is deterministic.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tally_cache::PeriodicResultCache;
use tally_client::GeneratorClient;
use tally_core::{GeneratorConfig, TierKind};
use tally_storage::{
    LmdbDurableTier, MemoryTier, RemoteRecord, RemoteStoreTier, ResultTier, TierRead,
};
use tally_test_utils::assertions::assert_generation_error;
use tally_test_utils::fixtures::{cached, instant, period, score, week_of_2024_03_04, Score};
use tally_test_utils::{InMemoryRecordStore, ManualClock, Origin, UserId};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tally_cache=debug,tally_storage=debug,info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .try_init();
}

struct Stack {
    memory: Arc<MemoryTier<Score>>,
    durable: Arc<LmdbDurableTier<Score>>,
    store: Arc<InMemoryRecordStore>,
    clock: Arc<ManualClock>,
    cache: PeriodicResultCache<Score>,
}

fn generator_for(server: &MockServer) -> GeneratorClient {
    GeneratorClient::new(
        &GeneratorConfig::new(server.uri())
            .with_resource("score")
            .with_token("test-token")
            .with_timeout(Duration::from_secs(2)),
    )
    .expect("client should build")
}

fn stack(server: &MockServer, dir: &TempDir, store: Arc<InMemoryRecordStore>) -> Stack {
    let memory = Arc::new(MemoryTier::new());
    let durable = Arc::new(
        LmdbDurableTier::new(dir.path(), 16, "tally:result:").expect("durable tier opens"),
    );
    let clock = Arc::new(ManualClock::new(week_of_2024_03_04()));

    let cache = PeriodicResultCache::builder()
        .memory_tier(memory.clone())
        .durable_tier(durable.clone())
        .remote_store_tier(Arc::new(RemoteStoreTier::new(store.clone())))
        .generator(Arc::new(generator_for(server)))
        .clock(clock.clone())
        .build()
        .expect("cache builds");

    Stack {
        memory,
        durable,
        store,
        clock,
        cache,
    }
}

fn result_body(period_key: &str, score: u32) -> serde_json::Value {
    json!({ "period_key": period_key, "score": score })
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn test_week_lifecycle_with_rollover() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/score/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(result_body("2024-03-04", 73)))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/score/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(result_body("2024-03-11", 80)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let s = stack(&server, &dir, Arc::new(InMemoryRecordStore::new()));
    let user = UserId::from("u1");

    // Empty caches: generated and written everywhere.
    let first = s.cache.get(&user, false).await.unwrap();
    assert_eq!(first.origin(), Origin::FreshlyGenerated);
    assert_eq!(first.payload(), &score(73));

    assert_eq!(s.memory.peek(&user).unwrap().payload(), &score(73));
    let durable = s.durable.read(&user, &period("2024-03-04")).await.unwrap();
    assert_eq!(durable.into_option().unwrap().payload(), &score(73));
    let row = s.store.row("u1").unwrap();
    assert_eq!(row.period_key, "2024-03-04");
    assert_eq!(row.payload, json!({ "score": 73 }));

    // Same week: memory answers, nothing else is touched.
    let fetches = s.store.fetches();
    let second = s.cache.get(&user, false).await.unwrap();
    assert_eq!(second.origin(), Origin::Memory);
    assert_eq!(second.payload(), &score(73));
    assert_eq!(s.store.fetches(), fetches);

    // Monday of the next week.
    s.clock.set(instant("2024-03-11T09:00:00Z"));
    assert_eq!(s.cache.current_period(), period("2024-03-11"));

    let third = s.cache.get(&user, false).await.unwrap();
    assert_eq!(third.origin(), Origin::FreshlyGenerated);
    assert_eq!(third.payload(), &score(80));
    assert_eq!(third.period_key(), &period("2024-03-11"));
    assert_eq!(s.store.fetches(), fetches + 1);
    assert_eq!(s.store.row("u1").unwrap().period_key, "2024-03-11");

    let stats = s.cache.stats();
    assert_eq!(stats.memory.stale, 1);
    assert_eq!(stats.durable.misses, 2);
    assert_eq!(stats.remote_store.stale, 1);
    assert_eq!(stats.generations, 2);
}

#[tokio::test]
async fn test_durable_tier_serves_after_restart() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/score/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(result_body("2024-03-04", 41)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryRecordStore::new());
    let user = UserId::from("u1");

    {
        let s = stack(&server, &dir, store.clone());
        s.cache.get(&user, false).await.unwrap();
    }

    // New process: empty memory, same LMDB directory.
    let s = stack(&server, &dir, store.clone());
    let fetches = store.fetches();

    let result = s.cache.get(&user, false).await.unwrap();
    assert_eq!(result.origin(), Origin::Durable);
    assert_eq!(result.payload(), &score(41));
    assert_eq!(store.fetches(), fetches);
    assert_eq!(s.memory.peek(&user).unwrap().payload(), &score(41));
}

#[tokio::test]
async fn test_remote_row_serves_a_new_device() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryRecordStore::new());
    let user = UserId::from("u1");
    let row = cached(64, "2024-03-04", Origin::RemoteStore);
    store.insert(RemoteRecord::encode(&user, &row, row.cached_at()).unwrap());

    let s = stack(&server, &dir, store);
    let result = s.cache.get(&user, false).await.unwrap();

    assert_eq!(result.origin(), Origin::RemoteStore);
    assert_eq!(result.payload(), &score(64));
    assert_eq!(s.memory.len(), 1);
    assert_eq!(s.durable.entry_count().unwrap(), 1);
    assert_eq!(s.store.upserts(), 0);
}

#[tokio::test]
async fn test_missing_period_key_is_rejected_and_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/score/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "score": 73 })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let s = stack(&server, &dir, Arc::new(InMemoryRecordStore::new()));

    let result = s.cache.get(&UserId::from("u1"), false).await;

    assert_generation_error(&result, "invalid_response");
    assert!(s.memory.is_empty());
    assert_eq!(s.durable.entry_count().unwrap(), 0);
    assert_eq!(s.store.upserts(), 0);
}

#[tokio::test]
async fn test_forced_refresh_hits_force_endpoint_and_replaces_row() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/score/u1"))
        .and(query_param("force_refresh", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(result_body("2024-03-04", 99)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryRecordStore::new());
    let user = UserId::from("u1");
    let old = cached(10, "2024-03-04", Origin::RemoteStore);
    store.insert(RemoteRecord::encode(&user, &old, old.cached_at()).unwrap());

    let s = stack(&server, &dir, store);
    s.durable.write(&user, &old).await.unwrap();

    let result = s.cache.get(&user, true).await.unwrap();

    assert_eq!(result.payload(), &score(99));
    assert_eq!(s.store.row("u1").unwrap().payload, json!({ "score": 99 }));
    let durable = s.durable.read(&user, &period("2024-03-04")).await.unwrap();
    assert!(matches!(durable, TierRead::Hit(ref hit) if hit.payload() == &score(99)));
    assert_eq!(s.cache.tier_kinds(), TierKind::ALL.to_vec());
}

#[tokio::test]
async fn test_unauthorized_reaches_caller() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "detail": "token expired" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let s = stack(&server, &dir, Arc::new(InMemoryRecordStore::new()));

    let result = s.cache.get(&UserId::from("u1"), false).await;

    assert_generation_error(&result, "unauthorized");
    assert_eq!(s.cache.stats().generation_failures, 1);
    assert!(s.memory.is_empty());
}
