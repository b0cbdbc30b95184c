//! End-to-end cache behavior over the SQLite driver.
//!
//! A shared `VirtualClock` stands in for wall time and a `FixedRandom`
//! pins the cleanup coin-flip, so expiry and sweep behavior is exact.

use std::sync::Arc;

use larder_core::{
    CacheConfig, CacheStore, DeflateCompressor, ExpiryFilter, FixedRandom, MessagePackSerializer,
    VirtualClock,
};
use larder_engine::PersistentCache;
use larder_sqlite::SqliteStore;

type TestCache = PersistentCache<
    SqliteStore,
    MessagePackSerializer,
    DeflateCompressor,
    Arc<VirtualClock>,
    FixedRandom,
>;

const START: i64 = 1_700_000_000;

async fn cache_with(config: CacheConfig, random: FixedRandom) -> (TestCache, SqliteStore, Arc<VirtualClock>) {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let clock = Arc::new(VirtualClock::new(START));
    let cache = PersistentCache::builder(store.clone())
        .config(config)
        .clock(Arc::clone(&clock))
        .random(random)
        .build()
        .unwrap();
    (cache, store, clock)
}

/// Cache whose probabilistic cleanup never fires.
async fn quiet_cache() -> (TestCache, SqliteStore, Arc<VirtualClock>) {
    cache_with(CacheConfig::default(), FixedRandom(0.999)).await
}

#[tokio::test]
async fn timed_entry_expires_and_is_removed_on_next_access() {
    let (cache, store, clock) = quiet_cache().await;

    cache
        .add_timed("A", "k", "v", START + 600, &[])
        .await
        .unwrap();
    assert_eq!(cache.get::<String>("A", "k").await.unwrap().as_deref(), Some("v"));
    assert!(cache.contains("A", "k").await.unwrap());

    clock.advance(601);
    assert_eq!(cache.get::<String>("A", "k").await.unwrap(), None);

    // The expired-row branch of get removed the row outright.
    assert!(store
        .peek_entry("A", "k", ExpiryFilter::All, 0)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn sliding_entry_is_restamped_by_every_get() {
    let (cache, _store, clock) = quiet_cache().await;

    cache.add_sliding("A", "k", "v", 600, &[]).await.unwrap();

    clock.advance(300);
    assert_eq!(cache.get::<String>("A", "k").await.unwrap().as_deref(), Some("v"));

    // 700 seconds after the insert; only the re-stamp at +300 keeps it live.
    clock.advance(400);
    assert_eq!(cache.get::<String>("A", "k").await.unwrap().as_deref(), Some("v"));
}

#[tokio::test]
async fn get_restamps_expiry_to_now_plus_interval() {
    let (cache, _store, clock) = quiet_cache().await;

    cache.add_sliding("A", "k", "v", 600, &[]).await.unwrap();
    clock.advance(10);
    cache.get::<String>("A", "k").await.unwrap().unwrap();

    let item = cache.peek_item::<String>("A", "k").await.unwrap().unwrap();
    assert_eq!(item.utc_expiry, START + 10 + 600);
    assert_eq!(item.interval, 600);
}

#[tokio::test]
async fn peek_does_not_extend_and_filters_expired_rows() {
    let (cache, _store, clock) = quiet_cache().await;

    cache.add_sliding("A", "k", "v", 600, &[]).await.unwrap();
    clock.advance(100);
    assert_eq!(cache.peek::<String>("A", "k").await.unwrap().as_deref(), Some("v"));

    let item = cache.peek_item::<String>("A", "k").await.unwrap().unwrap();
    assert_eq!(item.utc_expiry, START + 600);

    clock.advance(501);
    assert_eq!(cache.peek::<String>("A", "k").await.unwrap(), None);
}

#[tokio::test]
async fn removing_a_parent_invalidates_the_child() {
    let (cache, _store, _clock) = quiet_cache().await;

    cache.add_static("A", "p", "parent", &[]).await.unwrap();
    cache.add_static("A", "c", "child", &["p"]).await.unwrap();
    assert!(cache.contains("A", "c").await.unwrap());

    cache.remove("A", "p").await.unwrap();
    assert!(!cache.contains("A", "c").await.unwrap());
}

#[tokio::test]
async fn removing_the_root_clears_a_dependency_chain() {
    let (cache, _store, _clock) = quiet_cache().await;

    cache.add_static("A", "t1", "t1", &[]).await.unwrap();
    cache.add_static("A", "t2", "t2", &["t1"]).await.unwrap();
    cache.add_static("A", "t3", "t3", &["t2"]).await.unwrap();
    cache.add_static("A", "k", "v", &["t3"]).await.unwrap();

    cache.remove("A", "t1").await.unwrap();
    assert_eq!(cache.count(Some("A")).await.unwrap(), 0);
}

#[tokio::test]
async fn certain_auto_cleanup_sweeps_expired_rows_on_the_next_add() {
    let config = CacheConfig {
        chances_of_auto_cleanup: 1.0,
        ..CacheConfig::default()
    };
    let (cache, store, _clock) = cache_with(config, FixedRandom(0.0)).await;

    // Seed the table with already-expired rows, bypassing the facade so the
    // seeding itself cannot sweep.
    for i in 0..1_000 {
        let row = larder_core::EntryRow {
            partition: "A".to_string(),
            key: format!("stale-{i}"),
            utc_creation: START - 700,
            utc_expiry: START - 600,
            interval: 0,
            payload: vec![0; 4],
            compressed: false,
            parent_keys: larder_core::ParentKeys::new(),
        };
        store.upsert_entry(&row).await.unwrap();
    }
    assert_eq!(
        store.count_entries(None, ExpiryFilter::All, 0).await.unwrap(),
        1_000
    );

    cache
        .add_timed("A", "fresh", "v", START + 600, &[])
        .await
        .unwrap();

    assert_eq!(
        store.count_entries(None, ExpiryFilter::All, 0).await.unwrap(),
        1
    );
    assert_eq!(cache.count(None).await.unwrap(), 1);
}

#[tokio::test]
async fn counter_policy_sweeps_every_nth_insert() {
    let config = CacheConfig {
        insertion_count_before_auto_clean: Some(2),
        ..CacheConfig::default()
    };
    // The sampler would always fire; the counter policy must ignore it.
    let (cache, store, _clock) = cache_with(config, FixedRandom(0.0)).await;

    let stale = larder_core::EntryRow {
        partition: "A".to_string(),
        key: "stale".to_string(),
        utc_creation: START - 700,
        utc_expiry: START - 600,
        interval: 0,
        payload: vec![0; 4],
        compressed: false,
        parent_keys: larder_core::ParentKeys::new(),
    };
    store.upsert_entry(&stale).await.unwrap();

    cache.add_static("A", "k1", "v", &[]).await.unwrap();
    assert!(store
        .peek_entry("A", "stale", ExpiryFilter::All, 0)
        .await
        .unwrap()
        .is_some());

    cache.add_static("A", "k2", "v", &[]).await.unwrap();
    assert!(store
        .peek_entry("A", "stale", ExpiryFilter::All, 0)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn oversized_values_are_compressed_and_round_trip() {
    let (cache, store, _clock) = quiet_cache().await;

    let big = "x".repeat(20_000);
    cache.add_static("A", "big", &big, &[]).await.unwrap();

    let row = store
        .peek_entry("A", "big", ExpiryFilter::All, 0)
        .await
        .unwrap()
        .unwrap();
    assert!(row.compressed);
    assert!(row.payload.len() < 20_000);

    assert_eq!(cache.get::<String>("A", "big").await.unwrap(), Some(big));
}

#[tokio::test]
async fn small_values_stay_uncompressed() {
    let (cache, store, _clock) = quiet_cache().await;

    cache.add_static("A", "small", "v", &[]).await.unwrap();
    let row = store
        .peek_entry("A", "small", ExpiryFilter::All, 0)
        .await
        .unwrap()
        .unwrap();
    assert!(!row.compressed);
}

#[tokio::test]
async fn tampered_rows_read_as_absent_and_are_removed() {
    let (cache, store, _clock) = quiet_cache().await;

    cache.add_static("A", "k", "v", &[]).await.unwrap();

    // Flip a stamp byte out-of-band.
    let mut row = store
        .peek_entry("A", "k", ExpiryFilter::All, 0)
        .await
        .unwrap()
        .unwrap();
    row.payload[0] ^= 0xff;
    store.upsert_entry(&row).await.unwrap();

    assert_eq!(cache.get::<String>("A", "k").await.unwrap(), None);
    assert!(store
        .peek_entry("A", "k", ExpiryFilter::All, 0)
        .await
        .unwrap()
        .is_none());
    assert!(cache.last_error().is_none());
}

#[tokio::test]
async fn a_key_swapped_row_fails_verification() {
    let (cache, store, _clock) = quiet_cache().await;

    cache.add_static("A", "original", "v", &[]).await.unwrap();

    // Resurrect the payload under a different key, as an out-of-band copy
    // would.
    let mut row = store
        .peek_entry("A", "original", ExpiryFilter::All, 0)
        .await
        .unwrap()
        .unwrap();
    row.key = "forged".to_string();
    store.upsert_entry(&row).await.unwrap();

    assert_eq!(cache.get::<String>("A", "forged").await.unwrap(), None);
    assert_eq!(
        cache.get::<String>("A", "original").await.unwrap().as_deref(),
        Some("v")
    );
}

#[tokio::test]
async fn upsert_is_idempotent_per_identity() {
    let (cache, _store, _clock) = quiet_cache().await;

    for _ in 0..3 {
        cache.add_static("A", "k", "v", &[]).await.unwrap();
    }
    assert_eq!(cache.count(Some("A")).await.unwrap(), 1);
    assert_eq!(cache.get::<String>("A", "k").await.unwrap().as_deref(), Some("v"));
}

#[tokio::test]
async fn get_items_extends_sliding_entries_and_drops_expired_ones() {
    let (cache, _store, clock) = quiet_cache().await;

    cache.add_sliding("A", "sliding", "s", 600, &[]).await.unwrap();
    cache
        .add_timed("A", "timed", "t", START + 200, &[])
        .await
        .unwrap();
    cache
        .add_timed("A", "doomed", "d", START + 50, &[])
        .await
        .unwrap();

    clock.advance(100);
    let items = cache.get_items::<String>(Some("A")).await.unwrap();
    let keys: Vec<&str> = items.iter().map(|i| i.key.as_str()).collect();
    assert_eq!(keys, ["sliding", "timed"]);

    let sliding = &items[0];
    assert_eq!(sliding.utc_expiry, START + 100 + 600);
    assert_eq!(cache.count(Some("A")).await.unwrap(), 2);
}

#[tokio::test]
async fn peek_items_reads_the_whole_store_without_extension() {
    let (cache, _store, _clock) = quiet_cache().await;

    cache.add_static("A", "k1", "v1", &[]).await.unwrap();
    cache.add_static("B", "k2", "v2", &[]).await.unwrap();

    let items = cache.peek_items::<String>(None).await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].partition, "A");
    assert_eq!(items[1].partition, "B");
}

#[tokio::test]
async fn clear_respects_partition_scope_and_expiry_mode() {
    let (cache, _store, clock) = quiet_cache().await;

    cache.add_timed("A", "old", "v", START + 10, &[]).await.unwrap();
    cache.add_static("A", "new", "v", &[]).await.unwrap();
    cache.add_static("B", "other", "v", &[]).await.unwrap();

    clock.advance(100);
    assert_eq!(cache.clear_expired(None).await.unwrap(), 1);
    assert_eq!(cache.long_count(None).await.unwrap(), 2);

    assert_eq!(cache.clear_partition("A").await.unwrap(), 1);
    assert_eq!(cache.long_count(None).await.unwrap(), 1);

    assert_eq!(cache.clear().await.unwrap(), 1);
    assert_eq!(cache.long_count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn cache_size_tracks_stored_payloads() {
    let (cache, _store, _clock) = quiet_cache().await;

    assert_eq!(cache.cache_size_bytes(None).await.unwrap(), 0);
    cache.add_static("A", "k", "value", &[]).await.unwrap();
    let size = cache.cache_size_bytes(None).await.unwrap();
    assert!(size > 0);
    assert_eq!(cache.cache_size_bytes(Some("A")).await.unwrap(), size);
    assert_eq!(cache.cache_size_bytes(Some("B")).await.unwrap(), 0);
}

#[tokio::test]
async fn get_or_add_invokes_the_factory_only_on_a_miss() {
    let (cache, _store, _clock) = quiet_cache().await;

    let mut calls = 0;
    let value = cache
        .get_or_add_sliding(
            "A",
            "k",
            || {
                calls += 1;
                "fresh".to_string()
            },
            600,
            &[],
        )
        .await
        .unwrap();
    assert_eq!(value, "fresh");
    assert_eq!(calls, 1);

    let mut calls = 0;
    let value = cache
        .get_or_add_sliding(
            "A",
            "k",
            || {
                calls += 1;
                "ignored".to_string()
            },
            600,
            &[],
        )
        .await
        .unwrap();
    assert_eq!(value, "fresh");
    assert_eq!(calls, 0);
}

#[tokio::test]
async fn static_entries_carry_the_configured_interval() {
    let config = CacheConfig {
        static_interval_days: 2,
        ..CacheConfig::default()
    };
    let (cache, _store, _clock) = cache_with(config, FixedRandom(0.999)).await;

    cache.add_static("A", "k", "v", &[]).await.unwrap();
    let item = cache.peek_item::<String>("A", "k").await.unwrap().unwrap();
    assert_eq!(item.interval, 2 * 86_400);
    assert_eq!(item.utc_expiry, START + 2 * 86_400);
}

#[tokio::test]
async fn overlong_identifiers_are_truncated_consistently() {
    let (cache, _store, _clock) = quiet_cache().await;

    let long_key = "k".repeat(300);
    cache.add_static("A", &long_key, "v", &[]).await.unwrap();

    // Reads clip the same way, so the round trip still hits.
    assert_eq!(
        cache.get::<String>("A", &long_key).await.unwrap().as_deref(),
        Some("v")
    );
    let item = cache.get_item::<String>("A", &long_key).await.unwrap().unwrap();
    assert_eq!(item.key.len(), 255);
}

#[tokio::test]
async fn structured_values_round_trip() {
    use std::collections::BTreeMap;

    let (cache, _store, _clock) = quiet_cache().await;

    let value: (Vec<u64>, BTreeMap<String, String>, Option<f64>) = (
        vec![1, 2, 3],
        BTreeMap::from([("region".to_string(), "eu".to_string())]),
        Some(0.5),
    );
    cache.add_static("A", "structured", &value, &[]).await.unwrap();
    let restored = cache
        .get::<(Vec<u64>, BTreeMap<String, String>, Option<f64>)>("A", "structured")
        .await
        .unwrap();
    assert_eq!(restored, Some(value));
}
