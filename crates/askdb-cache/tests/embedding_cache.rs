use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use askdb_cache::embedding::key_for;
use askdb_cache::{EmbeddingCache, ManualClock, MemoryCacheStore};
use askdb_core::config::CacheSettings;
use askdb_core::error::CacheError;
use askdb_core::traits::CacheStore;
use askdb_core::types::EmbeddingVector;

fn vector(hash: &str) -> EmbeddingVector {
    EmbeddingVector { dims: vec![0.25, -0.5, 1.0], source_hash: hash.to_string() }
}

fn settings() -> CacheSettings {
    CacheSettings { ttl_secs: 60, op_timeout_ms: 50, ..CacheSettings::default() }
}

#[tokio::test]
async fn stored_vector_is_returned_until_ttl_elapses() {
    let clock = ManualClock::default();
    let store = Arc::new(MemoryCacheStore::with_clock(&settings(), Arc::new(clock.clone())));
    let cache = EmbeddingCache::new(store.clone(), &settings());

    assert_eq!(cache.get("abc").await.expect("get"), None);
    cache.put(&vector("abc")).await.expect("put");
    assert_eq!(cache.get("abc").await.expect("get"), Some(vector("abc")));
    assert!(store.get(&key_for("abc")).await.expect("get").is_some());

    clock.advance(Duration::from_secs(61));
    assert_eq!(cache.get("abc").await.expect("get"), None);
}

#[tokio::test]
async fn garbage_value_reads_as_miss() {
    let store = Arc::new(MemoryCacheStore::new(&settings()));
    store.put(&key_for("abc"), "not json".into(), Duration::from_secs(60)).await.expect("put");
    let cache = EmbeddingCache::new(store, &settings());
    assert_eq!(cache.get("abc").await.expect("get"), None);
}

struct StalledStore;

#[async_trait]
impl CacheStore for StalledStore {
    fn name(&self) -> &str { "stalled" }

    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(None)
    }

    async fn put(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
}

#[tokio::test(start_paused = true)]
async fn stalled_store_times_out() {
    let cache = EmbeddingCache::new(Arc::new(StalledStore), &settings());
    assert_eq!(cache.get("abc").await, Err(CacheError::Timeout(Duration::from_millis(50))));
    assert!(matches!(cache.put(&vector("abc")).await, Err(CacheError::Unavailable(_))));
}

#[tokio::test(start_paused = true)]
async fn sweeper_removes_expired_entries() {
    let clock = ManualClock::default();
    let store = Arc::new(MemoryCacheStore::with_clock(&settings(), Arc::new(clock.clone())));
    store.put("k", "v".into(), Duration::from_secs(1)).await.expect("put");
    let handle = store.spawn_sweeper(Duration::from_secs(1));
    clock.advance(Duration::from_secs(2));
    tokio::time::sleep(Duration::from_millis(1500)).await;
    tokio::task::yield_now().await;
    assert!(store.is_empty());
    handle.abort();
}
