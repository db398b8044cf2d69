//! Tests for [`CacheInvalidator`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use ojeomneo_edge::store::{KvStore, MemoryStore, ScanPage, WindowHit};
use ojeomneo_edge::{CacheInvalidator, EdgeError, Result};

/// Answers the first scan, then fails.
struct FlakyStore {
    inner: MemoryStore,
}

#[async_trait]
impl KvStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn record_hit(&self, key: &str, hit: &WindowHit) -> Result<u64> {
        self.inner.record_hit(key, hit).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.inner.set_ex(key, value, ttl).await
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        if cursor != 0 {
            return Err(EdgeError::Store("connection reset".into()));
        }
        self.inner.scan(cursor, pattern, count).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        self.inner.delete(keys).await
    }
}

async fn seed(store: &dyn KvStore, keys: &[&str]) {
    for key in keys {
        store
            .set_ex(key, b"{}", Duration::from_secs(300))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn empty_prefix_clears_namespace_across_batches() {
    let store = Arc::new(MemoryStore::new());
    let cached: Vec<String> = (0..10).map(|i| format!("cache:api:{i:016x}")).collect();
    let cached_refs: Vec<&str> = cached.iter().map(String::as_str).collect();
    seed(store.as_ref(), &cached_refs).await;
    seed(
        store.as_ref(),
        &["cache:admin:0000000000000001", "ratelimit:api:203.0.113.9"],
    )
    .await;

    let invalidator = CacheInvalidator::new(Some(store.clone()), "cache:api").batch_size(3);
    let deleted = invalidator.invalidate_pattern("").await.unwrap();

    assert_eq!(deleted, 10);
    assert_eq!(store.len(), 2);
    assert!(store.get("cache:admin:0000000000000001").await.unwrap().is_some());
    assert!(store.get("ratelimit:api:203.0.113.9").await.unwrap().is_some());
}

#[tokio::test]
async fn prefix_only_deletes_matching_keys() {
    let store = Arc::new(MemoryStore::new());
    seed(
        store.as_ref(),
        &[
            "cache:api:ab00000000000001",
            "cache:api:ab00000000000002",
            "cache:api:cd00000000000003",
        ],
    )
    .await;

    let invalidator = CacheInvalidator::new(Some(store.clone()), "cache:api");
    assert_eq!(invalidator.invalidate_pattern("ab").await.unwrap(), 2);
    assert_eq!(store.len(), 1);
    assert_eq!(invalidator.invalidate_pattern("ab").await.unwrap(), 0);
}

#[tokio::test]
async fn without_store_nothing_is_deleted() {
    let invalidator = CacheInvalidator::new(None, "cache:api");
    assert_eq!(invalidator.invalidate_pattern("").await.unwrap(), 0);
}

#[tokio::test]
async fn store_errors_propagate() {
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
    });
    let keys: Vec<String> = (0..5).map(|i| format!("cache:api:{i:016x}")).collect();
    for key in &keys {
        store
            .set_ex(key, b"{}", Duration::from_secs(300))
            .await
            .unwrap();
    }

    let invalidator = CacheInvalidator::new(Some(store.clone()), "cache:api").batch_size(2);
    let result = invalidator.invalidate_pattern("").await;
    assert!(matches!(result, Err(EdgeError::Store(_))));
    // The first batch was already gone when the second scan failed.
    assert_eq!(store.inner.len(), 3);
}

#[tokio::test]
async fn glob_characters_are_rejected() {
    let store = Arc::new(MemoryStore::new());
    let invalidator = CacheInvalidator::new(Some(store), "cache:api");
    assert!(matches!(
        invalidator.invalidate_pattern("*").await,
        Err(EdgeError::Configuration(_))
    ));
}
