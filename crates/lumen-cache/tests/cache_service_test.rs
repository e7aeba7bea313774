//! Cache-aside behavior of the single-node service against in-process stores.

use lumen_cache::{CacheBackend, CacheCategory, CacheService, MemoryBackend};
use lumen_config::{CacheConfig, DatabaseConfig};
use lumen_core::{LumenError, QueryExecutor};
use lumen_pool::create_sqlite_pool;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn service() -> (CacheService, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    (CacheService::new(backend.clone(), CacheConfig::default()), backend)
}

#[tokio::test(start_paused = true)]
async fn test_fallback_runs_again_after_ttl_expires() {
    let (cache, _backend) = service();
    let counter = AtomicUsize::new(0);
    let calls = &counter;

    let load = move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, LumenError>(Some(json!({"id": 3, "title": "Opening night"})))
    };

    cache.get_with_fallback(CacheCategory::EventData, &[&3], load, None).await.unwrap();
    cache.get_with_fallback(CacheCategory::EventData, &[&3], load, None).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Event data lives for 600 seconds
    tokio::time::advance(Duration::from_secs(599)).await;
    cache.get_with_fallback(CacheCategory::EventData, &[&3], load, None).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    let value = cache
        .get_with_fallback(CacheCategory::EventData, &[&3], load, None)
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(value.unwrap()["title"], json!("Opening night"));
}

#[tokio::test]
async fn test_query_cache_over_sqlite_pool() {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        target_size: 1,
        retry_delay_ms: 10,
        ..Default::default()
    };
    let pool = create_sqlite_pool(&config).await.unwrap();
    pool.execute_run("CREATE TABLE media (id INTEGER PRIMARY KEY, url TEXT)", &[])
        .await
        .unwrap();
    pool.execute_run("INSERT INTO media (url) VALUES (?)", &[json!("s3://bucket/a.jpg")])
        .await
        .unwrap();

    let executor: Arc<dyn QueryExecutor> = Arc::new(pool.clone());
    let (cache, backend) = service();
    let cache = cache.with_query_executor(executor);

    let rows = cache
        .get_query_with_cache("SELECT id, url FROM media WHERE id = ?", &[json!(1)], None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["url"], json!("s3://bucket/a.jpg"));

    // Change the row; the cached result is served until it expires
    pool.execute_run("UPDATE media SET url = ? WHERE id = 1", &[json!("s3://bucket/b.jpg")])
        .await
        .unwrap();
    let rows = cache
        .get_query_with_cache("SELECT id,   url\n FROM media WHERE id = ?", &[json!(1)], None)
        .await
        .unwrap();
    assert_eq!(rows[0]["url"], json!("s3://bucket/a.jpg"));

    let key = cache.query_key("SELECT id, url FROM media WHERE id = ?", &[json!(1)]);
    assert_eq!(backend.ttl(&key).await.unwrap(), 300);

    pool.close_all().await;
}

#[tokio::test]
async fn test_invalidate_category_leaves_other_categories() {
    let (cache, backend) = service();
    for id in 0..5 {
        cache.set(CacheCategory::MediaData, &[&"event", &1, &id], &id, None).await;
    }
    cache.set(CacheCategory::Config, &[&"site"], &json!({"theme": "dark"}), None).await;

    assert!(cache.invalidate_category(CacheCategory::MediaData).await);
    assert_eq!(backend.len(), 1);
    assert_eq!(cache.get_cache_stats().deletes, 5);
}
