mod common;

use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Map, Value};

use common::{Harness, VIEWER};
use sqlgate::cache::{self, Cache, CacheTtls, MemoryStore};

fn params(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[tokio::test]
async fn rate_limit_saturates_at_limit() -> Result<()> {
    let cache = Cache::with_store(Arc::new(MemoryStore::new()), CacheTtls::default());
    let results = [
        cache.check_rate_limit(VIEWER, 3).await,
        cache.check_rate_limit(VIEWER, 3).await,
        cache.check_rate_limit(VIEWER, 3).await,
        cache.check_rate_limit(VIEWER, 3).await,
    ];
    assert_eq!(results, [true, true, true, false]);
    assert_eq!(cache.rate_limit_remaining(VIEWER, 3).await, 0);
    // Other users have their own window
    assert!(cache.check_rate_limit(VIEWER + 1, 3).await);
    Ok(())
}

#[tokio::test]
async fn concurrent_burst_never_exceeds_limit() -> Result<()> {
    let cache = Arc::new(Cache::with_store(Arc::new(MemoryStore::new()), CacheTtls::default()));
    let attempts = (0..50).map(|_| {
        let cache = cache.clone();
        async move { cache.check_rate_limit(VIEWER, 10).await }
    });
    let allowed = futures::future::join_all(attempts)
        .await
        .into_iter()
        .filter(|ok| *ok)
        .count();
    assert_eq!(allowed, 10);
    Ok(())
}

#[tokio::test]
async fn query_keys_are_content_addressed() -> Result<()> {
    let a = params(json!({"region": "west", "status": "open"}));
    let b = params(json!({"status": "open", "region": "west"}));

    // Parameter order does not matter, whitespace outside literals does not matter
    assert_eq!(
        cache::query_key("SELECT * FROM orders WHERE region = :region", Some(&a)),
        cache::query_key("SELECT *  FROM orders\nWHERE region = :region", Some(&b))
    );
    // Different values or different text are different entries
    let c = params(json!({"region": "east", "status": "open"}));
    assert_ne!(
        cache::query_key("SELECT * FROM orders WHERE region = :region", Some(&a)),
        cache::query_key("SELECT * FROM orders WHERE region = :region", Some(&c))
    );
    assert_ne!(
        cache::query_key("SELECT * FROM orders", None),
        cache::query_key("select * from orders", None)
    );
    assert!(cache::query_key("SELECT 1", None).starts_with(cache::QUERY_RESULT_PREFIX));
    Ok(())
}

#[tokio::test]
async fn disabled_cache_keeps_pipeline_working() -> Result<()> {
    let h = Harness::uncached().await;
    h.seed_grant(VIEWER, "orders", None, None).await;

    let first = h.services.executor.execute("SELECT * FROM orders", VIEWER, None, true).await?;
    let second = h.services.executor.execute("SELECT * FROM orders", VIEWER, None, true).await?;
    assert!(!first.cached);
    assert!(!second.cached);
    assert_eq!(first.rows, second.rows);
    assert_eq!(h.backend.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn flushing_query_results_forces_reexecution() -> Result<()> {
    let h = Harness::new().await;
    h.seed_grant(VIEWER, "orders", None, None).await;

    h.services.executor.execute("SELECT * FROM orders", VIEWER, None, true).await?;
    assert!(h.services.executor.execute("SELECT * FROM orders", VIEWER, None, true).await?.cached);

    assert_eq!(h.services.cache.invalidate_query_cache().await, 1);
    let again = h.services.executor.execute("SELECT * FROM orders", VIEWER, None, true).await?;
    assert!(!again.cached);
    assert_eq!(h.backend.calls(), 2);
    Ok(())
}
