use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

use super::error::CacheError;
use super::store::CacheStore;

const SCAN_BATCH: usize = 500;

/// GET the counter; seed it with an expiry when absent, refuse at the limit, INCR otherwise.
/// Runs as one script so concurrent requests from the same user cannot undercount.
const BOUNDED_INCREMENT: &str = r#"
local current = redis.call('GET', KEYS[1])
local limit = tonumber(ARGV[1])
if not current then
    if limit < 1 then
        return 0
    end
    redis.call('SET', KEYS[1], 1, 'EX', ARGV[2])
    return 1
end
if tonumber(current) >= limit then
    return 0
end
redis.call('INCR', KEYS[1])
return 1
"#;

pub struct RedisStore {
    manager: ConnectionManager,
    increment: redis::Script,
}

impl RedisStore {
    /// Connect, giving up after `connect_timeout`
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let manager = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Timeout(connect_timeout))??;

        let store = Self {
            manager,
            increment: redis::Script::new(BOUNDED_INCREMENT),
        };
        store.ping().await?;
        Ok(store)
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        // SETEX rejects a zero expiry
        let secs = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, secs).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.manager.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.manager.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn increment_bounded(&self, key: &str, limit: u64, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.manager.clone();
        let allowed: i64 = self
            .increment
            .key(key)
            .arg(limit)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;
        Ok(allowed == 1)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
