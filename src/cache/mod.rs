// Cache Layer
//
// One store backs four namespaces: query results, schema metadata, permission lookups and
// rate-limit counters. Caching is an optimization only, so every store failure degrades to a
// miss (or a no-op write) with a warning instead of failing the caller.

pub mod error;
pub mod redis_store;
pub mod store;

pub use error::CacheError;
pub use redis_store::RedisStore;
pub use store::{CacheStore, MemoryStore};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;

pub const QUERY_RESULT_PREFIX: &str = "query:result:";
pub const SCHEMA_META_PREFIX: &str = "schema:meta:";
pub const USER_PERM_PREFIX: &str = "user:perm:";
pub const RATE_LIMIT_PREFIX: &str = "rate:limit:";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub query_result: Duration,
    pub schema: Duration,
    pub permission: Duration,
    pub rate_limit: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            query_result: Duration::from_secs(300),
            schema: Duration::from_secs(3600),
            permission: Duration::from_secs(900),
            rate_limit: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheHealth {
    Ok,
    Disabled,
    Unreachable(String),
}

pub struct Cache {
    store: Option<Arc<dyn CacheStore>>,
    ttls: CacheTtls,
}

impl Cache {
    /// Connect to the configured store; an unreachable store leaves the cache disabled
    pub async fn connect(config: &CacheConfig) -> Self {
        let ttls = config.ttls();
        if !config.enabled {
            tracing::info!("Cache disabled by configuration");
            return Self::disabled(ttls);
        }
        let Some(url) = config.url.as_deref() else {
            tracing::warn!("Cache enabled but no REDIS_URL configured, running uncached");
            return Self::disabled(ttls);
        };

        match RedisStore::connect(url, CONNECT_TIMEOUT).await {
            Ok(store) => {
                tracing::info!("Connected to cache store");
                Self::with_store(Arc::new(store), ttls)
            }
            Err(e) => {
                tracing::warn!("Cache store unreachable, running uncached: {}", e);
                Self::disabled(ttls)
            }
        }
    }

    pub fn with_store(store: Arc<dyn CacheStore>, ttls: CacheTtls) -> Self {
        Self {
            store: Some(store),
            ttls,
        }
    }

    pub fn disabled(ttls: CacheTtls) -> Self {
        Self { store: None, ttls }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn ttls(&self) -> &CacheTtls {
        &self.ttls
    }

    pub async fn health(&self) -> CacheHealth {
        match &self.store {
            None => CacheHealth::Disabled,
            Some(store) => match store.ping().await {
                Ok(()) => CacheHealth::Ok,
                Err(e) => CacheHealth::Unreachable(e.to_string()),
            },
        }
    }

    // Generic operations

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let store = self.store.as_ref()?;
        let bytes = match store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Cache get failed for {}: {}", key, e);
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Discarding undecodable cache entry {}: {}", key, e);
                None
            }
        }
    }

    /// Returns whether the value was stored
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Cache encode failed for {}: {}", key, e);
                return false;
            }
        };
        match store.set_ex(key, bytes, ttl).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Cache set failed for {}: {}", key, e);
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        match store.delete(key).await {
            Ok(existed) => existed,
            Err(e) => {
                tracing::warn!("Cache delete failed for {}: {}", key, e);
                false
            }
        }
    }

    /// Delete every key matching `pattern`, returning how many were removed
    pub async fn delete_matching(&self, pattern: &str) -> u64 {
        let Some(store) = self.store.as_ref() else {
            return 0;
        };
        let keys = match store.scan(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("Cache scan failed for {}: {}", pattern, e);
                return 0;
            }
        };
        let mut removed = 0;
        for key in keys {
            if self.delete(&key).await {
                removed += 1;
            }
        }
        removed
    }

    // Query results

    pub async fn get_query_result<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: Option<&Map<String, Value>>,
    ) -> Option<T> {
        let key = query_key(sql, params);
        let hit = self.get(&key).await;
        tracing::debug!(key = %key, hit = hit.is_some(), "Query result cache lookup");
        hit
    }

    pub async fn set_query_result<T: Serialize + ?Sized>(
        &self,
        sql: &str,
        params: Option<&Map<String, Value>>,
        result: &T,
    ) -> bool {
        self.set(&query_key(sql, params), result, self.ttls.query_result).await
    }

    pub async fn invalidate_query_cache(&self) -> u64 {
        let removed = self.delete_matching(&format!("{}*", QUERY_RESULT_PREFIX)).await;
        tracing::info!("Invalidated {} cached query results", removed);
        removed
    }

    // Schema metadata

    pub async fn get_schema<T: DeserializeOwned>(&self, database: &str, table: &str) -> Option<T> {
        self.get(&schema_key(database, table)).await
    }

    pub async fn set_schema<T: Serialize + ?Sized>(&self, database: &str, table: &str, metadata: &T) -> bool {
        self.set(&schema_key(database, table), metadata, self.ttls.schema).await
    }

    /// Drop schema entries; `None` matches every database or table
    pub async fn invalidate_schema_cache(&self, database: Option<&str>, table: Option<&str>) -> u64 {
        match (database, table) {
            (Some(db), Some(table)) => u64::from(self.delete(&schema_key(db, table)).await),
            _ => {
                let pattern = format!(
                    "{}{}:{}",
                    SCHEMA_META_PREFIX,
                    database.unwrap_or("*"),
                    table.unwrap_or("*")
                );
                self.delete_matching(&pattern).await
            }
        }
    }

    // Permissions

    pub async fn get_permission<T: DeserializeOwned>(&self, user_id: i64, database: &str, table: &str) -> Option<T> {
        self.get(&permission_key(user_id, database, table)).await
    }

    pub async fn set_permission<T: Serialize + ?Sized>(
        &self,
        user_id: i64,
        database: &str,
        table: &str,
        permission: &T,
    ) -> bool {
        self.set(&permission_key(user_id, database, table), permission, self.ttls.permission)
            .await
    }

    pub async fn invalidate_permission(&self, user_id: i64, database: &str, table: &str) -> bool {
        self.delete(&permission_key(user_id, database, table)).await
    }

    pub async fn invalidate_user_permissions(&self, user_id: i64) -> u64 {
        self.delete_matching(&format!("{}{}:*", USER_PERM_PREFIX, user_id)).await
    }

    // Rate limiting

    /// Count one request against the user's window. Returns false once `limit` is reached.
    ///
    /// Without a store (or when it fails) requests are allowed.
    pub async fn check_rate_limit(&self, user_id: i64, limit: u32) -> bool {
        let Some(store) = self.store.as_ref() else {
            return true;
        };
        match store
            .increment_bounded(&rate_limit_key(user_id), u64::from(limit), self.ttls.rate_limit)
            .await
        {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::warn!("Rate limit check failed for user {}, allowing: {}", user_id, e);
                true
            }
        }
    }

    pub async fn rate_limit_remaining(&self, user_id: i64, limit: u32) -> u32 {
        let Some(store) = self.store.as_ref() else {
            return limit;
        };
        let used = match store.get(&rate_limit_key(user_id)).await {
            Ok(Some(bytes)) => store::parse_counter(&bytes),
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!("Rate limit lookup failed for user {}: {}", user_id, e);
                0
            }
        };
        u64::from(limit).saturating_sub(used) as u32
    }
}

/// Sort object keys at every level so equal maps encode identically
fn canonical_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let sorted: Map<String, Value> = keys
                .into_iter()
                .map(|k| (k.clone(), canonical_json(&map[k])))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_json).collect()),
        other => other.clone(),
    }
}

/// `query:result:` + SHA-256 of the normalized text and the sorted-key parameter encoding
pub fn query_key(sql: &str, params: Option<&Map<String, Value>>) -> String {
    let normalized = crate::sql::normalize(sql).unwrap_or_else(|_| sql.trim().to_string());

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    if let Some(params) = params.filter(|p| !p.is_empty()) {
        let canonical = canonical_json(&Value::Object(params.clone()));
        hasher.update(canonical.to_string().as_bytes());
    }
    let digest = hasher.finalize();

    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}{}", QUERY_RESULT_PREFIX, hex)
}

pub fn schema_key(database: &str, table: &str) -> String {
    format!("{}{}:{}", SCHEMA_META_PREFIX, database, table)
}

pub fn permission_key(user_id: i64, database: &str, table: &str) -> String {
    format!("{}{}:{}:{}", USER_PERM_PREFIX, user_id, database, table)
}

pub fn rate_limit_key(user_id: i64) -> String {
    format!("{}{}", RATE_LIMIT_PREFIX, user_id)
}
