use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::error::CacheError;

/// Key-value store with TTLs: GET / SETEX / DEL, a pattern scan for bulk invalidation, and an
/// atomic saturating counter for rate limiting.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Returns whether the key existed
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Keys matching a glob pattern where `*` matches any run of characters
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    /// Atomically increment `key` unless it already reached `limit`.
    ///
    /// A missing key is created at 1 with `ttl`. Returns false, without incrementing, once the
    /// counter is at the limit.
    async fn increment_bounded(&self, key: &str, limit: u64, ttl: Duration) -> Result<bool, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Process-local store with the same semantics as the Redis store
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live (unexpired) key count
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| e.expires_at > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let entry = MemoryEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.lock().await.remove(key).is_some())
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|(key, entry)| entry.expires_at > now && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn increment_bounded(&self, key: &str, limit: u64, ttl: Duration) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let current = entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| parse_counter(&entry.value));

        match current {
            None => {
                if limit == 0 {
                    return Ok(false);
                }
                entries.insert(
                    key.to_string(),
                    MemoryEntry {
                        value: b"1".to_vec(),
                        expires_at: now + ttl,
                    },
                );
                Ok(true)
            }
            Some(count) if count >= limit => Ok(false),
            Some(count) => {
                if let Some(entry) = entries.get_mut(key) {
                    entry.value = (count + 1).to_string().into_bytes();
                }
                Ok(true)
            }
        }
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Counter payloads are decimal text, as Redis INCR stores them
pub fn parse_counter(bytes: &[u8]) -> u64 {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

/// Glob match supporting only `*`
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !key.starts_with(first) || key.len() < first.len() + last.len() || !key.ends_with(last) {
        return false;
    }

    let mut rest = &key[first.len()..key.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_patterns() {
        assert!(glob_match("query:result:*", "query:result:abc"));
        assert!(glob_match("user:perm:7:*", "user:perm:7:public:orders"));
        assert!(!glob_match("user:perm:7:*", "user:perm:70:public:orders"));
        assert!(glob_match("schema:meta:*:orders", "schema:meta:public:orders"));
        assert!(!glob_match("schema:meta:*:orders", "schema:meta:public:orders_archive"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("a*a", "a"));
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let store = MemoryStore::new();
        store.set_ex("k", b"v".to_vec(), Duration::from_millis(0)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set_ex("k", b"v".to_vec(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn bounded_increment_saturates() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(3600);
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(store.increment_bounded("rate:limit:1", 3, ttl).await.unwrap());
        }
        assert_eq!(seen, vec![true, true, true, false]);
        assert_eq!(store.get("rate:limit:1").await.unwrap(), Some(b"3".to_vec()));
    }
}
