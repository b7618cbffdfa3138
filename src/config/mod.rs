use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub query: QueryConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL; skipped when printing the effective config
    #[serde(skip_serializing)]
    pub url: Option<String>,
    pub pool_size: u32,
    pub max_overflow: u32,
    pub pool_timeout_secs: u64,
    /// Logical database name used in (user, database, table) permission triples
    pub database_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(skip_serializing)]
    pub url: Option<String>,
    pub enabled: bool,
    pub query_result_ttl_secs: u64,
    pub schema_ttl_secs: u64,
    pub permission_ttl_secs: u64,
    pub rate_limit_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub timeout_secs: u64,
    pub max_results: u64,
    /// Requests per user per rate-limit window; 0 disables the check
    pub rate_limit_per_hour: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub enabled: bool,
    pub retention_days: u32,
}

impl DatabaseConfig {
    /// Hard ceiling on open connections: the pool plus its overflow
    pub fn max_connections(&self) -> u32 {
        self.pool_size + self.max_overflow
    }

    pub fn pool_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_timeout_secs)
    }
}

impl CacheConfig {
    pub fn ttls(&self) -> crate::cache::CacheTtls {
        crate::cache::CacheTtls {
            query_result: Duration::from_secs(self.query_result_ttl_secs),
            schema: Duration::from_secs(self.schema_ttl_secs),
            permission: Duration::from_secs(self.permission_ttl_secs),
            rate_limit: Duration::from_secs(self.rate_limit_ttl_secs),
        }
    }
}

impl QueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn rate_limit(&self) -> Option<u32> {
        (self.rate_limit_per_hour > 0).then_some(self.rate_limit_per_hour)
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Ok(v) = env::var("DATABASE_POOL_SIZE") {
            self.database.pool_size = v.parse().unwrap_or(self.database.pool_size);
        }
        if let Ok(v) = env::var("DATABASE_MAX_OVERFLOW") {
            self.database.max_overflow = v.parse().unwrap_or(self.database.max_overflow);
        }
        if let Ok(v) = env::var("DATABASE_POOL_TIMEOUT") {
            self.database.pool_timeout_secs = v.parse().unwrap_or(self.database.pool_timeout_secs);
        }
        if let Ok(v) = env::var("DATABASE_NAME") {
            if !v.trim().is_empty() {
                self.database.database_name = v.trim().to_string();
            }
        }

        // Cache overrides
        if let Ok(v) = env::var("REDIS_URL") {
            self.cache.url = Some(v);
        }
        if let Ok(v) = env::var("CACHE_ENABLED") {
            self.cache.enabled = v.parse().unwrap_or(self.cache.enabled);
        }
        if let Ok(v) = env::var("QUERY_CACHE_TTL_SECONDS") {
            self.cache.query_result_ttl_secs = v.parse().unwrap_or(self.cache.query_result_ttl_secs);
        }
        if let Ok(v) = env::var("SCHEMA_CACHE_TTL_SECONDS") {
            self.cache.schema_ttl_secs = v.parse().unwrap_or(self.cache.schema_ttl_secs);
        }
        if let Ok(v) = env::var("PERMISSION_CACHE_TTL_SECONDS") {
            self.cache.permission_ttl_secs = v.parse().unwrap_or(self.cache.permission_ttl_secs);
        }
        if let Ok(v) = env::var("RATE_LIMIT_TTL_SECONDS") {
            self.cache.rate_limit_ttl_secs = v.parse().unwrap_or(self.cache.rate_limit_ttl_secs);
        }

        // Query overrides
        if let Ok(v) = env::var("QUERY_TIMEOUT_SECONDS") {
            self.query.timeout_secs = v.parse().unwrap_or(self.query.timeout_secs);
        }
        if let Ok(v) = env::var("MAX_QUERY_RESULTS") {
            self.query.max_results = v.parse().unwrap_or(self.query.max_results);
        }
        if let Ok(v) = env::var("RATE_LIMIT_PER_USER_PER_HOUR") {
            self.query.rate_limit_per_hour = v.parse().unwrap_or(self.query.rate_limit_per_hour);
        }

        // Audit overrides
        if let Ok(v) = env::var("AUDIT_ENABLED") {
            self.audit.enabled = v.parse().unwrap_or(self.audit.enabled);
        }
        if let Ok(v) = env::var("AUDIT_RETENTION_DAYS") {
            self.audit.retention_days = v.parse().unwrap_or(self.audit.retention_days);
        }

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                url: None,
                pool_size: 5,
                max_overflow: 5,
                pool_timeout_secs: 30,
                database_name: "public".to_string(),
            },
            cache: CacheConfig {
                url: Some("redis://127.0.0.1:6379".to_string()),
                enabled: true,
                query_result_ttl_secs: 300,
                schema_ttl_secs: 3600,
                permission_ttl_secs: 900,
                rate_limit_ttl_secs: 3600,
            },
            query: QueryConfig {
                timeout_secs: 30,
                max_results: 1000,
                rate_limit_per_hour: 0,
            },
            audit: AuditConfig {
                enabled: true,
                retention_days: 30,
            },
        }
    }

    pub fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                url: None,
                pool_size: 10,
                max_overflow: 20,
                pool_timeout_secs: 30,
                database_name: "public".to_string(),
            },
            cache: CacheConfig {
                url: None,
                enabled: true,
                query_result_ttl_secs: 300,
                schema_ttl_secs: 3600,
                permission_ttl_secs: 900,
                rate_limit_ttl_secs: 3600,
            },
            query: QueryConfig {
                timeout_secs: 30,
                max_results: 1000,
                rate_limit_per_hour: 200,
            },
            audit: AuditConfig {
                enabled: true,
                retention_days: 90,
            },
        }
    }

    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                url: None,
                pool_size: 20,
                max_overflow: 40,
                pool_timeout_secs: 30,
                database_name: "public".to_string(),
            },
            cache: CacheConfig {
                url: None,
                enabled: true,
                query_result_ttl_secs: 300,
                schema_ttl_secs: 3600,
                permission_ttl_secs: 900,
                rate_limit_ttl_secs: 3600,
            },
            query: QueryConfig {
                timeout_secs: 30,
                max_results: 1000,
                rate_limit_per_hour: 100,
            },
            audit: AuditConfig {
                enabled: true,
                retention_days: 365,
            },
        }
    }
}
