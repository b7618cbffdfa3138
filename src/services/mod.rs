// Process wiring
//
// One instance of each service per process, built from `AppConfig` and handed around by
// reference. Tests assemble the same graph over in-memory stores through `from_parts`.

pub mod describe_service;

pub use describe_service::{DescribeError, DescribeService, TableDescription};

use serde::Serialize;
use std::sync::Arc;

use crate::access::{AccessControl, PermissionAdmin, PermissionStore, PgPermissionStore};
use crate::audit::{AuditLog, PgAuditLog};
use crate::cache::{Cache, CacheHealth};
use crate::config::AppConfig;
use crate::database::{DatabaseError, DatabaseManager, PgBackend, QueryBackend};
use crate::executor::{Executor, ExecutorSettings};

/// Store implementations the services run on
pub struct ServiceParts {
    pub cache: Arc<Cache>,
    pub permissions: Arc<dyn PermissionStore>,
    pub backend: Arc<dyn QueryBackend>,
    pub audit: Arc<dyn AuditLog>,
}

pub struct Services {
    pub config: AppConfig,
    /// Present when connected to Postgres
    pub database: Option<DatabaseManager>,
    pub cache: Arc<Cache>,
    pub access: Arc<AccessControl>,
    pub admin: PermissionAdmin,
    pub audit: Arc<dyn AuditLog>,
    pub executor: Executor,
    pub describe: DescribeService,
    backend: Arc<dyn QueryBackend>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// "ok" or "degraded"
    pub status: &'static str,
    pub database: String,
    pub cache: String,
}

impl HealthReport {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

impl Services {
    /// Connect to Postgres and the cache store. Only the database is required.
    pub async fn connect(config: AppConfig) -> Result<Self, DatabaseError> {
        let database = DatabaseManager::connect(&config.database).await?;
        let pool = database.pool().clone();
        let cache = Arc::new(Cache::connect(&config.cache).await);

        let parts = ServiceParts {
            cache,
            permissions: Arc::new(PgPermissionStore::new(pool.clone())),
            backend: Arc::new(PgBackend::new(pool.clone())),
            audit: Arc::new(PgAuditLog::new(pool)),
        };
        let mut services = Self::from_parts(config, parts);
        services.database = Some(database);
        Ok(services)
    }

    pub fn from_parts(config: AppConfig, parts: ServiceParts) -> Self {
        let ServiceParts {
            cache,
            permissions,
            backend,
            audit,
        } = parts;

        let access = Arc::new(AccessControl::new(permissions.clone(), cache.clone()));
        let admin = PermissionAdmin::new(permissions, cache.clone());
        let executor = Executor::new(
            access.clone(),
            cache.clone(),
            backend.clone(),
            audit.clone(),
            ExecutorSettings::from_config(&config),
        );
        let describe = DescribeService::new(
            access.clone(),
            cache.clone(),
            backend.clone(),
            config.database.database_name.clone(),
        );

        Self {
            config,
            database: None,
            cache,
            access,
            admin,
            audit,
            executor,
            describe,
            backend,
        }
    }

    /// Database reachability decides the overall status; a disabled cache is reported but
    /// does not degrade it
    pub async fn health(&self) -> HealthReport {
        let database = match self.backend.ping().await {
            Ok(()) => "ok".to_string(),
            Err(e) => {
                tracing::error!("Database health check failed: {}", e);
                format!("unreachable: {}", e)
            }
        };
        let cache = match self.cache.health().await {
            CacheHealth::Ok => "ok".to_string(),
            CacheHealth::Disabled => "disabled".to_string(),
            CacheHealth::Unreachable(e) => {
                tracing::warn!("Cache health check failed: {}", e);
                format!("unreachable: {}", e)
            }
        };

        let healthy = database == "ok" && !cache.starts_with("unreachable");
        HealthReport {
            status: if healthy { "ok" } else { "degraded" },
            database,
            cache,
        }
    }

    pub async fn close(&self) {
        if let Some(database) = &self.database {
            database.close().await;
        }
    }
}
