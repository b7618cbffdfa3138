#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use sqlgate::access::MemoryPermissionStore;
use sqlgate::audit::MemoryAuditLog;
use sqlgate::cache::{Cache, CacheTtls, MemoryStore};
use sqlgate::config::AppConfig;
use sqlgate::database::{BackendError, ColumnInfo, PermissionGrant, QueryBackend, QueryRows, User};
use sqlgate::services::{ServiceParts, Services};
use sqlgate::types::{Role, SqlValue};

pub const DB: &str = "public";

pub const VIEWER: i64 = 1;
pub const ANALYST: i64 = 2;
pub const ADMIN: i64 = 3;
pub const INACTIVE: i64 = 4;

/// What the scripted backend does for statements containing a marker
#[derive(Clone)]
pub enum Script {
    Rows(QueryRows),
    Fail(String),
    StatementTimeout,
    Sleep(Duration),
}

/// Stands in for Postgres: records every statement it receives and answers according to
/// the first script whose marker appears in the statement
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<Vec<(String, Script)>>,
    executed: Mutex<Vec<(String, Vec<Value>)>>,
}

impl ScriptedBackend {
    pub fn script(&self, marker: &str, script: Script) {
        self.scripts.lock().unwrap().push((marker.to_string(), script));
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().iter().map(|(sql, _)| sql.clone()).collect()
    }

    pub fn executed_params(&self) -> Vec<Vec<Value>> {
        self.executed.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
    }

    pub fn calls(&self) -> usize {
        self.executed.lock().unwrap().len()
    }
}

#[async_trait]
impl QueryBackend for ScriptedBackend {
    async fn fetch(&self, sql: &str, params: &[Value], _timeout: Duration) -> Result<QueryRows, BackendError> {
        self.executed
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));

        let script = self
            .scripts
            .lock()
            .unwrap()
            .iter()
            .find(|(marker, _)| sql.contains(marker.as_str()))
            .map(|(_, script)| script.clone());

        match script {
            Some(Script::Rows(rows)) => Ok(rows),
            Some(Script::Fail(message)) => Err(BackendError::Database(message)),
            Some(Script::StatementTimeout) => Err(BackendError::Timeout),
            Some(Script::Sleep(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(QueryRows::default())
            }
            None => Ok(orders()),
        }
    }

    async fn describe_table(&self, _database: &str, table: &str) -> Result<Vec<ColumnInfo>, BackendError> {
        if table != "orders" {
            return Ok(Vec::new());
        }
        Ok(["id", "status", "region"]
            .iter()
            .enumerate()
            .map(|(i, name)| ColumnInfo {
                name: name.to_string(),
                data_type: "text".to_string(),
                is_nullable: false,
                ordinal_position: i as i32 + 1,
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Default result: two orders rows
pub fn orders() -> QueryRows {
    QueryRows {
        columns: vec!["id".to_string(), "status".to_string(), "region".to_string()],
        rows: vec![
            vec![
                SqlValue::Integer(1),
                SqlValue::Text("open".to_string()),
                SqlValue::Text("west".to_string()),
            ],
            vec![
                SqlValue::Integer(2),
                SqlValue::Text("shipped".to_string()),
                SqlValue::Text("west".to_string()),
            ],
        ],
    }
}

pub struct Harness {
    pub services: Services,
    pub permissions: Arc<MemoryPermissionStore>,
    pub audit: Arc<MemoryAuditLog>,
    pub backend: Arc<ScriptedBackend>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let cache = Arc::new(Cache::with_store(Arc::new(MemoryStore::new()), CacheTtls::default()));
        Self::assemble(config, cache).await
    }

    /// Cache store unreachable at startup
    pub async fn uncached() -> Self {
        Self::assemble(test_config(), Arc::new(Cache::disabled(CacheTtls::default()))).await
    }

    async fn assemble(config: AppConfig, cache: Arc<Cache>) -> Self {
        let permissions = Arc::new(MemoryPermissionStore::new());
        permissions.put_user(User::new(VIEWER, "viewer", Role::Viewer)).await;
        permissions.put_user(User::new(ANALYST, "analyst", Role::Analyst)).await;
        permissions.put_user(User::new(ADMIN, "admin", Role::Admin)).await;
        permissions
            .put_user(User::new(INACTIVE, "former", Role::Analyst).inactive())
            .await;

        let audit = Arc::new(MemoryAuditLog::new());
        let backend = Arc::new(ScriptedBackend::default());
        let services = Services::from_parts(
            config,
            ServiceParts {
                cache,
                permissions: permissions.clone(),
                backend: backend.clone(),
                audit: audit.clone(),
            },
        );

        Self {
            services,
            permissions,
            audit,
            backend,
        }
    }

    /// Insert a grant directly into the store, bypassing the admin path
    pub async fn seed_grant(&self, user_id: i64, table: &str, columns: Option<&[&str]>, filter: Option<&str>) {
        use sqlgate::access::PermissionStore;

        self.permissions
            .upsert_permission(PermissionGrant {
                user_id,
                database_name: DB.to_string(),
                table_name: table.to_string(),
                allowed_columns: columns.map(|c| c.iter().map(|s| s.to_string()).collect()),
                row_filter: filter.map(str::to_string),
                can_read: true,
            })
            .await
            .unwrap();
    }
}

/// Development preset without rate limiting
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::development();
    config.database.database_name = DB.to_string();
    config.query.rate_limit_per_hour = 0;
    config.query.timeout_secs = 1;
    config
}
