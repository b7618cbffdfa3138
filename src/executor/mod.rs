// Query Executor
//
// Validate -> access control -> rate limit -> result cache -> bounded database call -> cache
// population. Every invocation ends in exactly one audit append, success or failure.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

use crate::access::{column_policy, AccessControl, AccessError, ColumnError, ColumnPolicy};
use crate::audit::{AuditEntry, AuditLog};
use crate::cache::Cache;
use crate::config::AppConfig;
use crate::database::{QueryBackend, QueryRows};
use crate::error::QueryError;
use crate::sql::{self, SqlError};
use crate::types::{ExecutionResult, QueryRequest, Row};
use crate::validator::{self, ValidationError};

/// Per-process execution limits
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Logical database name used for permission lookups
    pub database: String,
    pub timeout: Duration,
    pub max_results: u64,
    pub rate_limit: Option<u32>,
    pub audit_enabled: bool,
}

impl ExecutorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            database: config.database.database_name.clone(),
            timeout: config.query.timeout(),
            max_results: config.query.max_results,
            rate_limit: config.query.rate_limit(),
            audit_enabled: config.audit.enabled,
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            database: "public".to_string(),
            timeout: Duration::from_secs(30),
            max_results: 1000,
            rate_limit: None,
            audit_enabled: true,
        }
    }
}

pub struct Executor {
    access: Arc<AccessControl>,
    cache: Arc<Cache>,
    backend: Arc<dyn QueryBackend>,
    audit: Arc<dyn AuditLog>,
    settings: ExecutorSettings,
}

impl Executor {
    pub fn new(
        access: Arc<AccessControl>,
        cache: Arc<Cache>,
        backend: Arc<dyn QueryBackend>,
        audit: Arc<dyn AuditLog>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            access,
            cache,
            backend,
            audit,
            settings,
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub async fn execute(
        &self,
        query_text: &str,
        user_id: i64,
        params: Option<Map<String, Value>>,
        cache_allowed: bool,
    ) -> Result<ExecutionResult, QueryError> {
        let mut request = QueryRequest::new(query_text, user_id).with_cache(cache_allowed);
        request.params = params;
        self.execute_request(request).await
    }

    pub async fn execute_request(&self, request: QueryRequest) -> Result<ExecutionResult, QueryError> {
        let span = tracing::info_span!(
            "execute",
            invocation_id = %Uuid::new_v4(),
            user_id = request.user_id
        );
        async move {
            let started = Instant::now();
            let outcome = self.run(&request).await;
            self.record(&request, &outcome, started).await;
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(&self, request: &QueryRequest) -> Result<ExecutionResult, QueryError> {
        let user_id = request.user_id;
        let database = self.settings.database.as_str();
        let query_text = sql::trim_statement(&request.query_text);

        // 1. Validate
        if let Err(e) = validator::validate(query_text, false) {
            tracing::warn!("Query rejected by validator: {}", e);
            return Err(e.into());
        }

        // 2. Tables
        let tables = validator::extract_tables(query_text);
        if tables.is_empty() {
            tracing::warn!("Query references no resolvable tables");
            return Err(ValidationError::NoTables.into());
        }
        tracing::debug!(?tables, "Validated query");

        // 3. Access control and row filters
        let mut rewritten = query_text.to_string();
        let mut column_limits = BTreeMap::new();
        for table in &tables {
            let (has_access, permission) = self
                .access
                .check_table_access(user_id, database, table)
                .await
                .map_err(|e| access_failure(e, table))?;
            let Some(permission) = permission.filter(|_| has_access) else {
                tracing::warn!(table = %table, "Access denied");
                return Err(QueryError::PermissionDenied { table: table.clone() });
            };

            if permission.row_filter.is_some() {
                rewritten = self
                    .access
                    .apply_row_filter(user_id, database, table, &rewritten)
                    .await
                    .map_err(|e| access_failure(e, table))?;
            }
            if let Some(columns) = permission.allowed_columns {
                column_limits.insert(table.clone(), columns);
            }
        }

        // Column grants cover every reference, not only the result labels
        let policy = column_policy(query_text, &column_limits).map_err(column_failure)?;

        // 4. Rate limit
        if let Some(limit) = self.settings.rate_limit {
            if !self.cache.check_rate_limit(user_id, limit).await {
                tracing::warn!(limit, "Rate limit exceeded");
                return Err(QueryError::RateLimited { limit });
            }
        }

        // 5. Result cache
        let params = request.params.as_ref();
        if request.cache_allowed {
            if let Some(cached) = self.cache.get_query_result::<QueryRows>(&rewritten, params).await {
                tracing::debug!("Serving cached result");
                let rows = project(&policy, cached);
                return Ok(build_result(rows, rewritten, 0.0, true));
            }
        }

        // 6. Row cap and parameter binding
        let capped = sql::enforce_limit(&rewritten, self.settings.max_results).map_err(rewrite_failure)?;
        let (bound, values) = sql::bind_named_params(&capped, params).map_err(|e| match e {
            missing @ SqlError::MissingParameter(_) => QueryError::Execution(missing.to_string()),
            other => rewrite_failure(other),
        })?;

        // 7. Bounded execution
        let timeout = self.settings.timeout;
        let timeout_secs = timeout.as_secs();
        let started = Instant::now();
        let rows = match tokio::time::timeout(timeout, self.backend.fetch(&bound, &values, timeout)).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => {
                let err = QueryError::from_backend(e, timeout_secs);
                if matches!(err, QueryError::Timeout { .. }) {
                    tracing::warn!("Query cancelled by statement timeout");
                } else {
                    tracing::error!("Query execution failed: {}", err);
                }
                return Err(err);
            }
            Err(_) => {
                tracing::warn!("Query exceeded {:?}, abandoning", timeout);
                return Err(QueryError::Timeout { timeout_secs });
            }
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        // 8. Populate cache with the untrimmed rows
        if request.cache_allowed && !rows.is_empty() {
            self.cache.set_query_result(&rewritten, params, &rows).await;
        }

        let rows = project(&policy, rows);
        Ok(build_result(rows, rewritten, elapsed_ms, false))
    }

    /// Exactly one append per invocation. Failures here are logged, never returned.
    async fn record(&self, request: &QueryRequest, outcome: &Result<ExecutionResult, QueryError>, started: Instant) {
        match outcome {
            Ok(result) => tracing::info!(
                rows = result.row_count,
                cached = result.cached,
                execution_time_ms = result.execution_time_ms,
                "Query completed"
            ),
            Err(e) => tracing::info!(kind = e.kind(), "Query failed"),
        }

        if !self.settings.audit_enabled {
            return;
        }

        let entry = match outcome {
            Ok(result) => AuditEntry::success(
                request.user_id,
                request.question.clone(),
                request.query_text.as_str(),
                result.row_count,
                result.execution_time_ms,
            ),
            Err(e) => AuditEntry::failure(
                request.user_id,
                request.question.clone(),
                request.query_text.as_str(),
                e.kind(),
                e.to_string(),
                started.elapsed().as_secs_f64() * 1000.0,
            ),
        };
        if let Err(e) = self.audit.append(entry).await {
            tracing::warn!("Failed to write audit record: {}", e);
        }
    }
}

fn build_result(rows: QueryRows, query_text: String, execution_time_ms: f64, cached: bool) -> ExecutionResult {
    let columns = rows.columns;
    let rows: Vec<Row> = rows
        .rows
        .into_iter()
        .map(|values| Row::from_columns(&columns, values))
        .collect();
    ExecutionResult {
        row_count: rows.len(),
        rows,
        columns,
        execution_time_ms,
        cached,
        query_text,
    }
}

/// Drop result columns the caller's grants hide
fn project(policy: &ColumnPolicy, mut rows: QueryRows) -> QueryRows {
    if policy.is_unrestricted() {
        return rows;
    }
    let keep: Vec<bool> = rows.columns.iter().map(|c| policy.allows(c)).collect();
    if keep.iter().all(|k| *k) {
        return rows;
    }

    rows.columns = rows
        .columns
        .into_iter()
        .zip(&keep)
        .filter_map(|(c, k)| k.then_some(c))
        .collect();
    rows.rows = rows
        .rows
        .into_iter()
        .map(|values| values.into_iter().zip(&keep).filter_map(|(v, k)| k.then_some(v)).collect())
        .collect();
    tracing::debug!(columns = ?rows.columns, "Trimmed result columns");
    rows
}

fn column_failure(err: ColumnError) -> QueryError {
    match err.table() {
        Some(table) => {
            tracing::warn!(table, "Column grant refused query: {}", err);
            QueryError::PermissionDenied { table: table.to_string() }
        }
        None => QueryError::Validation(err.to_string()),
    }
}

fn rewrite_failure(err: SqlError) -> QueryError {
    QueryError::Validation(err.to_string())
}

fn access_failure(err: AccessError, table: &str) -> QueryError {
    match err {
        AccessError::Denied { table } => QueryError::PermissionDenied { table },
        AccessError::Rewrite(e) => rewrite_failure(e),
        AccessError::InvalidGrant(e) => QueryError::Validation(e.to_string()),
        AccessError::Store(e) => {
            tracing::error!(table, "Permission lookup failed: {}", e);
            QueryError::Execution(format!("permission lookup failed: {}", e))
        }
    }
}
