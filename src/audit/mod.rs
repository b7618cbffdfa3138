// Audit trail
//
// Append-only record of every pipeline invocation. Reporting reads (recent, popular, per-user
// statistics) and the retention sweep are the only other operations.

pub mod memory;
pub mod postgres;

pub use memory::MemoryAuditLog;
pub use postgres::PgAuditLog;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit store query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Audit store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AuditStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(AuditStatus::Success),
            "failed" => Ok(AuditStatus::Failed),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// One invocation, as appended
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub user_id: i64,
    pub question: Option<String>,
    pub query_text: String,
    pub status: AuditStatus,
    pub row_count: i64,
    pub execution_time_ms: f64,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn success(
        user_id: i64,
        question: Option<String>,
        query_text: impl Into<String>,
        row_count: usize,
        execution_time_ms: f64,
    ) -> Self {
        Self {
            user_id,
            question,
            query_text: query_text.into(),
            status: AuditStatus::Success,
            row_count: row_count as i64,
            execution_time_ms,
            error_kind: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn failure(
        user_id: i64,
        question: Option<String>,
        query_text: impl Into<String>,
        error_kind: &str,
        error_message: impl Into<String>,
        execution_time_ms: f64,
    ) -> Self {
        Self {
            user_id,
            question,
            query_text: query_text.into(),
            status: AuditStatus::Failed,
            row_count: 0,
            execution_time_ms,
            error_kind: Some(error_kind.to_string()),
            error_message: Some(error_message.into()),
            created_at: Utc::now(),
        }
    }
}

/// A stored entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub id: i64,
    #[serde(flatten)]
    pub entry: AuditEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopularQuery {
    pub question: Option<String>,
    pub query_text: String,
    pub execution_count: i64,
    pub avg_execution_time_ms: f64,
    pub total_rows_returned: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserStatistics {
    pub user_id: i64,
    pub period_days: u32,
    pub total_queries: i64,
    pub successful_queries: i64,
    pub failed_queries: i64,
    /// Percentage, two decimals
    pub success_rate: f64,
    /// Mean over successful queries, two decimals
    pub avg_execution_time_ms: f64,
    pub total_rows_returned: i64,
}

impl UserStatistics {
    pub fn from_counts(
        user_id: i64,
        period_days: u32,
        successful_queries: i64,
        failed_queries: i64,
        avg_execution_time_ms: f64,
        total_rows_returned: i64,
    ) -> Self {
        let total_queries = successful_queries + failed_queries;
        let success_rate = if total_queries > 0 {
            round2(successful_queries as f64 / total_queries as f64 * 100.0)
        } else {
            0.0
        };
        Self {
            user_id,
            period_days,
            total_queries,
            successful_queries,
            failed_queries,
            success_rate,
            avg_execution_time_ms: round2(avg_execution_time_ms),
            total_rows_returned,
        }
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<i64, AuditError>;

    /// Newest first
    async fn list_recent(
        &self,
        user_id: i64,
        limit: u32,
        status: Option<AuditStatus>,
    ) -> Result<Vec<AuditRecord>, AuditError>;

    /// One record, only if it belongs to `user_id`
    async fn get(&self, id: i64, user_id: i64) -> Result<Option<AuditRecord>, AuditError>;

    /// Successful (question, query) pairs by execution count within the last `days`
    async fn list_popular(&self, limit: u32, days: u32) -> Result<Vec<PopularQuery>, AuditError>;

    async fn user_statistics(&self, user_id: i64, days: u32) -> Result<UserStatistics, AuditError>;

    /// Retention sweep: delete records older than `days`, returning how many went
    async fn purge_older_than(&self, days: u32) -> Result<u64, AuditError>;
}
