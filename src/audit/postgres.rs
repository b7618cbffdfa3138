use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use super::{
    round2, AuditEntry, AuditError, AuditLog, AuditRecord, AuditStatus, PopularQuery, UserStatistics,
};

/// `query_history` rows
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct HistoryRow {
    id: i64,
    user_id: i64,
    question: Option<String>,
    query_text: String,
    status: String,
    row_count: i64,
    execution_time_ms: f64,
    error_kind: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<HistoryRow> for AuditRecord {
    fn from(row: HistoryRow) -> Self {
        AuditRecord {
            id: row.id,
            entry: AuditEntry {
                user_id: row.user_id,
                question: row.question,
                query_text: row.query_text,
                status: row.status.parse().unwrap_or(AuditStatus::Failed),
                row_count: row.row_count,
                execution_time_ms: row.execution_time_ms,
                error_kind: row.error_kind,
                error_message: row.error_message,
                created_at: row.created_at,
            },
        }
    }
}

const HISTORY_COLUMNS: &str = "id, user_id, question, query_text, status, row_count, execution_time_ms, error_kind, error_message, created_at";

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn append(&self, entry: AuditEntry) -> Result<i64, AuditError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"INSERT INTO query_history
                   (user_id, question, query_text, status, row_count, execution_time_ms,
                    error_kind, error_message, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               RETURNING id"#,
        )
        .bind(entry.user_id)
        .bind(&entry.question)
        .bind(&entry.query_text)
        .bind(entry.status.as_str())
        .bind(entry.row_count)
        .bind(entry.execution_time_ms)
        .bind(&entry.error_kind)
        .bind(&entry.error_message)
        .bind(entry.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn list_recent(
        &self,
        user_id: i64,
        limit: u32,
        status: Option<AuditStatus>,
    ) -> Result<Vec<AuditRecord>, AuditError> {
        let query = format!(
            r#"SELECT {} FROM query_history
               WHERE user_id = $1 AND ($2::text IS NULL OR status = $2)
               ORDER BY created_at DESC, id DESC
               LIMIT $3"#,
            HISTORY_COLUMNS
        );
        let rows = sqlx::query_as::<_, HistoryRow>(&query)
            .bind(user_id)
            .bind(status.map(|s| s.as_str()))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(AuditRecord::from).collect())
    }

    async fn get(&self, id: i64, user_id: i64) -> Result<Option<AuditRecord>, AuditError> {
        let query = format!(
            "SELECT {} FROM query_history WHERE id = $1 AND user_id = $2",
            HISTORY_COLUMNS
        );
        let row = sqlx::query_as::<_, HistoryRow>(&query)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(AuditRecord::from))
    }

    async fn list_popular(&self, limit: u32, days: u32) -> Result<Vec<PopularQuery>, AuditError> {
        let rows: Vec<(Option<String>, String, i64, Option<f64>, Option<i64>)> = sqlx::query_as(
            r#"SELECT question, query_text,
                      COUNT(id) AS execution_count,
                      AVG(execution_time_ms) AS avg_execution_time,
                      SUM(row_count)::bigint AS total_rows_returned
               FROM query_history
               WHERE status = 'success'
                 AND created_at >= now() - make_interval(days => $1)
               GROUP BY question, query_text
               ORDER BY execution_count DESC, MIN(id)
               LIMIT $2"#,
        )
        .bind(days as i32)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(question, query_text, count, avg, total)| PopularQuery {
                question,
                query_text,
                execution_count: count,
                avg_execution_time_ms: round2(avg.unwrap_or(0.0)),
                total_rows_returned: total.unwrap_or(0),
            })
            .collect())
    }

    async fn user_statistics(&self, user_id: i64, days: u32) -> Result<UserStatistics, AuditError> {
        let (successes, failures, avg, rows): (i64, i64, Option<f64>, Option<i64>) = sqlx::query_as(
            r#"SELECT COUNT(*) FILTER (WHERE status = 'success'),
                      COUNT(*) FILTER (WHERE status = 'failed'),
                      AVG(execution_time_ms) FILTER (WHERE status = 'success'),
                      (SUM(row_count) FILTER (WHERE status = 'success'))::bigint
               FROM query_history
               WHERE user_id = $1
                 AND created_at >= now() - make_interval(days => $2)"#,
        )
        .bind(user_id)
        .bind(days as i32)
        .fetch_one(&self.pool)
        .await?;

        Ok(UserStatistics::from_counts(
            user_id,
            days,
            successes,
            failures,
            avg.unwrap_or(0.0),
            rows.unwrap_or(0),
        ))
    }

    async fn purge_older_than(&self, days: u32) -> Result<u64, AuditError> {
        let result = sqlx::query(
            "DELETE FROM query_history WHERE created_at < now() - make_interval(days => $1)",
        )
        .bind(days as i32)
        .execute(&self.pool)
        .await?;
        tracing::info!("Purged {} audit records older than {} days", result.rows_affected(), days);
        Ok(result.rows_affected())
    }
}
