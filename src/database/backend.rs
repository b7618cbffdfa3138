use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Column, Executor, PgPool};
use std::time::Duration;
use thiserror::Error;

use super::normalize;
use crate::types::SqlValue;

/// Postgres `query_canceled`, raised when statement_timeout fires
const QUERY_CANCELED: &str = "57014";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("Query exceeded the statement timeout")]
    Timeout,

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.code().as_deref() == Some(QUERY_CANCELED) {
                return BackendError::Timeout;
            }
        }
        BackendError::Database(err.to_string())
    }
}

/// Result set in column order, already normalized
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl QueryRows {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub ordinal_position: i32,
}

/// The only seam through which queries reach a database
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Run one read-only statement with positional (`$n`) parameters
    async fn fetch(&self, sql: &str, params: &[Value], timeout: Duration) -> Result<QueryRows, BackendError>;

    /// Columns of `table` in `database`; a `schema.table` name overrides the database schema
    async fn describe_table(&self, database: &str, table: &str) -> Result<Vec<ColumnInfo>, BackendError>;

    async fn ping(&self) -> Result<(), BackendError>;
}

pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryBackend for PgBackend {
    async fn fetch(&self, sql: &str, params: &[Value], timeout: Duration) -> Result<QueryRows, BackendError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SET TRANSACTION READ ONLY").execute(&mut *tx).await?;
        // Server-side cancellation, so a timed-out statement does not keep running
        let timeout_ms = timeout.as_millis().max(1);
        sqlx::query(&format!("SET LOCAL statement_timeout = {}", timeout_ms))
            .execute(&mut *tx)
            .await?;

        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param);
        }
        let rows = query.fetch_all(&mut *tx).await?;

        let columns = match rows.first() {
            Some(row) => normalize::column_names(row),
            None => (&mut *tx)
                .describe(sql)
                .await?
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
        };
        let values = rows.iter().map(normalize::row_values).collect();

        // Nothing to commit in a read-only transaction
        tx.rollback().await?;

        Ok(QueryRows { columns, rows: values })
    }

    async fn describe_table(&self, database: &str, table: &str) -> Result<Vec<ColumnInfo>, BackendError> {
        let (schema, name) = match table.split_once('.') {
            Some((schema, name)) => (schema, name),
            None => (database, table),
        };

        let rows: Vec<(String, String, String, i32)> = sqlx::query_as(
            r#"SELECT column_name::text, data_type::text, is_nullable::text, ordinal_position::int4
               FROM information_schema.columns
               WHERE table_schema = $1 AND table_name = $2
               ORDER BY ordinal_position"#,
        )
        .bind(schema)
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type, nullable, ordinal_position)| ColumnInfo {
                name,
                data_type,
                is_nullable: nullable.eq_ignore_ascii_case("YES"),
                ordinal_position,
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Bind parameter to SQL query
fn bind_param<'q>(
    q: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    v: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match v {
        Value::Null => {
            let none: Option<String> = None;
            q.bind(none)
        }
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        Value::String(s) => q.bind(s.as_str()),
        // Arrays and objects travel as JSONB
        Value::Array(_) | Value::Object(_) => q.bind(sqlx::types::Json(v)),
    }
}
