use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::access::{AccessControl, AccessError};
use crate::cache::Cache;
use crate::database::{BackendError, ColumnInfo, QueryBackend};
use crate::validator::{sanitize_table_name, ValidationError};

#[derive(Debug, Error)]
pub enum DescribeError {
    #[error(transparent)]
    InvalidName(#[from] ValidationError),

    #[error("Access denied to table '{0}'")]
    Denied(String),

    #[error("Table not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Columns of one table as visible to one user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDescription {
    pub database: String,
    pub table: String,
    pub columns: Vec<ColumnInfo>,
}

/// Table metadata lookups, cached in the schema namespace
pub struct DescribeService {
    access: Arc<AccessControl>,
    cache: Arc<Cache>,
    backend: Arc<dyn QueryBackend>,
    database: String,
}

impl DescribeService {
    pub fn new(
        access: Arc<AccessControl>,
        cache: Arc<Cache>,
        backend: Arc<dyn QueryBackend>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            access,
            cache,
            backend,
            database: database.into(),
        }
    }

    /// Describe `table` for `user_id`. Columns the user's grant excludes are left out; a user
    /// without access gets `Denied` whether or not the table exists.
    pub async fn describe(&self, user_id: i64, table: &str) -> Result<TableDescription, DescribeError> {
        let table = sanitize_table_name(table.trim())?.to_ascii_lowercase();
        let database = self.database.as_str();

        let (has_access, _) = self.access.check_table_access(user_id, database, &table).await?;
        if !has_access {
            return Err(DescribeError::Denied(table));
        }

        let columns = match self.cache.get_schema::<Vec<ColumnInfo>>(database, &table).await {
            Some(columns) => columns,
            None => {
                let columns = self.backend.describe_table(database, &table).await?;
                if columns.is_empty() {
                    return Err(DescribeError::NotFound(table));
                }
                self.cache.set_schema(database, &table, &columns).await;
                columns
            }
        };

        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let visible = self.access.filter_columns(user_id, database, &table, &names).await?;
        let columns = columns
            .into_iter()
            .filter(|c| visible.contains(&c.name))
            .collect();

        Ok(TableDescription {
            database: self.database.clone(),
            table,
            columns,
        })
    }

    /// Drop cached metadata for one table, or for the whole database
    pub async fn invalidate(&self, table: Option<&str>) -> u64 {
        let table = table.map(|t| t.trim().to_ascii_lowercase());
        self.cache
            .invalidate_schema_cache(Some(&self.database), table.as_deref())
            .await
    }
}
