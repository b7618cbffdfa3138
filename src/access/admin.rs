use std::sync::Arc;

use super::error::AccessError;
use super::store::PermissionStore;
use crate::cache::Cache;
use crate::database::{Permission, PermissionGrant};
use crate::sql;
use crate::validator::{sanitize_column_name, sanitize_table_name};

/// Grant and revoke. Every mutation drops the cached resolution for the affected
/// (user, database, table) so the next check sees the new state.
pub struct PermissionAdmin {
    store: Arc<dyn PermissionStore>,
    cache: Arc<Cache>,
}

impl PermissionAdmin {
    pub fn new(store: Arc<dyn PermissionStore>, cache: Arc<Cache>) -> Self {
        Self { store, cache }
    }

    /// Grant read access. Table names are stored lower case, matching how unquoted identifiers
    /// appear in queries.
    pub async fn grant(
        &self,
        user_id: i64,
        database: &str,
        table: &str,
        allowed_columns: Option<Vec<String>>,
        row_filter: Option<String>,
    ) -> Result<Permission, AccessError> {
        let table = sanitize_table_name(table.trim())?.to_ascii_lowercase();

        let allowed_columns = match allowed_columns {
            Some(columns) => Some(
                columns
                    .iter()
                    .map(|c| sanitize_column_name(c.trim()).map(str::to_string))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => None,
        };

        let row_filter = row_filter
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());
        if let Some(filter) = &row_filter {
            sql::check_predicate(filter)?;
        }

        let permission = self
            .store
            .upsert_permission(PermissionGrant {
                user_id,
                database_name: database.to_string(),
                table_name: table.clone(),
                allowed_columns,
                row_filter,
                can_read: true,
            })
            .await?;

        self.cache.invalidate_permission(user_id, database, &table).await;
        tracing::info!(user_id, database, table = %table, "Granted table access");
        Ok(permission)
    }

    /// Remove the grant; returns whether one existed
    pub async fn revoke(&self, user_id: i64, database: &str, table: &str) -> Result<bool, AccessError> {
        let table = table.trim().to_ascii_lowercase();
        let removed = self.store.delete_permission(user_id, database, &table).await?;
        self.cache.invalidate_permission(user_id, database, &table).await;
        tracing::info!(user_id, database, table = %table, removed, "Revoked table access");
        Ok(removed)
    }
}
