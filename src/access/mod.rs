// Access Control Engine
//
// Default deny: a user may read a table only when a grant row says so, or when the user is an
// admin. Resolutions are cached per (user, database, table) and invalidated by every grant
// mutation in `admin`.

pub mod admin;
pub mod columns;
pub mod error;
pub mod postgres;
pub mod store;

pub use admin::PermissionAdmin;
pub use columns::{column_policy, ColumnError, ColumnPolicy};
pub use error::{AccessError, StoreError};
pub use postgres::PgPermissionStore;
pub use store::{MemoryPermissionStore, PermissionStore};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cache::Cache;
use crate::database::Permission;
use crate::sql;
use crate::validator;

/// What a user may do with one table, as cached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPermission {
    pub can_read: bool,
    /// `None` is the "all columns" sentinel
    pub allowed_columns: Option<Vec<String>>,
    pub row_filter: Option<String>,
}

impl ResolvedPermission {
    pub fn full() -> Self {
        Self {
            can_read: true,
            allowed_columns: None,
            row_filter: None,
        }
    }

    pub fn denied() -> Self {
        Self {
            can_read: false,
            allowed_columns: None,
            row_filter: None,
        }
    }
}

impl From<&Permission> for ResolvedPermission {
    fn from(permission: &Permission) -> Self {
        Self {
            can_read: permission.can_read,
            allowed_columns: permission.allowed_columns.clone(),
            row_filter: permission
                .row_filter
                .as_ref()
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty()),
        }
    }
}

/// A user's grant as shown to that user; the filter text itself is withheld
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionSummary {
    pub database: String,
    pub table: String,
    pub allowed_columns: Option<Vec<String>>,
    pub can_read: bool,
    pub has_row_filter: bool,
}

pub struct AccessControl {
    store: Arc<dyn PermissionStore>,
    cache: Arc<Cache>,
}

impl AccessControl {
    pub fn new(store: Arc<dyn PermissionStore>, cache: Arc<Cache>) -> Self {
        Self { store, cache }
    }

    /// Resolve whether `user_id` may read `table`.
    ///
    /// Returns the resolved permission only when access is granted.
    pub async fn check_table_access(
        &self,
        user_id: i64,
        database: &str,
        table: &str,
    ) -> Result<(bool, Option<ResolvedPermission>), AccessError> {
        let resolved = self.resolve(user_id, database, table).await?;
        Ok(match resolved {
            Some(permission) if permission.can_read => (true, Some(permission)),
            _ => (false, None),
        })
    }

    async fn resolve(
        &self,
        user_id: i64,
        database: &str,
        table: &str,
    ) -> Result<Option<ResolvedPermission>, AccessError> {
        if let Some(cached) = self
            .cache
            .get_permission::<ResolvedPermission>(user_id, database, table)
            .await
        {
            tracing::debug!(user_id, database, table, "Permission cache hit");
            return Ok(Some(cached));
        }

        let user = match self.store.get_user(user_id).await? {
            Some(user) if user.is_active => user,
            // Missing and inactive users are not cached; reactivation must take effect at once
            Some(_) => {
                tracing::debug!(user_id, "Inactive user denied");
                return Ok(None);
            }
            None => {
                tracing::debug!(user_id, "Unknown user denied");
                return Ok(None);
            }
        };

        let resolved = if user.is_admin() {
            ResolvedPermission::full()
        } else {
            match self.store.get_permission(user_id, database, table).await? {
                Some(permission) => ResolvedPermission::from(&permission),
                None => ResolvedPermission::denied(),
            }
        };

        self.cache
            .set_permission(user_id, database, table, &resolved)
            .await;
        Ok(Some(resolved))
    }

    /// Add the user's row filter for `table` to the query's WHERE clause.
    ///
    /// Returns the text unchanged when the grant has no filter; fails when the user cannot read
    /// the table at all, or when the filtered table is read anywhere but the outer FROM/JOIN.
    pub async fn apply_row_filter(
        &self,
        user_id: i64,
        database: &str,
        table: &str,
        query_text: &str,
    ) -> Result<String, AccessError> {
        let (has_access, permission) = self.check_table_access(user_id, database, table).await?;
        if !has_access {
            return Err(AccessError::Denied {
                table: table.to_string(),
            });
        }

        match permission.and_then(|p| p.row_filter) {
            Some(filter) => {
                // The outer WHERE cannot constrain reads inside subqueries, derived tables or CTEs
                if !validator::table_usage(query_text).is_direct_only(table) {
                    tracing::warn!(user_id, table, "Row-filtered table read outside the outer FROM");
                    return Err(sql::SqlError::FilteredTableNotDirect(table.to_string()).into());
                }
                let rewritten = sql::conjoin_filter(query_text, &filter)?;
                tracing::debug!(user_id, table, "Applied row filter");
                Ok(rewritten)
            }
            None => Ok(query_text.to_string()),
        }
    }

    /// Requested columns the user may see, in requested order. Denied tables yield nothing.
    pub async fn filter_columns(
        &self,
        user_id: i64,
        database: &str,
        table: &str,
        requested: &[String],
    ) -> Result<Vec<String>, AccessError> {
        let (has_access, permission) = self.check_table_access(user_id, database, table).await?;
        if !has_access {
            return Ok(Vec::new());
        }
        Ok(match permission.and_then(|p| p.allowed_columns) {
            None => requested.to_vec(),
            Some(allowed) => intersect_columns(requested, &allowed),
        })
    }

    /// Tables the user can read in `database`; `["*"]` for admins
    pub async fn accessible_tables(&self, user_id: i64, database: &str) -> Result<Vec<String>, AccessError> {
        match self.store.get_user(user_id).await? {
            Some(user) if user.is_active && user.is_admin() => Ok(vec!["*".to_string()]),
            Some(user) if user.is_active => Ok(self
                .store
                .list_permissions(user_id, Some(database))
                .await?
                .into_iter()
                .filter(|p| p.can_read)
                .map(|p| p.table_name)
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn permission_summary(&self, user_id: i64) -> Result<Vec<PermissionSummary>, AccessError> {
        Ok(self
            .store
            .list_permissions(user_id, None)
            .await?
            .into_iter()
            .map(|p| PermissionSummary {
                has_row_filter: p.row_filter.as_deref().is_some_and(|f| !f.trim().is_empty()),
                database: p.database_name,
                table: p.table_name,
                allowed_columns: p.allowed_columns,
                can_read: p.can_read,
            })
            .collect())
    }
}

/// Keep `requested` entries present in `allowed`, preserving requested order
pub fn intersect_columns(requested: &[String], allowed: &[String]) -> Vec<String> {
    requested
        .iter()
        .filter(|column| allowed.iter().any(|a| a.eq_ignore_ascii_case(column)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheTtls, MemoryStore};
    use crate::database::{PermissionGrant, User};
    use crate::sql::SqlError;
    use crate::types::Role;

    async fn engine() -> (AccessControl, Arc<MemoryPermissionStore>) {
        let store = Arc::new(MemoryPermissionStore::new());
        store.put_user(User::new(1, "viewer", Role::Viewer)).await;
        store.put_user(User::new(2, "admin", Role::Admin)).await;
        store.put_user(User::new(3, "gone", Role::Analyst).inactive()).await;
        let cache = Arc::new(Cache::with_store(Arc::new(MemoryStore::new()), CacheTtls::default()));
        (AccessControl::new(store.clone(), cache), store)
    }

    fn grant(user_id: i64, table: &str, columns: Option<&[&str]>, filter: Option<&str>) -> PermissionGrant {
        PermissionGrant {
            user_id,
            database_name: "public".to_string(),
            table_name: table.to_string(),
            allowed_columns: columns.map(|c| c.iter().map(|s| s.to_string()).collect()),
            row_filter: filter.map(str::to_string),
            can_read: true,
        }
    }

    #[tokio::test]
    async fn no_grant_means_deny() {
        let (engine, _) = engine().await;
        assert_eq!(engine.check_table_access(1, "public", "orders").await.unwrap(), (false, None));
        assert_eq!(engine.check_table_access(1, "public", "no_such_table").await.unwrap(), (false, None));
        assert_eq!(engine.check_table_access(99, "public", "orders").await.unwrap(), (false, None));
    }

    #[tokio::test]
    async fn admin_gets_everything() {
        let (engine, _) = engine().await;
        for table in ["orders", "payroll", "does_not_exist"] {
            let (ok, permission) = engine.check_table_access(2, "public", table).await.unwrap();
            assert!(ok);
            assert_eq!(permission, Some(ResolvedPermission::full()));
        }
        assert_eq!(engine.accessible_tables(2, "public").await.unwrap(), vec!["*"]);
    }

    #[tokio::test]
    async fn inactive_user_is_denied_even_with_grant() {
        let (engine, store) = engine().await;
        store.upsert_permission(grant(3, "orders", None, None)).await.unwrap();
        assert!(!engine.check_table_access(3, "public", "orders").await.unwrap().0);
        assert!(engine.accessible_tables(3, "public").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolution_is_repeatable() {
        let (engine, store) = engine().await;
        store
            .upsert_permission(grant(1, "orders", Some(&["id", "status"]), Some("region = 'west'")))
            .await
            .unwrap();
        let first = engine.check_table_access(1, "public", "orders").await.unwrap();
        let second = engine.check_table_access(1, "public", "orders").await.unwrap();
        assert_eq!(first, second);
        assert!(first.0);
    }

    #[tokio::test]
    async fn row_filter_is_conjoined() {
        let (engine, store) = engine().await;
        store
            .upsert_permission(grant(1, "orders", None, Some("region = 'west'")))
            .await
            .unwrap();
        let out = engine
            .apply_row_filter(1, "public", "orders", "SELECT * FROM orders WHERE status = 'open'")
            .await
            .unwrap();
        assert_eq!(out, "SELECT * FROM orders WHERE (status = 'open') AND (region = 'west')");
    }

    #[tokio::test]
    async fn row_filter_refuses_nested_reads() {
        let (engine, store) = engine().await;
        store
            .upsert_permission(grant(1, "orders", None, Some("region = 'west'")))
            .await
            .unwrap();
        for sql in [
            "SELECT * FROM (SELECT id, status, 'west' AS region FROM orders) o",
            "WITH o AS (SELECT id, 'west' AS region FROM orders) SELECT * FROM o",
            "SELECT * FROM orders WHERE id IN (SELECT id FROM orders WHERE region = 'east')",
            "SELECT 1 AS n FROM customers WHERE EXISTS (SELECT 1 FROM orders)",
        ] {
            let err = engine.apply_row_filter(1, "public", "orders", sql).await.unwrap_err();
            assert!(
                matches!(&err, AccessError::Rewrite(SqlError::FilteredTableNotDirect(t)) if t == "orders"),
                "{}: {:?}",
                sql,
                err
            );
        }
    }

    #[tokio::test]
    async fn unfiltered_grant_allows_nested_reads() {
        let (engine, store) = engine().await;
        store.upsert_permission(grant(1, "orders", None, None)).await.unwrap();
        let sql = "SELECT * FROM (SELECT id FROM orders) o";
        assert_eq!(engine.apply_row_filter(1, "public", "orders", sql).await.unwrap(), sql);
    }

    #[tokio::test]
    async fn row_filter_on_denied_table_fails() {
        let (engine, _) = engine().await;
        let err = engine
            .apply_row_filter(1, "public", "payroll", "SELECT * FROM payroll")
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Denied { table } if table == "payroll"));
    }

    #[tokio::test]
    async fn columns_are_trimmed_in_requested_order() {
        let (engine, store) = engine().await;
        store
            .upsert_permission(grant(1, "orders", Some(&["status", "id"]), None))
            .await
            .unwrap();
        let requested: Vec<String> = ["id", "status", "region"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            engine.filter_columns(1, "public", "orders", &requested).await.unwrap(),
            vec!["id", "status"]
        );
        assert_eq!(
            engine.filter_columns(2, "public", "orders", &requested).await.unwrap(),
            requested
        );
    }

    #[tokio::test]
    async fn summary_hides_filter_text() {
        let (engine, store) = engine().await;
        store
            .upsert_permission(grant(1, "orders", None, Some("region = 'west'")))
            .await
            .unwrap();
        let summary = engine.permission_summary(1).await.unwrap();
        assert_eq!(summary.len(), 1);
        assert!(summary[0].has_row_filter);
        let printed = serde_json::to_string(&summary).unwrap();
        assert!(!printed.contains("west"));
    }
}
