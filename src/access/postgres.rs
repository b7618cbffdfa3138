use async_trait::async_trait;
use sqlx::PgPool;

use super::error::StoreError;
use super::store::PermissionStore;
use crate::database::{Permission, PermissionGrant, User};
use crate::types::Role;

const PERMISSION_COLUMNS: &str = "id, user_id, database_name, table_name, allowed_columns, row_filter, can_read, created_at, updated_at";

/// Grants in `role_permissions`, users in `users`
pub struct PgPermissionStore {
    pool: PgPool,
}

impl PgPermissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PermissionStore for PgPermissionStore {
    async fn get_user(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        let row: Option<(i64, String, String, bool)> =
            sqlx::query_as("SELECT id, username, role, is_active FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id, username, role, is_active)| User {
            id,
            username,
            role: Role::from_stored(&role),
            is_active,
        }))
    }

    async fn get_permission(
        &self,
        user_id: i64,
        database: &str,
        table: &str,
    ) -> Result<Option<Permission>, StoreError> {
        let query = format!(
            "SELECT {} FROM role_permissions WHERE user_id = $1 AND database_name = $2 AND table_name = $3",
            PERMISSION_COLUMNS
        );
        let permission = sqlx::query_as::<_, Permission>(&query)
            .bind(user_id)
            .bind(database)
            .bind(table)
            .fetch_optional(&self.pool)
            .await?;
        Ok(permission)
    }

    async fn upsert_permission(&self, grant: PermissionGrant) -> Result<Permission, StoreError> {
        let query = format!(
            r#"INSERT INTO role_permissions
                   (user_id, database_name, table_name, allowed_columns, row_filter, can_read)
               VALUES ($1, $2, $3, $4, $5, $6)
               ON CONFLICT (user_id, database_name, table_name) DO UPDATE
               SET allowed_columns = EXCLUDED.allowed_columns,
                   row_filter = EXCLUDED.row_filter,
                   can_read = EXCLUDED.can_read,
                   updated_at = now()
               RETURNING {}"#,
            PERMISSION_COLUMNS
        );
        let result = sqlx::query_as::<_, Permission>(&query)
            .bind(grant.user_id)
            .bind(&grant.database_name)
            .bind(&grant.table_name)
            .bind(&grant.allowed_columns)
            .bind(&grant.row_filter)
            .bind(grant.can_read)
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(permission) => Ok(permission),
            // users(id) foreign key
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some("23503") => {
                Err(StoreError::UnknownUser(grant.user_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_permission(&self, user_id: i64, database: &str, table: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM role_permissions WHERE user_id = $1 AND database_name = $2 AND table_name = $3",
        )
        .bind(user_id)
        .bind(database)
        .bind(table)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_permissions(&self, user_id: i64, database: Option<&str>) -> Result<Vec<Permission>, StoreError> {
        let query = format!(
            r#"SELECT {} FROM role_permissions
               WHERE user_id = $1 AND ($2::text IS NULL OR database_name = $2)
               ORDER BY database_name, table_name"#,
            PERMISSION_COLUMNS
        );
        let permissions = sqlx::query_as::<_, Permission>(&query)
            .bind(user_id)
            .bind(database)
            .fetch_all(&self.pool)
            .await?;
        Ok(permissions)
    }
}
