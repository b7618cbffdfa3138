use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::error::StoreError;
use crate::database::{Permission, PermissionGrant, User};

/// Authoritative source of users and their grants
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn get_user(&self, user_id: i64) -> Result<Option<User>, StoreError>;

    async fn get_permission(
        &self,
        user_id: i64,
        database: &str,
        table: &str,
    ) -> Result<Option<Permission>, StoreError>;

    /// Insert or replace the grant for (user, database, table)
    async fn upsert_permission(&self, grant: PermissionGrant) -> Result<Permission, StoreError>;

    /// Returns whether a grant existed
    async fn delete_permission(&self, user_id: i64, database: &str, table: &str) -> Result<bool, StoreError>;

    /// Grants for a user, optionally limited to one database, ordered by database then table
    async fn list_permissions(&self, user_id: i64, database: Option<&str>) -> Result<Vec<Permission>, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<i64, User>,
    permissions: HashMap<(i64, String, String), Permission>,
    next_id: i64,
}

/// In-process store, used for tests and embedding without Postgres
#[derive(Default)]
pub struct MemoryPermissionStore {
    state: RwLock<MemoryState>,
}

impl MemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_user(&self, user: User) {
        self.state.write().await.users.insert(user.id, user);
    }
}

#[async_trait]
impl PermissionStore for MemoryPermissionStore {
    async fn get_user(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn get_permission(
        &self,
        user_id: i64,
        database: &str,
        table: &str,
    ) -> Result<Option<Permission>, StoreError> {
        let key = (user_id, database.to_string(), table.to_string());
        Ok(self.state.read().await.permissions.get(&key).cloned())
    }

    async fn upsert_permission(&self, grant: PermissionGrant) -> Result<Permission, StoreError> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&grant.user_id) {
            return Err(StoreError::UnknownUser(grant.user_id));
        }

        let now = Utc::now();
        let key = (grant.user_id, grant.database_name.clone(), grant.table_name.clone());
        let (id, created_at) = match state.permissions.get(&key) {
            Some(existing) => (existing.id, existing.created_at),
            None => {
                state.next_id += 1;
                (state.next_id, now)
            }
        };

        let permission = Permission {
            id,
            user_id: grant.user_id,
            database_name: grant.database_name,
            table_name: grant.table_name,
            allowed_columns: grant.allowed_columns,
            row_filter: grant.row_filter,
            can_read: grant.can_read,
            created_at,
            updated_at: now,
        };
        state.permissions.insert(key, permission.clone());
        Ok(permission)
    }

    async fn delete_permission(&self, user_id: i64, database: &str, table: &str) -> Result<bool, StoreError> {
        let key = (user_id, database.to_string(), table.to_string());
        Ok(self.state.write().await.permissions.remove(&key).is_some())
    }

    async fn list_permissions(&self, user_id: i64, database: Option<&str>) -> Result<Vec<Permission>, StoreError> {
        let state = self.state.read().await;
        let mut permissions: Vec<Permission> = state
            .permissions
            .values()
            .filter(|p| p.user_id == user_id && database.map_or(true, |db| p.database_name == db))
            .cloned()
            .collect();
        permissions.sort_by(|a, b| {
            (a.database_name.as_str(), a.table_name.as_str()).cmp(&(b.database_name.as_str(), b.table_name.as_str()))
        });
        Ok(permissions)
    }
}
