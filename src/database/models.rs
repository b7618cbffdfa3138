use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::Role;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub is_active: bool,
}

impl User {
    pub fn new(id: i64, username: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            username: username.into(),
            role,
            is_active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// One grant per (user, database, table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Permission {
    pub id: i64,
    pub user_id: i64,
    pub database_name: String,
    pub table_name: String,
    /// `None` means every column
    pub allowed_columns: Option<Vec<String>>,
    pub row_filter: Option<String>,
    pub can_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to an upsert
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionGrant {
    pub user_id: i64,
    pub database_name: String,
    pub table_name: String,
    pub allowed_columns: Option<Vec<String>>,
    pub row_filter: Option<String>,
    pub can_read: bool,
}
