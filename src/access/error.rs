use thiserror::Error;

use crate::sql::SqlError;
use crate::validator::ValidationError;

/// Errors from permission stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Permission store query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unknown user {0}")]
    UnknownUser(i64),
}

#[derive(Debug, Error)]
pub enum AccessError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Access denied to table '{table}'")]
    Denied { table: String },

    #[error("Row filter cannot be applied: {0}")]
    Rewrite(#[from] SqlError),

    #[error("Invalid grant: {0}")]
    InvalidGrant(#[from] ValidationError),
}
