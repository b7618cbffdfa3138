pub mod backend;
pub mod manager;
pub mod models;
pub mod normalize;

pub use backend::{BackendError, ColumnInfo, PgBackend, QueryBackend, QueryRows};
pub use manager::{redact_url, DatabaseError, DatabaseManager};
pub use models::{Permission, PermissionGrant, User};
