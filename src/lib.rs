pub mod access;
pub mod audit;
pub mod cache;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod executor;
pub mod services;
pub mod sql;
pub mod types;
pub mod validator;

pub use error::QueryError;
pub use executor::{Executor, ExecutorSettings};
pub use types::{ExecutionResult, QueryRequest, Role, Row, SqlValue};
