// Pipeline error taxonomy
use serde_json::{json, Value};
use thiserror::Error;

use crate::database::BackendError;
use crate::validator::ValidationError;

/// Everything `Executor::execute` can fail with.
///
/// `Display` carries the full internal detail (it is what goes to the audit trail and the log);
/// `public_message()` is the caller-facing text.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Access denied to table '{table}'")]
    PermissionDenied { table: String },

    #[error("Rate limit exceeded: {limit} queries per window")]
    RateLimited { limit: u32 },

    #[error("Query exceeded the {timeout_secs}s execution limit")]
    Timeout { timeout_secs: u64 },

    #[error("Query execution failed: {0}")]
    Execution(String),
}

impl QueryError {
    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            QueryError::Validation(_) => "VALIDATION_ERROR",
            QueryError::PermissionDenied { .. } => "PERMISSION_DENIED",
            QueryError::RateLimited { .. } => "RATE_LIMITED",
            QueryError::Timeout { .. } => "QUERY_TIMEOUT",
            QueryError::Execution(_) => "EXECUTION_ERROR",
        }
    }

    /// HTTP-equivalent status, for front ends that need one
    pub fn status_code(&self) -> u16 {
        match self {
            QueryError::Validation(_) => 400,
            QueryError::PermissionDenied { .. } => 403,
            QueryError::RateLimited { .. } => 429,
            QueryError::Timeout { .. } => 504,
            QueryError::Execution(_) => 500,
        }
    }

    /// Short kind tag stored with audit records
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::Validation(_) => "validation",
            QueryError::PermissionDenied { .. } => "permission",
            QueryError::RateLimited { .. } => "rate_limit",
            QueryError::Timeout { .. } => "timeout",
            QueryError::Execution(_) => "execution",
        }
    }

    /// Get client-safe error message
    pub fn public_message(&self) -> String {
        match self {
            QueryError::Validation(reason) => format!("Query rejected: {}", reason),
            // Never say why: no hint whether the table exists or what the grant looks like
            QueryError::PermissionDenied { table } => format!("You do not have access to '{}'", table),
            QueryError::RateLimited { .. } => "Too many queries, try again later".to_string(),
            QueryError::Timeout { timeout_secs } => {
                format!("The query took longer than {} seconds and was cancelled", timeout_secs)
            }
            // Raw database text can reveal schema details
            QueryError::Execution(_) => "The query could not be executed".to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, QueryError::Timeout { .. } | QueryError::RateLimited { .. })
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        let mut response = json!({
            "error": true,
            "message": self.public_message(),
            "code": self.error_code()
        });
        if let QueryError::PermissionDenied { table } = self {
            response["table"] = json!(table);
        }
        response
    }
}

impl From<ValidationError> for QueryError {
    fn from(err: ValidationError) -> Self {
        QueryError::Validation(err.to_string())
    }
}

impl QueryError {
    pub fn from_backend(err: BackendError, timeout_secs: u64) -> Self {
        match err {
            BackendError::Timeout => QueryError::Timeout { timeout_secs },
            other => QueryError::Execution(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_errors_hide_database_text() {
        let err = QueryError::Execution("relation \"secret_table\" does not exist".to_string());
        let body = err.to_json();
        assert_eq!(body["code"], "EXECUTION_ERROR");
        assert!(!body["message"].as_str().unwrap().contains("secret_table"));
        assert!(err.to_string().contains("secret_table"));
    }

    #[test]
    fn permission_errors_name_only_the_table() {
        let err = QueryError::PermissionDenied { table: "payroll".to_string() };
        let body = err.to_json();
        assert_eq!(body["table"], "payroll");
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.kind(), "permission");
    }

    #[test]
    fn validation_reason_is_surfaced_verbatim() {
        let err = QueryError::Validation("Multiple SQL statements not allowed".to_string());
        assert!(err.public_message().contains("Multiple SQL statements not allowed"));
        assert!(!err.is_retryable());
        assert!(QueryError::Timeout { timeout_secs: 30 }.is_retryable());
    }
}
