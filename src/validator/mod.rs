// Query Validator
//
// Pure checks over untrusted query text. Nothing here does I/O; every rejection comes back as a
// `ValidationError` whose message is the caller-visible reason.

pub mod cost;
pub mod tables;

pub use cost::{estimate_cost, Complexity, CostEstimate};
pub use tables::{extract_tables, table_usage, TableUsage};

use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;

use crate::sql::{significant_tokens, TokenKind};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Empty query")]
    Empty,

    #[error("Forbidden keyword: {0}. Only SELECT queries are allowed.")]
    ForbiddenKeyword(&'static str),

    #[error("Suspicious pattern detected: {0}")]
    SuspiciousPattern(&'static str),

    #[error("Could not parse SQL query")]
    Unparseable,

    #[error("SQL parsing error: {0}")]
    Parse(String),

    #[error("Multiple SQL statements not allowed")]
    MultipleStatements,

    #[error("Only SELECT queries allowed, got: {0}")]
    NotReadOnly(String),

    #[error("SELECT ... INTO creates a table; only plain SELECT queries are allowed")]
    SelectInto,

    #[error("Query does not reference any table")]
    NoTables,

    #[error("Invalid table name: {0}. Only alphanumeric and underscore allowed.")]
    InvalidTableName(String),

    #[error("Invalid column name: {0}. Only alphanumeric and underscore allowed.")]
    InvalidColumnName(String),
}

/// Data-mutating, schema-mutating, transaction-control and execution statements
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "CREATE", "TRUNCATE", "REPLACE", "GRANT",
    "REVOKE", "COMMIT", "ROLLBACK", "SAVEPOINT", "EXEC", "EXECUTE", "CALL",
];

/// Injection and server-side file access signatures, matched case-insensitively
pub const SUSPICIOUS_PATTERNS: &[&str] = &[
    r";\s*DROP",
    r";\s*DELETE",
    r"--",
    r"/\*.*\*/",
    r"xp_cmdshell",
    r"INTO\s+OUTFILE",
    r"INTO\s+DUMPFILE",
    r"LOAD_FILE",
    r"UNION.*SELECT",
    r"pg_read_file",
    r"pg_read_binary_file",
    r"pg_ls_dir",
    r"lo_import",
    r"lo_export",
    r"\bdblink",
    r"COPY\s.*\bPROGRAM\b",
];

static KEYWORD_REGEXES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    FORBIDDEN_KEYWORDS
        .iter()
        .filter_map(|kw| {
            Regex::new(&format!(r"\b{}\b", kw))
                .ok()
                .map(|re| (*kw, re))
        })
        .collect()
});

static SUSPICIOUS_REGEXES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    SUSPICIOUS_PATTERNS
        .iter()
        .filter_map(|pattern| {
            // (?s) so a UNION split across lines still matches
            Regex::new(&format!("(?is){}", pattern))
                .ok()
                .map(|re| (*pattern, re))
        })
        .collect()
});

/// Decide whether `sql` is safe to run.
///
/// `allow_write` skips the keyword and read-only-verb checks; chaining, comments, file access
/// and multiple statements are refused either way.
pub fn validate(sql: &str, allow_write: bool) -> Result<(), ValidationError> {
    if sql.trim().is_empty() {
        return Err(ValidationError::Empty);
    }

    let upper = sql.to_uppercase();

    if !allow_write {
        if let Some((keyword, _)) = KEYWORD_REGEXES.iter().find(|(_, re)| re.is_match(&upper)) {
            return Err(ValidationError::ForbiddenKeyword(*keyword));
        }
    }

    if let Some((pattern, _)) = SUSPICIOUS_REGEXES.iter().find(|(_, re)| re.is_match(sql)) {
        return Err(ValidationError::SuspiciousPattern(*pattern));
    }

    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| ValidationError::Parse(e.to_string()))?;

    let statement = match statements.as_slice() {
        [] => return Err(ValidationError::Unparseable),
        [only] => only,
        _ => return Err(ValidationError::MultipleStatements),
    };

    if !allow_write {
        match statement {
            Statement::Query(query) => {
                if creates_table(&query.body) {
                    return Err(ValidationError::SelectInto);
                }
            }
            _ => return Err(ValidationError::NotReadOnly(leading_verb(sql))),
        }
    }

    Ok(())
}

/// Convenience form returning an (ok, reason) pair
pub fn check(sql: &str, allow_write: bool) -> (bool, Option<String>) {
    match validate(sql, allow_write) {
        Ok(()) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    }
}

fn creates_table(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_some(),
        SetExpr::Query(query) => creates_table(&query.body),
        SetExpr::SetOperation { left, right, .. } => creates_table(left) || creates_table(right),
        _ => false,
    }
}

fn leading_verb(sql: &str) -> String {
    significant_tokens(sql)
        .ok()
        .and_then(|tokens| {
            tokens
                .into_iter()
                .find(|t| t.kind == TokenKind::Word)
                .map(|t| t.text(sql).to_uppercase())
        })
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

/// Allow only alphanumerics, underscore and dot (for schema.table)
pub fn sanitize_table_name(name: &str) -> Result<&str, ValidationError> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        Ok(name)
    } else {
        Err(ValidationError::InvalidTableName(name.to_string()))
    }
}

pub fn sanitize_column_name(name: &str) -> Result<&str, ValidationError> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(ValidationError::InvalidColumnName(name.to_string()))
    }
}
