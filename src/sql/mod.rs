// Structural helpers over query text
//
// Everything here works on the token stream from `lexer`, so keywords inside string literals,
// quoted identifiers or nested subqueries never count as clause boundaries of the outer
// statement.

pub mod lexer;

pub use lexer::{significant_tokens, tokenize, LexError, Token, TokenKind};

use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Clauses that may follow WHERE in a SELECT, in any combination
pub const TRAILING_CLAUSES: &[&str] = &[
    "GROUP", "HAVING", "WINDOW", "ORDER", "LIMIT", "OFFSET", "FETCH", "FOR",
];

const SET_OPERATORS: &[&str] = &["UNION", "INTERSECT", "EXCEPT"];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SqlError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("Row filter predicate is not a single balanced expression")]
    MalformedPredicate,

    #[error("Row filters cannot be applied to compound (UNION/INTERSECT/EXCEPT) queries")]
    CompoundQuery,

    #[error("Row-filtered table '{0}' must be read directly in the outer FROM clause")]
    FilteredTableNotDirect(String),

    #[error("Missing value for parameter :{0}")]
    MissingParameter(String),
}

/// Strip surrounding whitespace and any trailing statement terminators
pub fn trim_statement(sql: &str) -> &str {
    let mut trimmed = sql.trim();
    while let Some(rest) = trimmed.strip_suffix(';') {
        trimmed = rest.trim_end();
    }
    trimmed
}

/// Canonical text used for cache keys: whitespace runs outside literals collapse to one
/// space, comments and trailing terminators are dropped. Case is preserved.
pub fn normalize(sql: &str) -> Result<String, SqlError> {
    let mut tokens = significant_tokens(sql)?;
    while tokens.last().is_some_and(|t| t.kind == TokenKind::Semicolon) {
        tokens.pop();
    }

    let mut out = String::with_capacity(sql.len());
    let mut prev_end: Option<usize> = None;
    for token in &tokens {
        if let Some(end) = prev_end {
            if token.start > end {
                out.push(' ');
            }
        }
        out.push_str(token.text(sql));
        prev_end = Some(token.end);
    }
    Ok(out)
}

fn top_level_position(sql: &str, tokens: &[Token], from: usize, keywords: &[&str]) -> Option<usize> {
    tokens
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, t)| t.is_top_level() && keywords.iter().any(|k| t.is_keyword(sql, k)))
        .map(|(i, _)| i)
}

/// End of the statement proper, ignoring trailing terminators
fn statement_end(tokens: &[Token]) -> usize {
    tokens
        .iter()
        .rev()
        .find(|t| t.kind != TokenKind::Semicolon)
        .map(|t| t.end)
        .unwrap_or(0)
}

/// A filter predicate must be one balanced expression with no statement terminator.
///
/// Comments are refused: the predicate is spliced as raw text, and a line comment would swallow
/// the closing parenthesis placed after it.
pub fn check_predicate(predicate: &str) -> Result<(), SqlError> {
    let tokens = tokenize(predicate)?;
    if tokens.iter().all(|t| t.kind == TokenKind::Comment) {
        return Err(SqlError::MalformedPredicate);
    }
    let mut depth = 0usize;
    for token in &tokens {
        match token.kind {
            TokenKind::Comment => return Err(SqlError::MalformedPredicate),
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => {
                depth = depth.checked_sub(1).ok_or(SqlError::MalformedPredicate)?;
            }
            TokenKind::Semicolon => return Err(SqlError::MalformedPredicate),
            _ => {}
        }
    }
    if depth != 0 {
        return Err(SqlError::MalformedPredicate);
    }
    Ok(())
}

/// Add `predicate` to the statement's top-level WHERE.
///
/// An existing condition becomes `WHERE (existing) AND (predicate)`. Without one, a
/// `WHERE (predicate)` is inserted before the earliest top-level trailing clause, or appended.
pub fn conjoin_filter(sql: &str, predicate: &str) -> Result<String, SqlError> {
    check_predicate(predicate)?;
    let predicate = predicate.trim();
    let tokens = significant_tokens(sql)?;
    let end = statement_end(&tokens);

    if top_level_position(sql, &tokens, 0, SET_OPERATORS).is_some() {
        return Err(SqlError::CompoundQuery);
    }

    if let Some(where_idx) = top_level_position(sql, &tokens, 0, &["WHERE"]) {
        let cond_start = tokens[where_idx].end;
        let cond_end = top_level_position(sql, &tokens, where_idx + 1, TRAILING_CLAUSES)
            .map(|i| tokens[i].start)
            .unwrap_or(end);
        let condition = sql[cond_start..cond_end].trim();

        let mut out = String::with_capacity(sql.len() + predicate.len() + 16);
        out.push_str(&sql[..cond_start]);
        out.push_str(" (");
        out.push_str(condition);
        out.push_str(") AND (");
        out.push_str(predicate);
        out.push(')');
        if cond_end < end {
            out.push(' ');
            out.push_str(&sql[cond_end..end]);
        }
        return Ok(out);
    }

    let from_idx = top_level_position(sql, &tokens, 0, &["FROM"]).unwrap_or(0);
    match top_level_position(sql, &tokens, from_idx, TRAILING_CLAUSES) {
        Some(i) => {
            let at = tokens[i].start;
            Ok(format!(
                "{} WHERE ({}) {}",
                sql[..at].trim_end(),
                predicate,
                &sql[at..end]
            ))
        }
        None => Ok(format!("{} WHERE ({})", sql[..end].trim_end(), predicate)),
    }
}

/// Cap the number of returned rows at `max`.
///
/// No top-level limit: ` LIMIT max` is appended. A literal `LIMIT n` above `max` (or
/// `LIMIT ALL`) is lowered in place. Any other limiting form is wrapped in an outer capped select.
pub fn enforce_limit(sql: &str, max: u64) -> Result<String, SqlError> {
    let tokens = significant_tokens(sql)?;
    let end = statement_end(&tokens);
    let body = &sql[..end];

    if let Some(i) = top_level_position(sql, &tokens, 0, &["LIMIT"]) {
        if let Some(arg) = tokens.get(i + 1) {
            let text = arg.text(sql);
            let replace = match arg.kind {
                TokenKind::Number => match text.parse::<u64>() {
                    Ok(n) => Some(n > max),
                    Err(_) => None,
                },
                TokenKind::Word if text.eq_ignore_ascii_case("ALL") => Some(true),
                _ => None,
            };
            match replace {
                Some(true) => {
                    return Ok(format!("{}{}{}", &sql[..arg.start], max, &sql[arg.end..end]));
                }
                Some(false) => return Ok(body.to_string()),
                None => {}
            }
        }
        return Ok(wrap_with_limit(body, max));
    }

    if top_level_position(sql, &tokens, 0, &["FETCH"]).is_some() {
        return Ok(wrap_with_limit(body, max));
    }

    Ok(format!("{} LIMIT {}", body.trim_end(), max))
}

fn wrap_with_limit(body: &str, max: u64) -> String {
    format!("SELECT * FROM ({}) AS capped LIMIT {}", body.trim_end(), max)
}

/// Rewrite `:name` placeholders to `$n` and collect their values in bind order.
///
/// Repeated names share one position. Text without named placeholders is returned unchanged
/// with no values, whatever `params` holds.
pub fn bind_named_params(
    sql: &str,
    params: Option<&Map<String, Value>>,
) -> Result<(String, Vec<Value>), SqlError> {
    let tokens = tokenize(sql)?;
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut values = Vec::new();
    let mut out = String::with_capacity(sql.len());
    let mut cursor = 0usize;

    for token in tokens.iter().filter(|t| t.kind == TokenKind::NamedParam) {
        let name = &sql[token.start + 1..token.end];
        let position = match positions.get(name) {
            Some(p) => *p,
            None => {
                let value = params
                    .and_then(|p| p.get(name))
                    .cloned()
                    .ok_or_else(|| SqlError::MissingParameter(name.to_string()))?;
                values.push(value);
                positions.insert(name, values.len());
                values.len()
            }
        };
        out.push_str(&sql[cursor..token.start]);
        out.push('$');
        out.push_str(&position.to_string());
        cursor = token.end;
    }
    out.push_str(&sql[cursor..]);

    Ok((out, values))
}
