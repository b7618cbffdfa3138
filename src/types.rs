/// Shared types used across the pipeline

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// User roles, ordered from least to most privileged
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Analyst,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Analyst => "analyst",
            Role::Admin => "admin",
        }
    }

    /// Parse a stored role; unknown values fall back to the least privileged role
    pub fn from_stored(value: &str) -> Self {
        value.parse().unwrap_or(Role::Viewer)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viewer" => Ok(Role::Viewer),
            "analyst" => Ok(Role::Analyst),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A single normalized column value.
///
/// Database-native types are converted into this fixed set before anything is cached or
/// returned: temporal values become ISO-8601 text in `Timestamp`, fixed-point decimals
/// become `Float`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum SqlValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(String),
}

impl SqlValue {
    /// Plain JSON rendering for consumers
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => Value::Bool(*b),
            SqlValue::Integer(i) => Value::from(*i),
            // NaN and infinities have no JSON form
            SqlValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SqlValue::Text(s) | SqlValue::Timestamp(s) => Value::String(s.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

/// One result row: ordered (column, value) pairs.
///
/// Serializes as a plain JSON object with the columns in query order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new(values: Vec<(String, SqlValue)>) -> Self {
        Self { values }
    }

    pub fn from_columns(columns: &[String], values: Vec<SqlValue>) -> Self {
        Self {
            values: columns.iter().cloned().zip(values).collect(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> &[(String, SqlValue)] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Keep only the named columns, preserving row order
    pub fn retain_columns(&mut self, keep: &[String]) {
        self.values.retain(|(name, _)| keep.iter().any(|k| k == name));
    }

    pub fn to_json(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, &value.to_json())?;
        }
        map.end()
    }
}

/// Input to one pipeline invocation
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query_text: String,
    pub user_id: i64,
    /// Natural-language question the query was generated from, recorded in the audit trail
    pub question: Option<String>,
    pub params: Option<Map<String, Value>>,
    pub cache_allowed: bool,
}

impl QueryRequest {
    pub fn new(query_text: impl Into<String>, user_id: i64) -> Self {
        Self {
            query_text: query_text.into(),
            user_id,
            question: None,
            params: None,
            cache_allowed: true,
        }
    }

    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = Some(question.into());
        self
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_cache(mut self, cache_allowed: bool) -> Self {
        self.cache_allowed = cache_allowed;
        self
    }
}

/// Successful pipeline output
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub columns: Vec<String>,
    pub execution_time_ms: f64,
    pub cached: bool,
    pub query_text: String,
}
