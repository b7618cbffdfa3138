// Database-native values to `SqlValue`
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::types::BigDecimal;
use sqlx::{Column, Row, TypeInfo};
use uuid::Uuid;

use crate::types::SqlValue;

pub fn row_values(row: &PgRow) -> Vec<SqlValue> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(index, column)| column_value(row, index, column.type_info().name()))
        .collect()
}

pub fn column_names(row: &PgRow) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

fn decoded<T>(type_name: &str, result: Result<Option<T>, sqlx::Error>, convert: impl FnOnce(T) -> SqlValue) -> SqlValue {
    match result {
        Ok(Some(value)) => convert(value),
        Ok(None) => SqlValue::Null,
        Err(e) => {
            tracing::warn!("Failed to decode {} column: {}", type_name, e);
            SqlValue::Null
        }
    }
}

/// Extract typed value from database column
pub fn column_value(row: &PgRow, index: usize, type_name: &str) -> SqlValue {
    match type_name {
        "BOOL" => decoded(type_name, row.try_get::<Option<bool>, _>(index), SqlValue::Bool),
        "INT2" => decoded(type_name, row.try_get::<Option<i16>, _>(index), |n| SqlValue::Integer(n.into())),
        "INT4" => decoded(type_name, row.try_get::<Option<i32>, _>(index), |n| SqlValue::Integer(n.into())),
        "INT8" => decoded(type_name, row.try_get::<Option<i64>, _>(index), SqlValue::Integer),
        "FLOAT4" => decoded(type_name, row.try_get::<Option<f32>, _>(index), |f| SqlValue::Float(f.into())),
        "FLOAT8" => decoded(type_name, row.try_get::<Option<f64>, _>(index), SqlValue::Float),
        "NUMERIC" => decoded(type_name, row.try_get::<Option<BigDecimal>, _>(index), decimal_to_float),
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" | "CITEXT" => {
            decoded(type_name, row.try_get::<Option<String>, _>(index), SqlValue::Text)
        }
        "UUID" => decoded(type_name, row.try_get::<Option<Uuid>, _>(index), |u| SqlValue::Text(u.to_string())),
        "JSON" | "JSONB" => decoded(type_name, row.try_get::<Option<Value>, _>(index), |v| SqlValue::Text(v.to_string())),
        "TIMESTAMPTZ" => decoded(
            type_name,
            row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index),
            |t| SqlValue::Timestamp(t.to_rfc3339()),
        ),
        "TIMESTAMP" => decoded(
            type_name,
            row.try_get::<Option<chrono::NaiveDateTime>, _>(index),
            |t| SqlValue::Timestamp(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        ),
        "DATE" => decoded(
            type_name,
            row.try_get::<Option<chrono::NaiveDate>, _>(index),
            |d| SqlValue::Timestamp(d.format("%Y-%m-%d").to_string()),
        ),
        "TIME" => decoded(
            type_name,
            row.try_get::<Option<chrono::NaiveTime>, _>(index),
            |t| SqlValue::Timestamp(t.format("%H:%M:%S%.f").to_string()),
        ),
        "TEXT[]" | "VARCHAR[]" => decoded(type_name, row.try_get::<Option<Vec<String>>, _>(index), |items| {
            SqlValue::Text(Value::from(items).to_string())
        }),
        _ => match row.try_get::<Option<String>, _>(index) {
            Ok(Some(s)) => SqlValue::Text(s),
            Ok(None) => SqlValue::Null,
            Err(_) => {
                tracing::warn!("Unhandled PostgreSQL type: {}, returning placeholder", type_name);
                SqlValue::Text(format!("<unsupported type: {}>", type_name))
            }
        },
    }
}

/// Fixed-point decimals become floats; anything unrepresentable stays as its exact text
fn decimal_to_float(value: BigDecimal) -> SqlValue {
    let text = value.to_string();
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() => SqlValue::Float(f),
        _ => SqlValue::Text(text),
    }
}
