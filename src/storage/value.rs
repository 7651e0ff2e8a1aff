//! Conversion between JSON field values and SQLite values.
//!
//! Change records carry JSON scalars; the store holds SQLite values. Arrays
//! and objects are stored as their JSON text.

use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value;

/// Convert a JSON value into an owned SQLite value.
#[must_use]
pub fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

/// Convert a borrowed SQLite value into JSON.
#[must_use]
pub fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Array(b.iter().map(|byte| Value::from(*byte)).collect()),
    }
}

/// Parse a CLI `col=value` argument value.
///
/// JSON scalars (`null`, `true`, `42`, `1.5`, `"quoted"`) are taken as JSON;
/// anything else is a plain string.
#[must_use]
pub fn parse_cli_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ (Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_))) => v,
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_to_sql_scalars() {
        assert_eq!(json_to_sql(&json!(null)), SqlValue::Null);
        assert_eq!(json_to_sql(&json!(true)), SqlValue::Integer(1));
        assert_eq!(json_to_sql(&json!(7)), SqlValue::Integer(7));
        assert_eq!(json_to_sql(&json!(1.5)), SqlValue::Real(1.5));
        assert_eq!(json_to_sql(&json!("x")), SqlValue::Text("x".into()));
        assert_eq!(json_to_sql(&json!([1, 2])), SqlValue::Text("[1,2]".into()));
    }

    #[test]
    fn test_sql_to_json() {
        assert_eq!(sql_to_json(ValueRef::Null), json!(null));
        assert_eq!(sql_to_json(ValueRef::Integer(3)), json!(3));
        assert_eq!(sql_to_json(ValueRef::Real(2.5)), json!(2.5));
        assert_eq!(sql_to_json(ValueRef::Text(b"hi")), json!("hi"));
    }

    #[test]
    fn test_parse_cli_value() {
        assert_eq!(parse_cli_value("null"), json!(null));
        assert_eq!(parse_cli_value("1200.5"), json!(1200.5));
        assert_eq!(parse_cli_value("555-1000"), json!("555-1000"));
        assert_eq!(parse_cli_value("Acme Corp"), json!("Acme Corp"));
        assert_eq!(parse_cli_value("[1]"), json!("[1]"));
    }
}
