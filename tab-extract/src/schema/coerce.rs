//! Typed extraction of entity fields and coercion of rows against a table.

use chrono::DateTime;

use super::{Column, FieldDataType, ResolvedField, SqlType, TableDefinition};
use crate::error::{ExportError, Result};
use crate::value::{render_timestamp, require_timestamp, Row, Value};

/// Resolves one field of a fetched entity into a cell value.
///
/// Absent attributes and JSON nulls become [`Value::Null`]; nullability is
/// enforced later by [`coerce_row`].
pub fn extract_field(entity: &serde_json::Value, field: &ResolvedField) -> Result<Value> {
    let name = field.spec.field_name.as_str();
    let raw = match field.path.lookup(entity) {
        None | Some(serde_json::Value::Null) => return Ok(Value::Null),
        Some(raw) => raw,
    };

    match &field.spec.data_type {
        FieldDataType::String | FieldDataType::Other(_) => Ok(text_from_json(raw)),
        FieldDataType::Int => int_from_json(name, raw),
        FieldDataType::Double => double_from_json(name, raw),
        FieldDataType::Boolean => raw
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| ExportError::type_mismatch(name, "boolean", json_kind(raw))),
        FieldDataType::Datetime => datetime_from_json(name, raw),
    }
}

fn text_from_json(raw: &serde_json::Value) -> Value {
    match raw {
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Bool(b) => Value::Text(b.to_string()),
        serde_json::Value::Number(n) => Value::Text(n.to_string()),
        other => Value::Text(other.to_string()),
    }
}

fn int_from_json(name: &str, raw: &serde_json::Value) -> Result<Value> {
    if let Some(v) = raw.as_i64() {
        return Ok(Value::Int(v));
    }
    if let Some(v) = raw.as_f64().filter(|v| v.fract() == 0.0 && v.abs() < i64::MAX as f64) {
        return Ok(Value::Int(v as i64));
    }
    if let Some(v) = raw.as_str().and_then(|s| s.trim().parse::<i64>().ok()) {
        return Ok(Value::Int(v));
    }
    Err(ExportError::type_mismatch(name, "int", json_kind(raw)))
}

fn double_from_json(name: &str, raw: &serde_json::Value) -> Result<Value> {
    if let Some(v) = raw.as_f64() {
        return Ok(Value::Double(v));
    }
    if let Some(v) = raw.as_str().and_then(|s| s.trim().parse::<f64>().ok()) {
        return Ok(Value::Double(v));
    }
    Err(ExportError::type_mismatch(name, "double", json_kind(raw)))
}

fn datetime_from_json(name: &str, raw: &serde_json::Value) -> Result<Value> {
    match raw {
        serde_json::Value::String(s) => {
            let ts = require_timestamp(s)?;
            Ok(Value::Text(render_timestamp(&ts)))
        }
        // Epoch milliseconds.
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|ms| {
                let nanos = (ms.rem_euclid(1_000) * 1_000_000) as u32;
                DateTime::from_timestamp(ms.div_euclid(1_000), nanos)
            })
            .map(|dt| Value::Text(render_timestamp(&dt.naive_utc())))
            .ok_or_else(|| ExportError::Timestamp(n.to_string())),
        other => Err(ExportError::type_mismatch(name, "datetime", json_kind(other))),
    }
}

fn json_kind(raw: &serde_json::Value) -> &'static str {
    match raw {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Coerces a value to the column it is written to.
pub fn coerce_value(value: Value, column: &Column) -> Result<Value> {
    let mismatch = |value: &Value| {
        ExportError::type_mismatch(&column.name, column.sql_type.to_string(), value.kind())
    };

    match (column.sql_type, value) {
        (_, Value::Null) if column.nullable => Ok(Value::Null),
        (_, Value::Null) => Err(ExportError::NullViolation {
            column: column.name.clone(),
        }),
        (SqlType::Text, Value::Text(s)) => Ok(Value::Text(s)),
        (SqlType::Text, other) => Ok(Value::Text(other.to_string())),
        (SqlType::Int, Value::Int(v)) => Ok(Value::Int(v)),
        (SqlType::Int, Value::Double(v)) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
            Ok(Value::Int(v as i64))
        }
        (SqlType::Double, Value::Double(v)) => Ok(Value::Double(v)),
        (SqlType::Double, Value::Int(v)) => Ok(Value::Double(v as f64)),
        (SqlType::Bool, Value::Bool(v)) => Ok(Value::Bool(v)),
        (SqlType::Date, Value::Text(s)) => {
            let ts = require_timestamp(&s)?;
            Ok(Value::Text(render_timestamp(&ts)))
        }
        (_, other) => Err(mismatch(&other)),
    }
}

/// Checks a row's arity and coerces every cell against the definition.
pub fn coerce_row(definition: &TableDefinition, row: Row) -> Result<Row> {
    if row.len() != definition.column_count() {
        return Err(ExportError::ColumnCountMismatch {
            expected: definition.column_count(),
            found: row.len(),
        });
    }

    row.into_iter()
        .zip(&definition.columns)
        .map(|(value, column)| coerce_value(value, column))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSpec, TableName};
    use serde_json::json;

    fn field(name: &str, data_type: FieldDataType) -> ResolvedField {
        ResolvedField::resolve(FieldSpec::new(name, data_type, true)).unwrap()
    }

    #[test]
    fn test_extract_datetime_renders_canonical_form() {
        let entity = json!({"installed": "2019-03-04T05:06:07.000Z", "epoch": 0});
        assert_eq!(
            extract_field(&entity, &field("installed", FieldDataType::Datetime)).unwrap(),
            Value::Text("2019-03-04 05:06:07".into())
        );
        assert_eq!(
            extract_field(&entity, &field("epoch", FieldDataType::Datetime)).unwrap(),
            Value::Text("1970-01-01 00:00:00".into())
        );
    }

    #[test]
    fn test_extract_string_keeps_timestamp_text() {
        let entity = json!({"label": "2020-01-01T10:00:00.750+02:00"});
        assert_eq!(
            extract_field(&entity, &field("label", FieldDataType::String)).unwrap(),
            Value::Text("2020-01-01T10:00:00.750+02:00".into())
        );
        assert_eq!(
            extract_field(&entity, &field("label", FieldDataType::Other("text".into()))).unwrap(),
            Value::Text("2020-01-01T10:00:00.750+02:00".into())
        );
    }

    #[test]
    fn test_extract_nested_and_missing() {
        let entity = json!({"fixture": {"wattage": 60, "room": "kitchen"}});
        assert_eq!(
            extract_field(&entity, &field("fixture.wattage", FieldDataType::Int)).unwrap(),
            Value::Int(60)
        );
        assert_eq!(
            extract_field(&entity, &field("fixture.room", FieldDataType::String)).unwrap(),
            Value::Text("kitchen".into())
        );
        assert_eq!(
            extract_field(&entity, &field("fixture.missing", FieldDataType::Int)).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_extract_type_mismatch() {
        let entity = json!({"on": "yes", "count": "many"});
        assert!(matches!(
            extract_field(&entity, &field("on", FieldDataType::Boolean)),
            Err(ExportError::TypeMismatch { .. })
        ));
        assert!(matches!(
            extract_field(&entity, &field("count", FieldDataType::Int)),
            Err(ExportError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_extract_numeric_strings() {
        let entity = json!({"count": "12", "ratio": "0.5", "whole": 3.0});
        assert_eq!(
            extract_field(&entity, &field("count", FieldDataType::Int)).unwrap(),
            Value::Int(12)
        );
        assert_eq!(
            extract_field(&entity, &field("ratio", FieldDataType::Double)).unwrap(),
            Value::Double(0.5)
        );
        assert_eq!(
            extract_field(&entity, &field("whole", FieldDataType::Int)).unwrap(),
            Value::Int(3)
        );
    }

    #[test]
    fn test_coerce_row() {
        let def = TableDefinition::new(
            TableName::extract("T"),
            vec![
                Column::new("id", SqlType::Text, false),
                Column::new("start", SqlType::Date, false),
                Column::new("v", SqlType::Double, true),
            ],
        );

        let row = coerce_row(
            &def,
            vec![Value::Int(7), "2020-01-01T00:00:00".into(), Value::Int(0)],
        )
        .unwrap();
        assert_eq!(
            row,
            vec![
                Value::Text("7".into()),
                Value::Text("2020-01-01 00:00:00".into()),
                Value::Double(0.0)
            ]
        );

        assert!(matches!(
            coerce_row(&def, vec![Value::Null, "2020-01-01".into(), Value::Null]),
            Err(ExportError::NullViolation { ref column }) if column == "id"
        ));
        assert!(matches!(
            coerce_row(&def, vec!["x".into()]),
            Err(ExportError::ColumnCountMismatch { expected: 3, found: 1 })
        ));
        assert!(matches!(
            coerce_row(&def, vec!["x".into(), "2020-01-01".into(), Value::Bool(true)]),
            Err(ExportError::TypeMismatch { .. })
        ));
    }
}
