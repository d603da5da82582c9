//! Document transformation
//!
//! Coerces source attribute values into typed destination columns. Failures
//! are isolated per attribute: the offending column becomes `NULL`, an
//! `"<attribute>: <message>"` entry is recorded, and the remaining attributes
//! are still processed. A document is never rejected as a whole.
//!
//! Date and datetime inputs are matched against the configured formats in
//! order and the first format that parses wins, so the same input always
//! yields the same output.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;
use thiserror::Error;

use crate::config::types::ColumnType;
use crate::config::{ColumnMapping, RuntimeSettings};
use crate::input::Document;
use crate::value::{Row, SqlValue};

/// Why a single value could not be converted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("invalid value for type '{0}'")]
    InvalidValue(String),

    #[error("invalid date format")]
    InvalidDate,

    #[error("invalid datetime format")]
    InvalidDatetime,

    #[error("invalid output format '{0}'")]
    InvalidOutputFormat(String),

    #[error("unsupported target type '{0}'")]
    UnsupportedType(String),
}

/// Outcome of transforming one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformResult {
    /// Destination column -> converted value
    pub transformed: Row,
    /// Mapped columns whose source attribute was absent or null
    pub missing_columns: Vec<String>,
    /// `"<attribute>: <message>"` for every failed conversion
    pub errors: Vec<String>,
}

impl TransformResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Value coercion driven by the runtime date settings
#[derive(Debug, Clone)]
pub struct TypeTransformer {
    date_formats: Vec<String>,
    date_output_format: String,
    datetime_output_format: String,
}

impl TypeTransformer {
    pub fn new(
        date_formats: Vec<String>,
        date_output_format: impl Into<String>,
        datetime_output_format: impl Into<String>,
    ) -> Self {
        Self {
            date_formats,
            date_output_format: date_output_format.into(),
            datetime_output_format: datetime_output_format.into(),
        }
    }

    /// Build a transformer from the `runtime` config section
    pub fn from_runtime(runtime: &RuntimeSettings) -> Self {
        Self::new(
            runtime.date_formats.clone(),
            runtime.date_output_format.clone(),
            runtime.datetime_output_format.clone(),
        )
    }

    /// Transform every mapped attribute of a document
    pub fn transform_document(
        &self,
        document: &Document,
        mappings: &BTreeMap<String, ColumnMapping>,
    ) -> TransformResult {
        let mut result = TransformResult::default();

        for (attribute, mapping) in mappings {
            let value = match document.get(attribute) {
                None | Some(Value::Null) => {
                    result.transformed.insert(mapping.column.clone(), SqlValue::Null);
                    result.missing_columns.push(mapping.column.clone());
                    continue;
                }
                Some(value) => value,
            };

            let converted = match self.transform_value(value, &mapping.type_name) {
                Ok(converted) => converted,
                Err(e) => {
                    result.errors.push(format!("{}: {}", attribute, e));
                    SqlValue::Null
                }
            };
            result.transformed.insert(mapping.column.clone(), converted);
        }

        result
    }

    /// Convert one value to the declared type
    pub fn transform_value(&self, value: &Value, type_name: &str) -> Result<SqlValue, TransformError> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }

        let column_type = ColumnType::from_name(type_name)
            .ok_or_else(|| TransformError::UnsupportedType(type_name.to_string()))?;
        let invalid = || TransformError::InvalidValue(type_name.to_string());

        match column_type {
            ColumnType::Text => Ok(SqlValue::Text(text_form(value))),
            ColumnType::Integer => to_integer(value).map(SqlValue::Int).ok_or_else(invalid),
            ColumnType::Float => to_float(value).map(SqlValue::Float).ok_or_else(invalid),
            ColumnType::Numeric => to_decimal(value).map(SqlValue::Decimal).ok_or_else(invalid),
            ColumnType::Boolean => normalize_boolean(value).map(SqlValue::Bool).ok_or_else(invalid),
            ColumnType::Date => {
                let parsed = parse_date(value, &self.date_formats).ok_or(TransformError::InvalidDate)?;
                format_with(parsed.format(&self.date_output_format), &self.date_output_format)
                    .map(SqlValue::Text)
            }
            ColumnType::DateTime => {
                let parsed = parse_datetime(value, &self.date_formats)
                    .ok_or(TransformError::InvalidDatetime)?;
                format_with(
                    parsed.format(&self.datetime_output_format),
                    &self.datetime_output_format,
                )
                .map(SqlValue::Text)
            }
        }
    }
}

fn format_with(formatted: impl std::fmt::Display, format: &str) -> Result<String, TransformError> {
    let mut out = String::new();
    write!(out, "{}", formatted).map_err(|_| TransformError::InvalidOutputFormat(format.to_string()))?;
    Ok(out)
}

/// String form of a value: strings unchanged, compound values as JSON
fn text_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn to_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(i);
            }
            let f = n.as_f64()?;
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
                Some(f as i64)
            } else {
                None
            }
        }
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse a decimal from the value's string form, never through a float
fn to_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// Interpret a value as a boolean
///
/// Accepts native booleans, numbers (non-zero is true) and the strings
/// `true/t/yes/y/1` and `false/f/no/n/0` in any case.
pub fn normalize_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Some(true),
            "false" | "f" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Parse a date, trying each format in order
pub fn parse_date(value: &Value, formats: &[String]) -> Option<NaiveDate> {
    parse_datetime(value, formats).map(|dt| dt.date())
}

/// Parse a datetime, trying each format in order
///
/// A format without time fields yields midnight of the parsed date.
pub fn parse_datetime(value: &Value, formats: &[String]) -> Option<NaiveDateTime> {
    match value {
        Value::String(s) => formats.iter().find_map(|format| parse_with_format(s, format)),
        Value::Object(map) => map.get("$date").and_then(extended_json_date),
        _ => None,
    }
}

/// Parse with one format; a date-only format yields midnight
pub(crate) fn parse_with_format(text: &str, format: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, format).ok().or_else(|| {
        NaiveDate::parse_from_str(text, format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
    })
}

/// Already-typed date in Mongo extended JSON: `{"$date": ...}`
fn extended_json_date(value: &Value) -> Option<NaiveDateTime> {
    let millis = match value {
        Value::String(s) => {
            return DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc).naive_utc());
        }
        Value::Number(n) => n.as_i64()?,
        Value::Object(map) => map.get("$numberLong")?.as_str()?.parse().ok()?,
        _ => return None,
    };
    DateTime::<Utc>::from_timestamp_millis(millis).map(|dt| dt.naive_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transformer() -> TypeTransformer {
        TypeTransformer::new(
            vec!["%Y-%m-%d".to_string(), "%d-%m-%Y".to_string()],
            "%Y-%m-%d",
            "%Y-%m-%d %H:%M:%S",
        )
    }

    #[test]
    fn test_normalize_boolean_vocabulary() {
        for truthy in ["true", "T", "Yes", "y", "1", " TRUE "] {
            assert_eq!(normalize_boolean(&json!(truthy)), Some(true), "{truthy}");
        }
        for falsy in ["false", "F", "NO", "n", "0"] {
            assert_eq!(normalize_boolean(&json!(falsy)), Some(false), "{falsy}");
        }
        assert_eq!(normalize_boolean(&json!(true)), Some(true));
        assert_eq!(normalize_boolean(&json!(0)), Some(false));
        assert_eq!(normalize_boolean(&json!(2.5)), Some(true));
        assert_eq!(normalize_boolean(&json!("maybe")), None);
        assert_eq!(normalize_boolean(&json!("")), None);
        assert_eq!(normalize_boolean(&json!([true])), None);
    }

    #[test]
    fn test_first_matching_format_wins() {
        let formats = vec!["%Y-%m-%d".to_string(), "%d-%m-%Y".to_string()];
        let date = parse_date(&json!("2024-01-05"), &formats).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());

        let date = parse_date(&json!("05-01-2024"), &formats).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
    }

    #[test]
    fn test_datetime_promotes_bare_date() {
        let t = transformer();
        let value = t.transform_value(&json!("2024-01-05"), "datetime").unwrap();
        assert_eq!(value, SqlValue::Text("2024-01-05 00:00:00".to_string()));
    }

    #[test]
    fn test_date_truncates_datetime_format() {
        let t = TypeTransformer::new(vec!["%Y-%m-%dT%H:%M:%S".to_string()], "%d/%m/%Y", "%+");
        let value = t.transform_value(&json!("2024-03-09T17:45:00"), "date").unwrap();
        assert_eq!(value, SqlValue::Text("09/03/2024".to_string()));
    }

    #[test]
    fn test_extended_json_date_is_preparsed() {
        let t = transformer();
        let value = t
            .transform_value(&json!({"$date": "2024-01-05T10:30:00Z"}), "datetime")
            .unwrap();
        assert_eq!(value, SqlValue::Text("2024-01-05 10:30:00".to_string()));

        let value = t
            .transform_value(&json!({"$date": {"$numberLong": "0"}}), "date")
            .unwrap();
        assert_eq!(value, SqlValue::Text("1970-01-01".to_string()));
    }

    #[test]
    fn test_invalid_date() {
        let t = transformer();
        assert_eq!(
            t.transform_value(&json!("not-a-date"), "date"),
            Err(TransformError::InvalidDate)
        );
        assert_eq!(
            t.transform_value(&json!(20240105), "datetime"),
            Err(TransformError::InvalidDatetime)
        );
    }

    #[test]
    fn test_integer_conversion() {
        let t = transformer();
        assert_eq!(t.transform_value(&json!(7), "INT"), Ok(SqlValue::Int(7)));
        assert_eq!(t.transform_value(&json!(" 12 "), "bigint"), Ok(SqlValue::Int(12)));
        assert_eq!(t.transform_value(&json!(3.0), "integer"), Ok(SqlValue::Int(3)));
        assert_eq!(t.transform_value(&json!(true), "smallint"), Ok(SqlValue::Int(1)));
        assert_eq!(
            t.transform_value(&json!(3.7), "integer"),
            Err(TransformError::InvalidValue("integer".to_string()))
        );
        assert!(t.transform_value(&json!("12abc"), "int").is_err());
        assert!(t.transform_value(&json!({"n": 1}), "int").is_err());
    }

    #[test]
    fn test_float_conversion() {
        let t = transformer();
        assert_eq!(t.transform_value(&json!("2.5"), "float"), Ok(SqlValue::Float(2.5)));
        assert_eq!(t.transform_value(&json!(4), "double precision"), Ok(SqlValue::Float(4.0)));
        assert!(t.transform_value(&json!("abc"), "double").is_err());
    }

    #[test]
    fn test_decimal_avoids_float_drift() {
        let t = transformer();
        let value = t.transform_value(&json!("0.1"), "numeric").unwrap();
        assert_eq!(value, SqlValue::Decimal(Decimal::from_str("0.1").unwrap()));

        let value = t.transform_value(&json!(19.99), "decimal").unwrap();
        assert_eq!(value, SqlValue::Decimal(Decimal::from_str("19.99").unwrap()));

        let value = t.transform_value(&json!("1.5e3"), "decimal").unwrap();
        assert_eq!(value, SqlValue::Decimal(Decimal::from(1500)));

        assert!(t.transform_value(&json!(true), "numeric").is_err());
    }

    #[test]
    fn test_text_conversion() {
        let t = transformer();
        assert_eq!(t.transform_value(&json!("Al"), "Text"), Ok(SqlValue::from("Al")));
        assert_eq!(t.transform_value(&json!(42), "varchar"), Ok(SqlValue::from("42")));
        assert_eq!(
            t.transform_value(&json!({"a": 1}), "string"),
            Ok(SqlValue::from(r#"{"a":1}"#))
        );
    }

    #[test]
    fn test_unsupported_type() {
        let t = transformer();
        assert_eq!(
            t.transform_value(&json!("x"), "geometry"),
            Err(TransformError::UnsupportedType("geometry".to_string()))
        );
        assert_eq!(t.transform_value(&json!(null), "geometry"), Ok(SqlValue::Null));
    }

    #[test]
    fn test_invalid_output_format_is_error() {
        let t = TypeTransformer::new(vec!["%Y-%m-%d".to_string()], "%Q", "%Q");
        assert!(matches!(
            t.transform_value(&json!("2024-01-05"), "date"),
            Err(TransformError::InvalidOutputFormat(_))
        ));
    }

    #[test]
    fn test_transform_document_isolates_errors() {
        let t = transformer();
        let mut mappings = BTreeMap::new();
        mappings.insert("id".to_string(), ColumnMapping::new("id", "int"));
        mappings.insert("joined".to_string(), ColumnMapping::new("joined_on", "date"));
        mappings.insert("name".to_string(), ColumnMapping::new("name", "text"));
        mappings.insert("active".to_string(), ColumnMapping::new("active", "bool"));

        let document = json!({"id": 1, "joined": "not-a-date", "active": null})
            .as_object()
            .cloned()
            .unwrap();
        let result = t.transform_document(&document, &mappings);

        assert_eq!(result.errors, vec!["joined: invalid date format".to_string()]);
        assert_eq!(result.missing_columns, vec!["active".to_string(), "name".to_string()]);
        assert_eq!(result.transformed["id"], SqlValue::Int(1));
        assert_eq!(result.transformed["joined_on"], SqlValue::Null);
        assert_eq!(result.transformed["name"], SqlValue::Null);
        assert_eq!(result.transformed.len(), 4);
        assert!(result.has_errors());
    }
}
