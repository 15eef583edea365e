use crate::catalog::types::{JsonField, Record, Value};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

/// Typed view of a stored row.
pub trait TryFromRecord: Sized {
    fn try_from_record(record: Record) -> Result<Self, RecordDecodeError>;
}

/// The inverse of [`TryFromRecord`]: the record written for an entity.
pub trait IntoRecord {
    fn into_record(self) -> Record;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordDecodeError {
    #[error("missing column '{column}'")]
    MissingColumn { column: String },
    #[error("column '{column}' type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("{message}")]
    Custom { message: String },
}

impl From<RecordDecodeError> for crate::error::KvRelError {
    fn from(err: RecordDecodeError) -> Self {
        crate::error::KvRelError::Decode(err.to_string())
    }
}

pub fn decode_records<T: TryFromRecord>(records: Vec<Record>) -> Result<Vec<T>, RecordDecodeError> {
    records.into_iter().map(T::try_from_record).collect()
}

fn present<'a>(record: &'a Record, column: &str) -> Result<&'a Value, RecordDecodeError> {
    match record.get(column) {
        Some(Value::Null) | None => Err(RecordDecodeError::MissingColumn {
            column: column.to_string(),
        }),
        Some(value) => Ok(value),
    }
}

fn mismatch(column: &str, expected: &'static str, actual: &Value) -> RecordDecodeError {
    RecordDecodeError::TypeMismatch {
        column: column.to_string(),
        expected,
        actual: actual.type_name(),
    }
}

pub fn text_at(record: &Record, column: &str) -> Result<String, RecordDecodeError> {
    match present(record, column)? {
        Value::Text(v) => Ok(v.to_string()),
        other => Err(mismatch(column, "text", other)),
    }
}

pub fn opt_text_at(record: &Record, column: &str) -> Result<Option<String>, RecordDecodeError> {
    match record.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => text_at(record, column).map(Some),
    }
}

pub fn i64_at(record: &Record, column: &str) -> Result<i64, RecordDecodeError> {
    match present(record, column)? {
        Value::Integer(v) => Ok(*v),
        other => Err(mismatch(column, "integer", other)),
    }
}

pub fn timestamp_at(record: &Record, column: &str) -> Result<DateTime<Utc>, RecordDecodeError> {
    match present(record, column)? {
        Value::Timestamp(ts) => Ok(*ts),
        other => Err(mismatch(column, "timestamp", other)),
    }
}

pub fn opt_timestamp_at(
    record: &Record,
    column: &str,
) -> Result<Option<DateTime<Utc>>, RecordDecodeError> {
    match record.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => timestamp_at(record, column).map(Some),
    }
}

/// A JSON column, or its raw text when the stored text does not parse.
pub fn json_at(record: &Record, column: &str) -> Result<JsonField, RecordDecodeError> {
    opt_json_at(record, column)?.ok_or_else(|| RecordDecodeError::MissingColumn {
        column: column.to_string(),
    })
}

pub fn opt_json_at(record: &Record, column: &str) -> Result<Option<JsonField>, RecordDecodeError> {
    Ok(record.get(column).cloned().and_then(JsonField::from_value))
}

/// Record value for an optional JSON field, keeping raw text verbatim.
pub fn json_value(field: Option<JsonField>) -> Value {
    field.map(JsonField::into_value).unwrap_or(Value::Null)
}

pub fn object_or_empty(field: &JsonField) -> serde_json::Map<String, JsonValue> {
    match field.as_json() {
        Some(JsonValue::Object(map)) => map.clone(),
        _ => serde_json::Map::new(),
    }
}
