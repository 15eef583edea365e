use crate::catalog::schema::{ColumnDef, TableSchema};
use crate::catalog::types::{
    ColumnType, Record, Value, format_timestamp, parse_timestamp, timestamp_from_millis,
};
use crate::error::KvRelError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

pub const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct RowEnvelope {
    v: u32,
    seq: u64,
    row: Map<String, JsonValue>,
}

/// A decoded row plus the insertion sequence it was first written with.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub seq: u64,
    pub record: Record,
}

/// Validates `record` against `schema` and applies insert-time coercions.
/// Declared columns missing from the record are treated as null.
pub fn coerce_record(schema: &TableSchema, mut record: Record) -> Result<Record, KvRelError> {
    let table = &schema.table_name;
    if let Some(unknown) = record.keys().find(|k| schema.find_column(k).is_none()) {
        return Err(KvRelError::UnknownColumn {
            table: table.clone(),
            column: unknown.clone(),
        });
    }
    for pk in &schema.primary_key {
        if record.get(pk).is_none_or(Value::is_null) {
            return Err(KvRelError::MissingPrimaryKey {
                table: table.clone(),
                column: pk.clone(),
            });
        }
    }
    let mut out = Record::new();
    for column in &schema.columns {
        let value = record.remove(&column.name).unwrap_or(Value::Null);
        out.insert(column.name.clone(), coerce_value(table, column, value)?);
    }
    Ok(out)
}

pub(crate) fn coerce_value(
    table: &str,
    column: &ColumnDef,
    value: Value,
) -> Result<Value, KvRelError> {
    let mismatch = |value: &Value| KvRelError::TypeMismatch {
        table: table.to_string(),
        column: column.name.clone(),
        expected: column.col_type.as_str().to_string(),
        actual: value.type_name().to_string(),
    };
    match (column.col_type, value) {
        (_, Value::Null) if column.nullable => Ok(Value::Null),
        (_, Value::Null) => Err(KvRelError::NotNullViolation {
            table: table.to_string(),
            column: column.name.clone(),
        }),
        (ColumnType::Text, v @ Value::Text(_)) => Ok(v),
        (ColumnType::Integer, v @ Value::Integer(_)) => Ok(v),
        (ColumnType::Boolean, v @ Value::Boolean(_)) => Ok(v),
        (ColumnType::Float, Value::Float(f)) if f.is_finite() => Ok(Value::Float(f)),
        (ColumnType::Float, Value::Integer(i)) => Ok(Value::Float(i as f64)),
        (ColumnType::Timestamp, v @ Value::Timestamp(_)) => Ok(v),
        (ColumnType::Timestamp, Value::Text(raw)) => parse_timestamp(&raw)
            .map(Value::Timestamp)
            .ok_or_else(|| mismatch(&Value::Text(raw))),
        (ColumnType::Timestamp, Value::Integer(millis)) => timestamp_from_millis(millis)
            .map(Value::Timestamp)
            .ok_or_else(|| mismatch(&Value::Integer(millis))),
        (ColumnType::Json, v @ (Value::Json(_) | Value::Text(_))) => Ok(v),
        (_, other) => Err(mismatch(&other)),
    }
}

/// Serializes a coerced record into the stored envelope.
pub fn encode_row(seq: u64, record: &Record) -> Result<Vec<u8>, KvRelError> {
    let row = record
        .iter()
        .map(|(name, value)| Ok((name.clone(), value_to_stored(value)?)))
        .collect::<Result<Map<String, JsonValue>, KvRelError>>()?;
    let envelope = RowEnvelope {
        v: ENVELOPE_VERSION,
        seq,
        row,
    };
    serde_json::to_vec(&envelope).map_err(|e| KvRelError::Encode(e.to_string()))
}

fn value_to_stored(value: &Value) -> Result<JsonValue, KvRelError> {
    Ok(match value {
        Value::Null => JsonValue::Null,
        Value::Text(s) => JsonValue::String(s.to_string()),
        Value::Integer(v) => JsonValue::from(*v),
        Value::Float(v) => serde_json::Number::from_f64(*v)
            .map(JsonValue::Number)
            .ok_or_else(|| KvRelError::Encode(format!("non-finite float {v}")))?,
        Value::Boolean(v) => JsonValue::Bool(*v),
        Value::Timestamp(ts) => JsonValue::String(format_timestamp(ts)),
        Value::Json(v) => JsonValue::String(
            serde_json::to_string(v).map_err(|e| KvRelError::Encode(e.to_string()))?,
        ),
    })
}

/// Decodes a stored envelope. Column values follow `schema`; fields the
/// schema does not declare are decoded generically.
pub fn decode_row(schema: &TableSchema, bytes: &[u8]) -> Result<StoredRow, KvRelError> {
    let envelope: RowEnvelope = serde_json::from_slice(bytes).map_err(|e| {
        KvRelError::Decode(format!(
            "row envelope in table '{}': {e}",
            schema.table_name
        ))
    })?;
    if envelope.v != ENVELOPE_VERSION {
        return Err(KvRelError::Decode(format!(
            "unsupported row envelope version {} in table '{}'",
            envelope.v, schema.table_name
        )));
    }
    let record = envelope
        .row
        .into_iter()
        .map(|(name, stored)| {
            let value = match schema.find_column(&name) {
                Some(column) => stored_to_value(&schema.table_name, column, stored),
                None => generic_value(stored),
            };
            (name, value)
        })
        .collect();
    Ok(StoredRow {
        seq: envelope.seq,
        record,
    })
}

fn stored_to_value(table: &str, column: &ColumnDef, stored: JsonValue) -> Value {
    match (column.col_type, stored) {
        (_, JsonValue::Null) => Value::Null,
        (ColumnType::Timestamp, JsonValue::String(raw)) => match parse_timestamp(&raw) {
            Some(ts) => Value::Timestamp(ts),
            None => {
                debug!(table, column = %column.name, "stored timestamp is not rfc3339");
                Value::Text(raw.into())
            }
        },
        (ColumnType::Timestamp, JsonValue::Number(n)) => {
            match n.as_i64().and_then(timestamp_from_millis) {
                Some(ts) => Value::Timestamp(ts),
                None => generic_value(JsonValue::Number(n)),
            }
        }
        (ColumnType::Json, JsonValue::String(raw)) => match serde_json::from_str(&raw) {
            Ok(parsed) => Value::Json(parsed),
            Err(err) => {
                debug!(table, column = %column.name, error = %err, "json column kept as raw text");
                Value::Text(raw.into())
            }
        },
        (ColumnType::Json, structured) => Value::Json(structured),
        (ColumnType::Float, JsonValue::Number(n)) => match n.as_f64() {
            Some(f) => Value::Float(f),
            None => generic_value(JsonValue::Number(n)),
        },
        (_, other) => generic_value(other),
    }
}

fn generic_value(stored: JsonValue) -> Value {
    match stored {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Boolean(b),
        JsonValue::String(s) => Value::Text(s.into()),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n
                .as_f64()
                .map(Value::Float)
                .unwrap_or(Value::Json(JsonValue::Number(n))),
        },
        structured @ (JsonValue::Array(_) | JsonValue::Object(_)) => Value::Json(structured),
    }
}
