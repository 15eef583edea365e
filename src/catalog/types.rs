use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Json,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Json => "json",
        }
    }

    /// Columns whose values map onto an index score.
    pub fn is_orderable(self) -> bool {
        matches!(self, ColumnType::Timestamp | ColumnType::Integer)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(CompactString),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Json(JsonValue),
    Null,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Boolean(_) => "boolean",
            Value::Timestamp(_) => "timestamp",
            Value::Json(_) => "json",
            Value::Null => "null",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Value::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value.into())
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::Text(value.as_str().into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        Value::Json(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A row as seen by callers: column name to value.
pub type Record = BTreeMap<String, Value>;

pub fn record<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Record
where
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// A JSON-typed column as returned on read. Stored text that does not parse
/// is handed back verbatim instead of failing the read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JsonField {
    Parsed(JsonValue),
    Raw(String),
}

impl JsonField {
    pub fn from_text(raw: &str) -> Self {
        match serde_json::from_str::<JsonValue>(raw) {
            Ok(v) => JsonField::Parsed(v),
            Err(_) => JsonField::Raw(raw.to_string()),
        }
    }

    /// Maps a decoded column value; `None` for SQL-style nulls.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Json(v) => Some(JsonField::Parsed(v)),
            Value::Text(s) => Some(JsonField::Raw(s.to_string())),
            Value::Integer(v) => Some(JsonField::Parsed(JsonValue::from(v))),
            Value::Float(v) => Some(JsonField::Parsed(JsonValue::from(v))),
            Value::Boolean(v) => Some(JsonField::Parsed(JsonValue::Bool(v))),
            Value::Timestamp(ts) => Some(JsonField::Parsed(JsonValue::String(
                format_timestamp(&ts),
            ))),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            JsonField::Parsed(v) => Value::Json(v),
            JsonField::Raw(s) => Value::Text(s.into()),
        }
    }

    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            JsonField::Parsed(v) => Some(v),
            JsonField::Raw(_) => None,
        }
    }

    pub fn raw(&self) -> Option<&str> {
        match self {
            JsonField::Parsed(_) => None,
            JsonField::Raw(s) => Some(s.as_str()),
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, JsonField::Parsed(_))
    }

    /// Looks up a top-level key of a parsed JSON object.
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.as_json().and_then(|v| v.get(key))
    }
}

impl From<JsonValue> for JsonField {
    fn from(value: JsonValue) -> Self {
        JsonField::Parsed(value)
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

pub fn timestamp_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Sort score of a timestamp: nanoseconds since the epoch, saturating outside
/// the representable range.
pub fn timestamp_score(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(if ts.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    proptest! {
        #[test]
        fn timestamp_text_roundtrip_is_exact(nanos in -4_000_000_000_000_000_000i64..4_000_000_000_000_000_000i64) {
            let ts = Utc.timestamp_nanos(nanos);
            let text = format_timestamp(&ts);
            let parsed = parse_timestamp(&text).expect("parse formatted timestamp");
            prop_assert_eq!(parsed, ts);
            prop_assert_eq!(format_timestamp(&parsed), text);
        }

        #[test]
        fn millis_roundtrip(millis in -60_000_000_000_000i64..60_000_000_000_000i64) {
            let ts = timestamp_from_millis(millis).expect("in range");
            prop_assert_eq!(ts.timestamp_millis(), millis);
        }

        #[test]
        fn timestamp_score_preserves_order(a in -4_000_000_000_000_000_000i64..4_000_000_000_000_000_000i64, b in -4_000_000_000_000_000_000i64..4_000_000_000_000_000_000i64) {
            let ta = Utc.timestamp_nanos(a);
            let tb = Utc.timestamp_nanos(b);
            prop_assert_eq!(timestamp_score(&ta).cmp(&timestamp_score(&tb)), ta.cmp(&tb));
        }
    }

    #[test]
    fn millisecond_timestamps_format_like_iso_strings() {
        let ts = timestamp_from_millis(1_700_000_000_123).expect("ts");
        assert_eq!(format_timestamp(&ts), "2023-11-14T22:13:20.123Z");
    }

    #[test]
    fn json_field_falls_back_to_raw_text() {
        assert_eq!(
            JsonField::from_text(r#"{"code":"success"}"#),
            JsonField::Parsed(json!({"code": "success"}))
        );
        let raw = JsonField::from_text("invalid-json{");
        assert_eq!(raw.raw(), Some("invalid-json{"));
        assert!(!raw.is_parsed());
        assert_eq!(raw.into_value(), Value::Text("invalid-json{".into()));
    }

    #[test]
    fn record_builder_converts_values() {
        let r = record([
            ("id", Value::from("a")),
            ("n", Value::from(3_i64)),
            ("missing", Value::from(None::<String>)),
        ]);
        assert_eq!(r.get("id"), Some(&Value::Text("a".into())));
        assert_eq!(r.get("n").and_then(Value::as_i64), Some(3));
        assert!(r.get("missing").is_some_and(Value::is_null));
    }
}
