//! Physical key layout.
//!
//! Rows live at `{prefix}{table}:{pk}`. A configured prefix is escaped like
//! any component and closed with `:`, so stores with distinct prefixes never
//! share a key. Everything derived from a table lives
//! under reserved `__` namespaces, which table names may not use:
//!
//! | key | kind |
//! |---|---|
//! | `__tables` | set of declared table names |
//! | `__schema:{table}` | msgpack schema |
//! | `__seq:{table}` | insertion counter |
//! | `__rows:{table}` | sorted set of every row member |
//! | `__idx:{table}:{index}:{group}` | sorted set of row members in a group |
//! | `__dir:{table}:{index}` | set of encoded groups of an index |
//! | `__ikeys:{table}` | set of every index key ever written for the table |
//!
//! Composite components are joined with `:` after escaping `\` and `:`, so
//! distinct component lists never encode to the same string.

use crate::catalog::types::{Value, format_timestamp};

const SEP: char = ':';
const ESC: char = '\\';

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyspace {
    prefix: String,
}

impl Keyspace {
    pub fn new(prefix: Option<&str>) -> Self {
        let prefix = match prefix {
            Some(raw) => format!("{}{SEP}", escape_component(raw)),
            None => String::new(),
        };
        Self { prefix }
    }

    pub fn tables_key(&self) -> String {
        format!("{}__tables", self.prefix)
    }

    pub fn schema_key(&self, table: &str) -> String {
        format!("{}__schema:{table}", self.prefix)
    }

    pub fn sequence_key(&self, table: &str) -> String {
        format!("{}__seq:{table}", self.prefix)
    }

    pub fn row_registry_key(&self, table: &str) -> String {
        format!("{}__rows:{table}", self.prefix)
    }

    pub fn index_registry_key(&self, table: &str) -> String {
        format!("{}__ikeys:{table}", self.prefix)
    }

    pub fn group_directory_key(&self, table: &str, index: &str) -> String {
        format!("{}__dir:{table}:{}", self.prefix, escape_component(index))
    }

    /// `group` is an already encoded component list, as stored in directories.
    pub fn index_key(&self, table: &str, index: &str, group: &str) -> String {
        format!(
            "{}__idx:{table}:{}:{group}",
            self.prefix,
            escape_component(index)
        )
    }

    /// `member` is the encoded primary key, as stored in index sets.
    pub fn row_key(&self, table: &str, member: &str) -> String {
        format!("{}{table}:{member}", self.prefix)
    }
}

pub fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch == SEP || ch == ESC {
            out.push(ESC);
        }
        out.push(ch);
    }
    out
}

pub fn encode_components<S: AsRef<str>>(components: &[S]) -> String {
    let mut out = String::new();
    for (i, component) in components.iter().enumerate() {
        if i > 0 {
            out.push(SEP);
        }
        out.push_str(&escape_component(component.as_ref()));
    }
    out
}

/// Splits an encoded component list back into its raw components.
pub fn decode_components(encoded: &str) -> Vec<String> {
    let mut parts = vec![String::new()];
    let mut chars = encoded.chars();
    while let Some(ch) = chars.next() {
        match ch {
            ESC => {
                if let Some(next) = chars.next()
                    && let Some(last) = parts.last_mut()
                {
                    last.push(next);
                }
            }
            SEP => parts.push(String::new()),
            other => {
                if let Some(last) = parts.last_mut() {
                    last.push(other);
                }
            }
        }
    }
    parts
}

/// Text form of a key or group value. `None` for nulls, which are never
/// part of a key.
pub fn value_component(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Text(s) => Some(s.to_string()),
        Value::Integer(v) => Some(v.to_string()),
        Value::Float(v) => Some(v.to_string()),
        Value::Boolean(v) => Some(v.to_string()),
        Value::Timestamp(ts) => Some(format_timestamp(ts)),
        Value::Json(v) => Some(v.to_string()),
    }
}
