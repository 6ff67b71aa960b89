//! Raw row values decoded from the replication stream.
//!
//! Values arrive as a positional tuple aligned with the table's column
//! order. The shapes below cover what the binlog produces after decoding:
//! integers (also enum indices and set bitmasks), floats, byte strings
//! (VARCHAR/BLOB/BIT/JSON), text (temporal values rendered canonically by
//! the source), and NULL.

use serde_json::{Number, Value};
use std::fmt;

/// A single column value from a decoded row image.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Bytes(Vec<u8>),
    Text(String),
}

impl SqlValue {
    /// Check for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Read the value as a signed integer, if it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            SqlValue::Int(n) => Some(*n),
            SqlValue::UInt(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    /// Read the value as text, if it is textual.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Canonical textual form, used for document and parent ids.
    pub fn to_text(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Int(n) => n.to_string(),
            SqlValue::UInt(n) => n.to_string(),
            SqlValue::Float(f) => f.to_string(),
            SqlValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            SqlValue::Text(s) => s.clone(),
        }
    }

    /// Convert to a JSON value without any column-aware coercion.
    ///
    /// Byte strings become text; MySQL byte payloads that reach this path
    /// are character data whose column kind needed no special handling.
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Int(n) => Value::Number((*n).into()),
            SqlValue::UInt(n) => Value::Number((*n).into()),
            SqlValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            SqlValue::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
            SqlValue::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        SqlValue::UInt(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}
