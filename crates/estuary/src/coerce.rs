//! Column value coercion.
//!
//! Maps raw replication values to indexable JSON, honoring MySQL column
//! semantics: enum indices resolve to member names, set bitmasks to
//! comma-joined member lists, temporal text to RFC3339 or null on zero
//! dates. A hinted projection layers field-mapping type hints on top.

use crate::error::{Result, RiverError};
use crate::schema::{ColumnKind, TableColumn};
use crate::value::SqlValue;
use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone};
use serde_json::{json, Value};
use tracing::warn;

pub(crate) const MYSQL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub(crate) const MYSQL_DATE_FORMAT: &str = "%Y-%m-%d";

/// Field-mapping type hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldHint {
    /// Split a comma-separated string into an ordered list.
    List,
    /// Pass the raw text through untouched.
    String,
    /// Reinterpret a numeric column as a unix-second timestamp and render
    /// it as a datetime.
    Date,
    /// Parse a date/datetime column in local time and emit unix seconds.
    Timestamp,
}

impl FieldHint {
    /// Parse a hint token. The empty token means "no hint".
    pub fn parse(token: &str) -> Result<Option<Self>> {
        match token {
            "" => Ok(None),
            "list" => Ok(Some(FieldHint::List)),
            "string" => Ok(Some(FieldHint::String)),
            "date" => Ok(Some(FieldHint::Date)),
            "timestamp" => Ok(Some(FieldHint::Timestamp)),
            other => Err(RiverError::config(format!(
                "unknown field type hint {other:?}"
            ))),
        }
    }
}

/// Coerce a raw column value to its indexable form.
pub fn coerce(col: &TableColumn, value: &SqlValue) -> Value {
    match col.kind {
        ColumnKind::Enum => coerce_enum(col, value),
        ColumnKind::Set => coerce_set(col, value),
        ColumnKind::Bit => coerce_bit(value),
        ColumnKind::String => match value {
            SqlValue::Bytes(b) => json!(String::from_utf8_lossy(b)),
            other => other.to_json(),
        },
        ColumnKind::Json => coerce_json(value),
        ColumnKind::DateTime | ColumnKind::Timestamp => coerce_datetime(value),
        ColumnKind::Date => coerce_date(value),
        ColumnKind::Decimal => coerce_decimal(value),
        _ => value.to_json(),
    }
}

/// Coerce with a field-mapping hint. Without a hint, plain [`coerce`].
pub fn project(col: &TableColumn, hint: Option<FieldHint>, value: &SqlValue) -> Value {
    let Some(hint) = hint else {
        return coerce(col, value);
    };

    match hint {
        FieldHint::List => match coerce(col, value) {
            Value::String(s) => Value::Array(s.split(',').map(|p| json!(p)).collect()),
            other => other,
        },
        FieldHint::String => match value {
            SqlValue::Text(s) => json!(s),
            SqlValue::Bytes(b) => json!(String::from_utf8_lossy(b)),
            other => {
                warn!(column = %col.name, "string hint on non-text value");
                coerce(col, other)
            }
        },
        FieldHint::Date => {
            if col.kind == ColumnKind::Number {
                if let Some(seconds) = value.as_int() {
                    return match Local.timestamp_opt(seconds, 0).single() {
                        Some(dt) => json!(dt.to_rfc3339()),
                        None => Value::Null,
                    };
                }
            }
            coerce(col, value)
        }
        FieldHint::Timestamp => coerce_as_unix_seconds(col, value),
    }
}

fn coerce_enum(col: &TableColumn, value: &SqlValue) -> Value {
    // Binlog carries the 1-based member index; dump rows carry the name.
    match value.as_int() {
        Some(n) => {
            let index = n - 1;
            if index < 0 || index as usize >= col.enum_values.len() {
                warn!(
                    column = %col.name,
                    index = n,
                    members = col.enum_values.len(),
                    "invalid enum index"
                );
                json!("")
            } else {
                json!(col.enum_values[index as usize])
            }
        }
        None => value.to_json(),
    }
}

fn coerce_set(col: &TableColumn, value: &SqlValue) -> Value {
    match value.as_int() {
        Some(bitmask) => {
            let members: Vec<&str> = col
                .set_values
                .iter()
                .enumerate()
                .filter(|(i, _)| bitmask & (1i64 << i) != 0)
                .map(|(_, s)| s.as_str())
                .collect();
            json!(members.join(","))
        }
        None => value.to_json(),
    }
}

fn coerce_bit(value: &SqlValue) -> Value {
    // Dump rows encode BIT(1) as "\x01" / "\x00".
    match value {
        SqlValue::Bytes(b) => {
            if b.as_slice() == [1] {
                json!(1)
            } else {
                json!(0)
            }
        }
        SqlValue::Text(s) => {
            if s.as_bytes() == [1] {
                json!(1)
            } else {
                json!(0)
            }
        }
        other => other.to_json(),
    }
}

fn coerce_json(value: &SqlValue) -> Value {
    let parsed = match value {
        SqlValue::Text(s) => serde_json::from_str::<Value>(s).ok(),
        SqlValue::Bytes(b) => serde_json::from_slice::<Value>(b).ok(),
        _ => None,
    };
    match parsed {
        Some(Value::Null) | None => value.to_json(),
        Some(v) => v,
    }
}

fn coerce_datetime(value: &SqlValue) -> Value {
    let text = match value {
        SqlValue::Text(s) => s.clone(),
        SqlValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        other => return other.to_json(),
    };
    match parse_local_datetime(&text) {
        Some(dt) => json!(dt.to_rfc3339()),
        // Zero dates and garbage both land here.
        None => Value::Null,
    }
}

fn coerce_date(value: &SqlValue) -> Value {
    let text = match value {
        SqlValue::Text(s) => s.clone(),
        SqlValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        other => return other.to_json(),
    };
    match NaiveDate::parse_from_str(&text, MYSQL_DATE_FORMAT) {
        Ok(date) => json!(date.format(MYSQL_DATE_FORMAT).to_string()),
        Err(_) => Value::Null,
    }
}

fn coerce_decimal(value: &SqlValue) -> Value {
    // DECIMAL arrives as text; index it numerically when it fits.
    let text = match value {
        SqlValue::Text(s) => s.as_str(),
        SqlValue::Bytes(b) => return coerce_decimal(&SqlValue::Text(String::from_utf8_lossy(b).into_owned())),
        other => return other.to_json(),
    };
    match text.parse::<f64>() {
        Ok(f) => json!(f),
        Err(_) => json!(text),
    }
}

fn coerce_as_unix_seconds(col: &TableColumn, value: &SqlValue) -> Value {
    let parsed = match col.kind {
        ColumnKind::Date | ColumnKind::DateTime | ColumnKind::Timestamp => {
            let Some(text) = text_of(value) else {
                return coerce(col, value);
            };
            parse_local_datetime(&text)
        }
        _ => return coerce(col, value),
    };

    match parsed {
        Some(dt) => json!(dt.timestamp()),
        None => {
            warn!(column = %col.name, "failed to parse field to timestamp");
            value.to_json()
        }
    }
}

fn text_of(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Text(s) => Some(s.clone()),
        SqlValue::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
        _ => None,
    }
}

/// Parse `YYYY-MM-DD HH:MM:SS` (or bare `YYYY-MM-DD`, as binlog DATE values
/// arrive) in local time. Zero dates fail the parse and yield `None`.
fn parse_local_datetime(text: &str) -> Option<chrono::DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(text, MYSQL_DATETIME_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, MYSQL_DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    Local.from_local_datetime(&naive).single()
}
