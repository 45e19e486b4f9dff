//! Column values and their SQL literal form.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};

/// A single column value, independent of the engine it was read from.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Arbitrary precision number, already in decimal text form.
    Numeric(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
    Array(Vec<SqlValue>),
}

impl SqlValue {
    /// Integer view used by cursor pagination.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Renders `value` as a literal that can be replayed in an INSERT statement.
///
/// Never fails: anything without a dedicated form is written as a quoted string.
pub fn serialize(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".into(),
        SqlValue::Bool(true) => "TRUE".into(),
        SqlValue::Bool(false) => "FALSE".into(),
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) if f.is_nan() => "'NaN'".into(),
        SqlValue::Float(f) if f.is_infinite() => {
            if *f > 0.0 {
                "'Infinity'".into()
            } else {
                "'-Infinity'".into()
            }
        }
        SqlValue::Float(f) => f.to_string(),
        SqlValue::Numeric(n) => match n.parse::<f64>() {
            Ok(f) if f.is_finite() => n.clone(),
            _ => quote(n),
        },
        SqlValue::Text(s) => quote(s),
        SqlValue::Bytes(b) => format!("E'\\\\x{}'", hex::encode(b)),
        SqlValue::Date(d) => quote(&d.format("%Y-%m-%d").to_string()),
        SqlValue::Time(t) => quote(&t.format("%H:%M:%S%.f").to_string()),
        SqlValue::Timestamp(ts) => quote(&ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        SqlValue::TimestampTz(ts) => quote(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        SqlValue::Json(json) => format!("{}::jsonb", quote(&json.to_string())),
        SqlValue::Array(items) if items.is_empty() => "'{}'".into(),
        SqlValue::Array(items) => format!(
            "ARRAY[{}]",
            items.iter().map(serialize).collect::<Vec<_>>().join(",")
        ),
    }
}
