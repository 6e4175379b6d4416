//! Reverse conversion: MySQL wire values → [`sync_core::Value`].
//!
//! Conversion never rejects a value. Anything that does not fit the column
//! kind is carried as text (or raw bytes when it is not valid UTF-8) and left
//! for the normalizer to repair or replace.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use mysql_async::Value as MySQLValue;
use sync_core::{ColumnKind, Row, TableSchema, Value};
use thiserror::Error;

/// Error during MySQL value conversion.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Row has {actual} columns, expected {expected}")]
    ColumnCount { expected: usize, actual: usize },
    #[error("Type mismatch: expected {expected}, got {actual:?}")]
    TypeMismatch {
        expected: String,
        actual: MySQLValue,
    },
    #[error("Invalid date/time value")]
    InvalidDateTime,
}

/// Convert one wire value for a column of `kind`.
pub fn from_mysql_value(value: MySQLValue, kind: &ColumnKind) -> Value {
    match value {
        MySQLValue::NULL => Value::Null,
        MySQLValue::Int(i) => Value::Int(i),
        MySQLValue::UInt(u) => match i64::try_from(u) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Decimal(u.to_string()),
        },
        MySQLValue::Float(f) => Value::Float(f as f64),
        MySQLValue::Double(d) => Value::Float(d),
        MySQLValue::Bytes(bytes) => from_bytes(bytes, kind),
        MySQLValue::Date(year, month, day, hour, min, sec, micro) => {
            if year == 0 && month == 0 && day == 0 {
                // Zero-dates keep their text form so the normalizer sees them.
                return Value::Text(match kind {
                    ColumnKind::Date => "0000-00-00".to_string(),
                    _ => "0000-00-00 00:00:00".to_string(),
                });
            }
            let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32);
            let time = NaiveTime::from_hms_micro_opt(hour as u32, min as u32, sec as u32, micro);
            match (kind, date, time) {
                (ColumnKind::Date, Some(d), _) => Value::Date(d),
                (_, Some(d), Some(t)) => Value::DateTime(NaiveDateTime::new(d, t)),
                _ => Value::Text(format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{min:02}:{sec:02}"
                )),
            }
        }
        MySQLValue::Time(negative, days, hours, minutes, seconds, micros) => {
            let total_hours = days * 24 + hours as u32;
            if !negative && total_hours < 24 {
                if let Some(t) = NaiveTime::from_hms_micro_opt(
                    total_hours,
                    minutes as u32,
                    seconds as u32,
                    micros,
                ) {
                    return Value::Time(t);
                }
            }
            // Durations outside a time of day stay textual.
            let sign = if negative { "-" } else { "" };
            Value::Text(format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}"))
        }
    }
}

/// Text-protocol and binary-string payloads.
fn from_bytes(bytes: Vec<u8>, kind: &ColumnKind) -> Value {
    if kind.is_binary() {
        return Value::Bytes(bytes);
    }
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        // Invalid sequences are repaired by the normalizer.
        Err(e) => return Value::Bytes(e.into_bytes()),
    };
    match kind {
        k if k.is_integer() => text
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .unwrap_or(Value::Text(text)),
        ColumnKind::Float | ColumnKind::Double => text
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or(Value::Text(text)),
        ColumnKind::Decimal => Value::Decimal(text),
        ColumnKind::Json => serde_json::from_str(&text)
            .map(Value::Json)
            .unwrap_or(Value::Text(text)),
        _ => Value::Text(text),
    }
}

/// Convert a result row whose columns follow `schema.columns` order.
pub fn row_from_mysql(row: mysql_async::Row, schema: &TableSchema) -> Result<Row, ConversionError> {
    let values = row.unwrap_raw();
    if values.len() != schema.columns.len() {
        return Err(ConversionError::ColumnCount {
            expected: schema.columns.len(),
            actual: values.len(),
        });
    }
    let mut out = Row::with_capacity(values.len());
    for (column, value) in schema.columns.iter().zip(values) {
        let value = value.unwrap_or(MySQLValue::NULL);
        out.insert(column.name.clone(), from_mysql_value(value, &column.kind));
    }
    Ok(out)
}

/// Read a `DATETIME`/`TIMESTAMP` value such as a bookkeeping timestamp.
pub fn mysql_datetime(value: &MySQLValue) -> Result<NaiveDateTime, ConversionError> {
    match value {
        MySQLValue::Date(year, month, day, hour, min, sec, micro) => {
            let date = NaiveDate::from_ymd_opt(*year as i32, *month as u32, *day as u32)
                .ok_or(ConversionError::InvalidDateTime)?;
            let time =
                NaiveTime::from_hms_micro_opt(*hour as u32, *min as u32, *sec as u32, *micro)
                    .ok_or(ConversionError::InvalidDateTime)?;
            Ok(NaiveDateTime::new(date, time))
        }
        MySQLValue::Bytes(b) => {
            let s = std::str::from_utf8(b).map_err(|_| ConversionError::InvalidDateTime)?;
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
                .map_err(|_| ConversionError::InvalidDateTime)
        }
        other => Err(ConversionError::TypeMismatch {
            expected: "datetime".to_string(),
            actual: other.clone(),
        }),
    }
}
