//! Value sanitization for PostgreSQL targets.
//!
//! MySQL happily stores values PostgreSQL rejects: zero-dates, out of range
//! small integers, strings with NUL bytes, invalid UTF-8, enum values outside
//! the declared set. Every value written to the target goes through
//! [`sanitize_value`], which either converts the value into a form the target
//! column accepts or replaces it with NULL / a safe default.
//!
//! Sanitization is total and idempotent: it never fails, and sanitizing an
//! already sanitized value returns it unchanged.

use crate::ddl::{is_nullable, is_zero_date, usable_default};
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use sync_core::{truncate_chars, ColumnDef, ColumnKind, EventSink, Row, SyncEvent, Value};

/// Length of before/after previews in sanitization events.
pub const PREVIEW_CHARS: usize = 100;

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const TIME_FORMATS: [&str; 2] = ["%H:%M:%S%.f", "%H:%M"];

/// Sanitize one value for `column`.
pub fn sanitize_value(value: Value, column: &ColumnDef) -> Value {
    sanitize_checked(value, column).0
}

/// Like [`sanitize_value`], also reporting whether the content changed.
///
/// Representation-only conversions (text to date, integer to boolean) are
/// not changes; truncation, stripping and replacement are.
pub fn sanitize_checked(value: Value, column: &ColumnDef) -> (Value, bool) {
    if value.is_null() {
        if is_nullable(column) {
            return (Value::Null, false);
        }
        return (safe_default(column), true);
    }
    match coerce(&value, column) {
        Some(result) => result,
        None if is_nullable(column) => (Value::Null, true),
        None => (safe_default(column), true),
    }
}

/// Value used for NULL or invalid input on a non-nullable column.
pub fn safe_default(column: &ColumnDef) -> Value {
    usable_default(column).unwrap_or_else(|| type_default(&column.kind))
}

/// Type-specific fallback when the column declares no usable default.
pub fn type_default(kind: &ColumnKind) -> Value {
    match kind {
        ColumnKind::Bool => Value::Bool(false),
        k if k.is_integer() => Value::Int(0),
        ColumnKind::Float | ColumnKind::Double | ColumnKind::Decimal => Value::Float(0.0),
        ColumnKind::Date => Value::Date(epoch_date()),
        ColumnKind::DateTime | ColumnKind::Timestamp => {
            Value::DateTime(epoch_date().and_time(NaiveTime::default()))
        }
        ColumnKind::Time => Value::Time(NaiveTime::default()),
        ColumnKind::Enum(values) => Value::Text(values.first().cloned().unwrap_or_default()),
        ColumnKind::Json => Value::Json(serde_json::json!({})),
        ColumnKind::Blob | ColumnKind::Binary => Value::Bytes(Vec::new()),
        _ => Value::Text(String::new()),
    }
}

/// 1970-01-01
fn epoch_date() -> NaiveDate {
    NaiveDate::default()
}

/// Convert a non-null value into the column's representation.
///
/// Returns `None` when the value cannot be stored, otherwise the converted
/// value and whether its content was altered.
pub(crate) fn coerce(value: &Value, column: &ColumnDef) -> Option<(Value, bool)> {
    match &column.kind {
        ColumnKind::Bool => coerce_bool(value).map(|b| (Value::Bool(b), false)),
        k if k.is_integer() => {
            let i = coerce_int(value)?;
            if k.is_small_integer() && !(i16::MIN as i64..=i16::MAX as i64).contains(&i) {
                return None;
            }
            Some((Value::Int(i), false))
        }
        ColumnKind::Float | ColumnKind::Double => {
            coerce_float(value).map(|f| (Value::Float(f), false))
        }
        ColumnKind::Decimal => coerce_decimal(value).map(|v| (v, false)),
        ColumnKind::Date => coerce_date(value).map(|d| (Value::Date(d), false)),
        ColumnKind::DateTime | ColumnKind::Timestamp => {
            coerce_datetime(value).map(|dt| (Value::DateTime(dt), false))
        }
        ColumnKind::Time => coerce_time(value).map(|t| (Value::Time(t), false)),
        ColumnKind::Json => coerce_json(value).map(|j| (Value::Json(j), false)),
        ColumnKind::Blob | ColumnKind::Binary => Some((coerce_bytes(value), false)),
        ColumnKind::Enum(values) => {
            let (text, altered) = clean_text(value, None)?;
            if !values.is_empty() && !values.contains(&text) {
                return None;
            }
            Some((Value::Text(text), altered))
        }
        ColumnKind::Char | ColumnKind::VarChar => {
            let (text, altered) = clean_text(value, column.max_length)?;
            Some((Value::Text(text), altered))
        }
        _ => {
            let (text, altered) = clean_text(value, None)?;
            Some((Value::Text(text), altered))
        }
    }
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Int(i) => Some(*i != 0),
        Value::Float(f) if f.is_finite() => Some(*f != 0.0),
        Value::Text(s) | Value::Decimal(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "t" | "yes" | "y" | "on" => Some(true),
            "0" | "false" | "f" | "no" | "n" | "off" => Some(false),
            other => other.parse::<i64>().ok().map(|i| i != 0),
        },
        _ => None,
    }
}

fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(*b as i64),
        Value::Float(f) => integral_float(*f),
        Value::Text(s) | Value::Decimal(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral_float))
        }
        _ => None,
    }
}

fn integral_float(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn coerce_float(value: &Value) -> Option<f64> {
    let f = match value {
        Value::Float(f) => *f,
        Value::Int(i) => *i as f64,
        Value::Text(s) | Value::Decimal(s) => {
            let s = s.trim();
            if !crate::ddl::is_numeric_literal(s) {
                return None;
            }
            s.parse::<f64>().ok()?
        }
        _ => return None,
    };
    f.is_finite().then_some(f)
}

fn coerce_decimal(value: &Value) -> Option<Value> {
    match value {
        Value::Int(i) => Some(Value::Int(*i)),
        Value::Float(f) if f.is_finite() => Some(Value::Float(*f)),
        Value::Text(s) | Value::Decimal(s) => {
            let s = s.trim();
            crate::ddl::is_numeric_literal(s).then(|| Value::Decimal(s.to_string()))
        }
        _ => None,
    }
}

fn coerce_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Date(d) => Some(*d),
        Value::DateTime(dt) => Some(dt.date()),
        Value::Text(s) => {
            let s = s.trim();
            if s.is_empty() || is_zero_date(s) {
                return None;
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .or_else(|| parse_datetime(s).map(|dt| dt.date()))
        }
        _ => None,
    }
}

fn coerce_datetime(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::DateTime(dt) => Some(*dt),
        Value::Date(d) => Some(d.and_time(NaiveTime::default())),
        Value::Text(s) => {
            let s = s.trim();
            if s.is_empty() || is_zero_date(s) {
                return None;
            }
            parse_datetime(s).or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .map(|d| d.and_time(NaiveTime::default()))
            })
        }
        _ => None,
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc()))
}

fn coerce_time(value: &Value) -> Option<NaiveTime> {
    match value {
        Value::Time(t) => Some(*t),
        Value::DateTime(dt) => Some(dt.time()),
        Value::Text(s) => {
            let s = s.trim();
            TIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
        }
        _ => None,
    }
}

fn coerce_json(value: &Value) -> Option<serde_json::Value> {
    match value {
        Value::Json(j) => Some(j.clone()),
        Value::Bool(b) => Some(serde_json::Value::Bool(*b)),
        Value::Int(i) => Some(serde_json::Value::from(*i)),
        Value::Float(f) => serde_json::Number::from_f64(*f).map(serde_json::Value::Number),
        Value::Text(s) | Value::Decimal(s) => serde_json::from_str(s).ok(),
        Value::Bytes(b) => serde_json::from_slice(b).ok(),
        _ => None,
    }
}

/// Binary payloads pass through. `JSON_OBJECT` renders binary columns as
/// `base64:type<N>:<data>`, which is decoded back to bytes.
fn coerce_bytes(value: &Value) -> Value {
    match value {
        Value::Bytes(b) => Value::Bytes(b.clone()),
        Value::Text(s) => {
            if let Some(rest) = s.strip_prefix("base64:type") {
                if let Some((_, data)) = rest.split_once(':') {
                    if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(data) {
                        return Value::Bytes(decoded);
                    }
                }
            }
            Value::Bytes(s.as_bytes().to_vec())
        }
        other => Value::Bytes(other.to_text().into_bytes()),
    }
}

/// Text with NUL bytes stripped, invalid UTF-8 replaced and length capped.
fn clean_text(value: &Value, max_chars: Option<u64>) -> Option<(String, bool)> {
    let (mut text, mut altered) = match value {
        Value::Text(s) => (s.clone(), false),
        Value::Bytes(b) => match String::from_utf8(b.clone()) {
            Ok(s) => (s, false),
            Err(_) => (String::from_utf8_lossy(b).into_owned(), true),
        },
        Value::Json(j) => (j.to_string(), false),
        Value::Null => return None,
        other => (other.to_text(), false),
    };
    if text.contains('\0') {
        text = text.replace('\0', "");
        altered = true;
    }
    if let Some(max) = max_chars {
        let max = usize::try_from(max).unwrap_or(usize::MAX);
        if text.chars().count() > max {
            text = truncate_chars(&text, max);
            altered = true;
        }
    }
    Some((text, altered))
}

// ============================================================================
// Reporting wrapper
// ============================================================================

/// Sanitizes values and reports every altered one to an [`EventSink`].
pub struct ValueSanitizer<'a> {
    events: &'a dyn EventSink,
}

impl<'a> ValueSanitizer<'a> {
    pub fn new(events: &'a dyn EventSink) -> Self {
        Self { events }
    }

    pub fn sanitize(&self, table: &str, column: &ColumnDef, value: Value) -> Value {
        let original = value.clone();
        let (sanitized, altered) = sanitize_checked(value, column);
        if altered {
            self.events.emit(SyncEvent::ValueSanitized {
                table: table.to_string(),
                column: column.name.clone(),
                data_type: column.data_type.clone(),
                original: original.preview(PREVIEW_CHARS),
                sanitized: sanitized.preview(PREVIEW_CHARS),
            });
        }
        sanitized
    }

    /// Sanitize every known column of `row`; unknown columns pass through.
    pub fn sanitize_row(&self, table: &str, columns: &[ColumnDef], row: Row) -> Row {
        row.into_iter()
            .map(|(name, value)| {
                let value = match columns.iter().find(|c| c.name == name) {
                    Some(column) => self.sanitize(table, column, value),
                    None => value,
                };
                (name, value)
            })
            .collect()
    }
}
