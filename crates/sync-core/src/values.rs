//! Tagged values and ordered rows.
//!
//! Rows move between the source reader, the normalizer and the target writer
//! as an ordered list of `(column, Value)` pairs. Column order is the source
//! ordinal order and is preserved end to end so generated statements list
//! columns the way the catalog does.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Exact numeric kept in its textual form
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert an untyped JSON value (audit payload field) into a `Value`.
    ///
    /// Scalars map to their natural variant; arrays and objects stay JSON.
    /// Column-aware coercion happens later in the normalizer.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::Decimal(u.to_string())
                } else {
                    n.as_f64().map(Value::Float).unwrap_or(Value::Null)
                }
            }
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Json(other.clone()),
        }
    }

    /// JSON rendering used for error-log samples.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(f.to_string())),
            Value::Json(j) => j.clone(),
            other => serde_json::Value::String(other.to_text()),
        }
    }

    /// Human readable text form; bytes render as `\x` hex.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Decimal(d) => d.clone(),
            Value::Text(s) => s.clone(),
            Value::Bytes(b) => format!("\\x{}", hex::encode(b)),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => dt.format(DATETIME_FORMAT).to_string(),
            Value::Time(t) => t.format("%H:%M:%S%.f").to_string(),
            Value::Json(j) => j.to_string(),
        }
    }

    /// Text form capped at `max_chars` characters, for log lines.
    pub fn preview(&self, max_chars: usize) -> String {
        truncate_chars(&self.to_text(), max_chars)
    }
}

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

// ============================================================================
// Row
// ============================================================================

/// Ordered mapping from column name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Builder form of [`Row::insert`].
    pub fn with(mut self, column: impl Into<String>, value: Value) -> Self {
        self.insert(column, value);
        self
    }

    /// Set a column, replacing the value in place when it already exists.
    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        let column = column.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, v)| (name.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build a row from a JSON object in the object's iteration order.
    pub fn from_json_object(object: &serde_json::Map<String, serde_json::Value>) -> Self {
        object
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v)))
            .collect()
    }

    /// JSON object of the first `max_columns` columns with long text capped
    /// at `max_chars`, used as the sample stored with quarantined rows.
    pub fn sample_json(&self, max_columns: usize, max_chars: usize) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, value) in self.fields.iter().take(max_columns) {
            let json = match value.to_json() {
                serde_json::Value::String(s) => {
                    serde_json::Value::String(truncate_chars(&s, max_chars))
                }
                other => other,
            };
            map.insert(name.clone(), json);
        }
        serde_json::Value::Object(map)
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_replaces_in_place() {
        let mut row = Row::new()
            .with("id", Value::Int(1))
            .with("name", Value::Text("a".into()));
        row.insert("id", Value::Int(2));
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["id", "name"]);
        assert_eq!(row.get("id"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_from_json_object() {
        let obj = json!({"z": 1, "a": "x", "m": null});
        let row = Row::from_json_object(obj.as_object().unwrap());
        let cols: Vec<&str> = row.columns().collect();
        assert_eq!(cols.len(), 3);
        assert_eq!(row.get("z"), Some(&Value::Int(1)));
        assert_eq!(row.get("m"), Some(&Value::Null));
    }

    #[test]
    fn test_sample_json_caps_columns_and_text() {
        let mut row = Row::new();
        for i in 0..12 {
            row.insert(format!("c{i:02}"), Value::Text("x".repeat(300)));
        }
        let sample = row.sample_json(10, 200);
        let obj = sample.as_object().unwrap();
        assert_eq!(obj.len(), 10);
        assert_eq!(obj["c00"].as_str().unwrap().len(), 200);
        assert!(!obj.contains_key("c10"));
    }

    #[test]
    fn test_preview_does_not_split_code_points() {
        let v = Value::Text("é".repeat(150));
        assert_eq!(v.preview(100).chars().count(), 100);
    }

    #[test]
    fn test_bytes_text_is_hex() {
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).to_text(), "\\xdead");
    }
}
