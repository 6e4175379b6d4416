//! Change-capture audit records.

use crate::values::Row;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Row operation captured by a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Operation::Insert, Operation::Update, Operation::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Operation::Insert),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            other => Err(format!("unknown operation: {other}")),
        }
    }
}

/// One audit log row.
///
/// Everything but `synced`, `synced_at`, `error_message` and `retry_count` is
/// immutable after the trigger writes it; those four belong to the apply
/// executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Monotonic id; defines apply order
    pub id: i64,
    pub table_name: String,
    /// `col:value[,col:value...]` over the primary key, `None` without one
    pub record_id: Option<String>,
    pub operation: Operation,
    /// Pre-image (UPDATE, DELETE)
    pub old_data: Option<Row>,
    /// Post-image (INSERT, UPDATE)
    pub new_data: Option<Row>,
    pub synced: bool,
    pub synced_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Parsed primary key pairs from `record_id`.
    pub fn key_pairs(&self) -> Vec<(String, String)> {
        self.record_id
            .as_deref()
            .map(parse_record_id)
            .unwrap_or_default()
    }
}

/// Split `col:value[,col:value...]` into pairs.
///
/// Each segment is split on its first `:` only. The format has no escaping,
/// so a key value containing `,` is cut into a second segment; a fragment
/// without a `:` is dropped and one with a `:` becomes a bogus pair. Values
/// with a `:` survive, but a column name containing `:` does not. Tables
/// whose key values can hold these characters cannot be located reliably by
/// their record id.
pub fn parse_record_id(record_id: &str) -> Vec<(String, String)> {
    record_id
        .split(',')
        .filter_map(|segment| {
            let (col, value) = segment.split_once(':')?;
            let col = col.trim();
            if col.is_empty() {
                return None;
            }
            Some((col.to_string(), value.to_string()))
        })
        .collect()
}

/// Inverse of [`parse_record_id`].
pub fn format_record_id<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs
        .into_iter()
        .map(|(col, value)| format!("{col}:{value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Aggregate counts over the audit log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    pub total: u64,
    pub synced: u64,
    /// Not yet synced, including exhausted records
    pub pending: u64,
    /// Not synced and out of retries
    pub failed: u64,
}
