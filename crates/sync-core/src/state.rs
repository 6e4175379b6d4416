//! Persisted backfill bookkeeping: per-table progress and quarantined batches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Backfill state of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Completed | SyncStatus::Failed)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "in_progress" => Ok(SyncStatus::InProgress),
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// One row of the progress table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub table_name: String,
    pub status: SyncStatus,
    pub total_rows: u64,
    pub synced_rows: u64,
    pub failed_rows: u64,
    /// Offset of the next batch to read
    pub last_synced_offset: u64,
    pub batch_size: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncProgress {
    /// Fresh `pending` progress for a table.
    pub fn new(table_name: impl Into<String>, total_rows: u64, batch_size: u64) -> Self {
        let now = Utc::now();
        Self {
            table_name: table_name.into(),
            status: SyncStatus::Pending,
            total_rows,
            synced_rows: 0,
            failed_rows: 0,
            last_synced_offset: 0,
            batch_size,
            started_at: None,
            completed_at: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `synced / total * 100` rounded to two decimals; 0 for empty tables.
    pub fn completion_percent(&self) -> f64 {
        if self.total_rows == 0 {
            return 0.0;
        }
        let pct = self.synced_rows as f64 / self.total_rows as f64 * 100.0;
        (pct * 100.0).round() / 100.0
    }
}

/// Counters written after every handled batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub status: SyncStatus,
    pub synced_rows: u64,
    pub failed_rows: u64,
    pub last_synced_offset: u64,
    pub error_message: Option<String>,
}

/// One quarantined batch or row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub id: i64,
    pub table_name: String,
    pub batch_offset: u64,
    pub batch_size: u64,
    pub error_message: String,
    pub failed_columns: Vec<String>,
    pub sample_data: Option<serde_json::Value>,
    pub resolved: bool,
    pub error_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Input for logging a batch error; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewErrorEntry {
    pub table_name: String,
    pub batch_offset: u64,
    pub batch_size: u64,
    pub error_message: String,
    pub failed_columns: Vec<String>,
    pub sample_data: Option<serde_json::Value>,
}

/// Maximum stored length of a batch error message, in characters.
pub const MAX_BATCH_ERROR_LEN: usize = 5000;

/// Maximum stored length of an apply error message, in characters.
pub const MAX_APPLY_ERROR_LEN: usize = 1000;
