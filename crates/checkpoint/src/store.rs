//! Progress and error state storage trait and types
//!
//! This module defines the `StateStore` trait for backend-agnostic access to
//! the backfill bookkeeping: one progress row per table and the error
//! quarantine log.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use sync_core::{ErrorLogEntry, NewErrorEntry, ProgressUpdate, SyncProgress, SyncStatus};

/// Where an interrupted backfill picks up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    /// Offset of the next batch to read
    pub offset: u64,
    pub synced_rows: u64,
    pub failed_rows: u64,
}

impl ResumePoint {
    pub fn from_progress(progress: &SyncProgress) -> Self {
        Self {
            offset: progress.last_synced_offset,
            synced_rows: progress.synced_rows,
            failed_rows: progress.failed_rows,
        }
    }
}

/// Unresolved error count for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub table_name: String,
    pub unresolved: u64,
}

/// Trait for backfill state storage.
///
/// Implementations:
/// - `MemoryStateStore` - in-process, for tests and dry runs
/// - `MySQLStateStore` - bookkeeping tables on the source database
///
/// Writes are last-writer-wins per table.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Progress row for one table.
    async fn progress(&self, table: &str) -> Result<Option<SyncProgress>>;

    /// Every progress row, ordered by table name.
    async fn all_progress(&self) -> Result<Vec<SyncProgress>>;

    /// Create or overwrite the progress row at backfill start.
    ///
    /// The row is `in_progress` with `started_at = now`; counters and offset
    /// come from `resume` or start at zero.
    async fn start_progress(
        &self,
        table: &str,
        total_rows: u64,
        batch_size: u64,
        resume: Option<ResumePoint>,
    ) -> Result<()>;

    /// Persist counters after a batch or at completion. Terminal statuses
    /// also stamp `completed_at`.
    async fn update_progress(&self, table: &str, update: &ProgressUpdate) -> Result<()>;

    /// Delete one table's progress, or all progress when `table` is `None`.
    /// Returns the number of rows removed.
    async fn reset_progress(&self, table: Option<&str>) -> Result<u64>;

    /// Record a failed batch. An unresolved entry for the same
    /// `(table, batch_offset)` is updated in place instead of duplicated.
    async fn log_error(&self, entry: NewErrorEntry) -> Result<()>;

    /// Mark every unresolved entry for `(table, batch_offset)` resolved.
    async fn resolve_errors(&self, table: &str, batch_offset: u64) -> Result<u64>;

    /// Unresolved entries ordered by table then offset.
    async fn unresolved_errors(&self) -> Result<Vec<ErrorLogEntry>>;

    /// Replace an entry's message and refresh its `error_at`.
    async fn update_error(&self, id: i64, message: &str) -> Result<()>;

    /// Unresolved entry counts grouped by table.
    async fn error_summary(&self) -> Result<Vec<ErrorSummary>>;

    /// Offset and counters of a non-completed progress row.
    async fn resume_point(&self, table: &str) -> Result<Option<ResumePoint>> {
        Ok(self
            .progress(table)
            .await?
            .filter(|p| p.status != SyncStatus::Completed)
            .map(|p| ResumePoint::from_progress(&p)))
    }
}

/// Progress rows grouped for reporting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSummary {
    pub by_status: BTreeMap<String, u64>,
    /// Tables not yet completed, with completion percentage
    pub incomplete: Vec<(String, SyncStatus, f64)>,
}

impl ProgressSummary {
    pub fn from_progress(rows: &[SyncProgress]) -> Self {
        let mut summary = Self::default();
        for row in rows {
            *summary
                .by_status
                .entry(row.status.as_str().to_string())
                .or_insert(0) += 1;
            if row.status != SyncStatus::Completed {
                summary.incomplete.push((
                    row.table_name.clone(),
                    row.status,
                    row.completion_percent(),
                ));
            }
        }
        summary
    }
}
