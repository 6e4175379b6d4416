//! In-memory state storage implementation.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use sync_core::{
    truncate_chars, ErrorLogEntry, NewErrorEntry, ProgressUpdate, SyncProgress, SyncStatus,
    MAX_BATCH_ERROR_LEN,
};

use crate::store::{ErrorSummary, ResumePoint, StateStore};

#[derive(Debug, Default)]
struct Tables {
    progress: BTreeMap<String, SyncProgress>,
    errors: Vec<ErrorLogEntry>,
    next_error_id: i64,
}

/// In-process implementation of the `StateStore` trait.
///
/// Used by tests and whenever persistence is not wanted.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    tables: Mutex<Tables>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| anyhow::anyhow!("state store lock poisoned"))
    }

    /// Every error entry, resolved or not.
    pub fn all_errors(&self) -> Result<Vec<ErrorLogEntry>> {
        Ok(self.lock()?.errors.clone())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn progress(&self, table: &str) -> Result<Option<SyncProgress>> {
        Ok(self.lock()?.progress.get(table).cloned())
    }

    async fn all_progress(&self) -> Result<Vec<SyncProgress>> {
        Ok(self.lock()?.progress.values().cloned().collect())
    }

    async fn start_progress(
        &self,
        table: &str,
        total_rows: u64,
        batch_size: u64,
        resume: Option<ResumePoint>,
    ) -> Result<()> {
        let mut tables = self.lock()?;
        let now = Utc::now();
        let resume = resume.unwrap_or_default();
        let row = tables
            .progress
            .entry(table.to_string())
            .or_insert_with(|| SyncProgress::new(table, total_rows, batch_size));
        row.status = SyncStatus::InProgress;
        row.total_rows = total_rows;
        row.batch_size = batch_size;
        row.synced_rows = resume.synced_rows;
        row.failed_rows = resume.failed_rows;
        row.last_synced_offset = resume.offset;
        row.started_at = Some(now);
        row.completed_at = None;
        row.error_message = None;
        row.updated_at = now;
        Ok(())
    }

    async fn update_progress(&self, table: &str, update: &ProgressUpdate) -> Result<()> {
        let mut tables = self.lock()?;
        let Some(row) = tables.progress.get_mut(table) else {
            anyhow::bail!("no progress row for table {table}");
        };
        let now = Utc::now();
        row.status = update.status;
        row.synced_rows = update.synced_rows;
        row.failed_rows = update.failed_rows;
        row.last_synced_offset = update.last_synced_offset;
        row.error_message = update.error_message.clone();
        if update.status.is_terminal() {
            row.completed_at = Some(now);
        }
        row.updated_at = now;
        Ok(())
    }

    async fn reset_progress(&self, table: Option<&str>) -> Result<u64> {
        let mut tables = self.lock()?;
        match table {
            Some(name) => Ok(tables.progress.remove(name).map_or(0, |_| 1)),
            None => {
                let removed = tables.progress.len() as u64;
                tables.progress.clear();
                Ok(removed)
            }
        }
    }

    async fn log_error(&self, entry: NewErrorEntry) -> Result<()> {
        let mut tables = self.lock()?;
        let now = Utc::now();
        let message = truncate_chars(&entry.error_message, MAX_BATCH_ERROR_LEN);

        if let Some(existing) = tables.errors.iter_mut().find(|e| {
            !e.resolved && e.table_name == entry.table_name && e.batch_offset == entry.batch_offset
        }) {
            existing.error_message = message;
            existing.batch_size = entry.batch_size;
            existing.failed_columns = entry.failed_columns;
            existing.sample_data = entry.sample_data;
            existing.error_at = now;
            return Ok(());
        }

        tables.next_error_id += 1;
        let id = tables.next_error_id;
        tables.errors.push(ErrorLogEntry {
            id,
            table_name: entry.table_name,
            batch_offset: entry.batch_offset,
            batch_size: entry.batch_size,
            error_message: message,
            failed_columns: entry.failed_columns,
            sample_data: entry.sample_data,
            resolved: false,
            error_at: now,
            resolved_at: None,
        });
        Ok(())
    }

    async fn resolve_errors(&self, table: &str, batch_offset: u64) -> Result<u64> {
        let mut tables = self.lock()?;
        let now = Utc::now();
        let mut resolved = 0;
        for entry in tables
            .errors
            .iter_mut()
            .filter(|e| !e.resolved && e.table_name == table && e.batch_offset == batch_offset)
        {
            entry.resolved = true;
            entry.resolved_at = Some(now);
            resolved += 1;
        }
        Ok(resolved)
    }

    async fn unresolved_errors(&self) -> Result<Vec<ErrorLogEntry>> {
        let mut out: Vec<ErrorLogEntry> = self
            .lock()?
            .errors
            .iter()
            .filter(|e| !e.resolved)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            (a.table_name.as_str(), a.batch_offset, a.id)
                .cmp(&(b.table_name.as_str(), b.batch_offset, b.id))
        });
        Ok(out)
    }

    async fn update_error(&self, id: i64, message: &str) -> Result<()> {
        let mut tables = self.lock()?;
        if let Some(entry) = tables.errors.iter_mut().find(|e| e.id == id) {
            entry.error_message = truncate_chars(message, MAX_BATCH_ERROR_LEN);
            entry.error_at = Utc::now();
        }
        Ok(())
    }

    async fn error_summary(&self) -> Result<Vec<ErrorSummary>> {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for entry in self.lock()?.errors.iter().filter(|e| !e.resolved) {
            *counts.entry(entry.table_name.clone()).or_insert(0) += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(table_name, unresolved)| ErrorSummary {
                table_name,
                unresolved,
            })
            .collect())
    }
}
