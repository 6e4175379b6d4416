//! MySQL incremental sync: audit log → PostgreSQL
//!
//! Unsynced audit records are drained in ascending `id` order. Each record
//! becomes one statement run in its own target transaction; the outcome is
//! written back to the audit row (`synced` on commit, `retry_count += 1` and
//! the error message on failure). Records whose `retry_count` reached the
//! configured maximum are no longer selected.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use postgresql_sink::PostgresSink;
use postgresql_types::{delete_sql, insert_sql, update_sql, TargetTable, ValueSanitizer};
use sync_core::{
    AuditRecord, ColumnDef, EventSink, Operation, Row, SyncConfig, SyncError, SyncEvent, Value,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::dispatch::ApplyQueue;
use crate::source::AuditLog;

/// Live target columns, cached for one pass.
pub type ColumnCache = HashMap<String, Vec<ColumnDef>>;

/// One record that failed to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyFailure {
    pub id: i64,
    pub table: String,
    pub operation: Operation,
    pub error: String,
}

/// Counters for one `process_pending` pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyStats {
    pub processed: usize,
    pub success: usize,
    pub failed: usize,
    /// Records handed to the work queue instead of applied inline
    pub dispatched: usize,
    pub errors: Vec<ApplyFailure>,
}

/// `WHERE` conditions for UPDATE and DELETE: the primary key pairs from
/// `record_id` when present, else every field of the pre-image.
pub fn key_conditions(record: &AuditRecord) -> Vec<(String, Value)> {
    let pairs = record.key_pairs();
    if !pairs.is_empty() {
        return pairs
            .into_iter()
            .map(|(col, raw)| {
                let value = if raw == "NULL" {
                    Value::Null
                } else {
                    Value::Text(raw)
                };
                (col, value)
            })
            .collect();
    }
    record
        .old_data
        .as_ref()
        .map(|row| {
            row.iter()
                .map(|(col, v)| (col.to_string(), v.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// Render the statement that applies `record` to `target`.
///
/// `new_data` is sanitized against the live target `columns`.
pub fn build_statement(
    record: &AuditRecord,
    target: &TargetTable,
    columns: &[ColumnDef],
    events: &dyn EventSink,
) -> Result<String, SyncError> {
    let malformed = |reason: &str| SyncError::MalformedRecord {
        id: record.id,
        reason: reason.to_string(),
    };
    let sanitizer = ValueSanitizer::new(events);
    let sanitized = |row: &Row| sanitizer.sanitize_row(&record.table_name, columns, row.clone());

    match record.operation {
        Operation::Insert => {
            let data = record
                .new_data
                .as_ref()
                .filter(|d| !d.is_empty())
                .ok_or_else(|| malformed("INSERT without new_data"))?;
            let row = sanitized(data);
            let names: Vec<&str> = row.columns().collect();
            Ok(insert_sql(target, &names, std::slice::from_ref(&row), true))
        }
        Operation::Update => {
            let data = record
                .new_data
                .as_ref()
                .filter(|d| !d.is_empty())
                .ok_or_else(|| malformed("UPDATE without new_data"))?;
            let conditions = key_conditions(record);
            if conditions.is_empty() {
                return Err(malformed("UPDATE without record_id or old_data"));
            }
            Ok(update_sql(target, &sanitized(data), &conditions))
        }
        Operation::Delete => {
            let conditions = key_conditions(record);
            if conditions.is_empty() {
                return Err(malformed("DELETE without record_id or old_data"));
            }
            Ok(delete_sql(target, &conditions))
        }
    }
}

/// Applies single audit records and records the outcome on the audit row.
pub struct RecordApplier {
    audit: Arc<dyn AuditLog>,
    sink: Arc<dyn PostgresSink>,
    events: Arc<dyn EventSink>,
}

impl RecordApplier {
    pub fn new(
        audit: Arc<dyn AuditLog>,
        sink: Arc<dyn PostgresSink>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            audit,
            sink,
            events,
        }
    }

    async fn columns(
        &self,
        table: &TargetTable,
        cache: &mut ColumnCache,
    ) -> Result<Vec<ColumnDef>> {
        if let Some(cols) = cache.get(&table.name) {
            return Ok(cols.clone());
        }
        let cols = self.sink.live_columns(table).await?;
        cache.insert(table.name.clone(), cols.clone());
        Ok(cols)
    }

    async fn apply_in_transaction(
        &self,
        record: &AuditRecord,
        cache: &mut ColumnCache,
    ) -> Result<()> {
        let target = self.sink.target(&record.table_name);
        let columns = self.columns(&target, cache).await?;
        let sql = build_statement(record, &target, &columns, self.events.as_ref())?;
        self.sink.execute_in_transaction(&[sql]).await
    }

    /// Apply `record` in one transaction, then mark it synced or failed.
    ///
    /// Returns the apply error, if any. Audit bookkeeping failures are
    /// logged and do not change the result.
    pub async fn apply(&self, record: &AuditRecord, cache: &mut ColumnCache) -> Result<(), String> {
        match self.apply_in_transaction(record, cache).await {
            Ok(()) => {
                if let Err(e) = self.audit.mark_synced(record.id).await {
                    warn!("Applied audit record {} but could not mark it synced: {e:#}", record.id);
                }
                self.events.emit(SyncEvent::RecordApplied {
                    id: record.id,
                    table: record.table_name.clone(),
                    operation: record.operation,
                });
                Ok(())
            }
            Err(e) => {
                let message = format!("{e:#}");
                if let Err(mark_err) = self.audit.mark_failed(record.id, &message).await {
                    warn!("Could not record failure of audit record {}: {mark_err:#}", record.id);
                }
                self.events.emit(SyncEvent::RecordFailed {
                    id: record.id,
                    table: record.table_name.clone(),
                    operation: record.operation,
                    error: message.clone(),
                });
                Err(message)
            }
        }
    }
}

/// Resident set size of this process in MiB, where the platform exposes it.
pub fn resident_memory_mb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024)
}

/// Summary of a daemon run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DaemonSummary {
    pub iterations: u64,
    pub processed: u64,
    pub success: u64,
    pub failed: u64,
}

/// Drains the audit log into the target.
pub struct IncrementalSync {
    audit: Arc<dyn AuditLog>,
    applier: Arc<RecordApplier>,
    config: Arc<SyncConfig>,
    queue: Option<ApplyQueue>,
    memory_gauge: fn() -> Option<u64>,
}

impl IncrementalSync {
    pub fn new(
        audit: Arc<dyn AuditLog>,
        sink: Arc<dyn PostgresSink>,
        events: Arc<dyn EventSink>,
        config: Arc<SyncConfig>,
    ) -> Self {
        let applier = Arc::new(RecordApplier::new(audit.clone(), sink, events));
        Self {
            audit,
            applier,
            config,
            queue: None,
            memory_gauge: resident_memory_mb,
        }
    }

    pub fn applier(&self) -> Arc<RecordApplier> {
        self.applier.clone()
    }

    /// Hand records to `queue` instead of applying them inline.
    pub fn with_queue(mut self, queue: ApplyQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_memory_gauge(mut self, gauge: fn() -> Option<u64>) -> Self {
        self.memory_gauge = gauge;
        self
    }

    /// One pass over up to `batch_size` pending records.
    pub async fn process_pending(&self) -> Result<ApplyStats> {
        let records = self
            .audit
            .fetch_pending(self.config.batch_size, self.config.retry.max_attempts)
            .await?;
        let mut stats = ApplyStats::default();
        let mut cache = ColumnCache::new();

        for record in records {
            stats.processed += 1;

            if let Some(queue) = &self.queue {
                if queue.dispatch(record) {
                    stats.dispatched += 1;
                }
                continue;
            }

            match self.applier.apply(&record, &mut cache).await {
                Ok(()) => stats.success += 1,
                Err(error) => {
                    stats.failed += 1;
                    stats.errors.push(ApplyFailure {
                        id: record.id,
                        table: record.table_name.clone(),
                        operation: record.operation,
                        error,
                    });
                }
            }
        }
        Ok(stats)
    }

    pub async fn stats(&self) -> Result<sync_core::AuditStats> {
        self.audit.stats(self.config.retry.max_attempts).await
    }

    /// Repeat `process_pending` every sync interval until cancelled.
    ///
    /// Fails with [`SyncError::MemoryLimitExceeded`] when resident memory
    /// passes the configured ceiling after an iteration.
    pub async fn run_daemon(&self, cancel: CancellationToken) -> Result<DaemonSummary> {
        let interval = self.config.sync_interval();
        let limit_mb = self.config.performance.memory_limit_mb;
        let mut summary = DaemonSummary::default();

        info!("Starting sync daemon (interval {interval:?}, memory limit {limit_mb} MiB)");

        while !cancel.is_cancelled() {
            summary.iterations += 1;
            match self.process_pending().await {
                Ok(stats) => {
                    summary.processed += stats.processed as u64;
                    summary.success += stats.success as u64;
                    summary.failed += stats.failed as u64;
                    let pending = match self.stats().await {
                        Ok(s) => s.pending.to_string(),
                        Err(_) => "unknown".to_string(),
                    };
                    info!(
                        "Iteration {}: processed {}, succeeded {}, failed {}, pending {pending}",
                        summary.iterations, stats.processed, stats.success, stats.failed
                    );
                }
                Err(e) => error!("Iteration {} failed: {e:#}", summary.iterations),
            }

            if let Some(used_mb) = (self.memory_gauge)() {
                if used_mb > limit_mb {
                    return Err(SyncError::MemoryLimitExceeded { used_mb, limit_mb }.into());
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!(
            "Sync daemon stopped after {} iterations: {} processed, {} succeeded, {} failed",
            summary.iterations, summary.processed, summary.success, summary.failed
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sync_core::{ColumnKind, NullEventSink};

    fn record(operation: Operation, record_id: Option<&str>) -> AuditRecord {
        AuditRecord {
            id: 1,
            table_name: "users".to_string(),
            record_id: record_id.map(str::to_string),
            operation,
            old_data: None,
            new_data: None,
            synced: false,
            synced_at: None,
            error_message: None,
            retry_count: 0,
            created_at: Utc::now(),
        }
    }

    fn users() -> TargetTable {
        TargetTable::new("public", "users")
    }

    fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", ColumnKind::Int).not_null(),
            ColumnDef::new("name", ColumnKind::VarChar).with_max_length(3),
        ]
    }

    #[test]
    fn test_insert_statement_is_sanitized_and_ignores_conflicts() {
        let mut r = record(Operation::Insert, Some("id:7"));
        r.new_data = Some(
            Row::new()
                .with("id", Value::Int(7))
                .with("name", Value::Text("alice".into())),
        );
        let sql = build_statement(&r, &users(), &columns(), &NullEventSink).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"public\".\"users\" (\"id\", \"name\") \
             VALUES (7, 'ali') ON CONFLICT DO NOTHING"
        );
    }

    #[test]
    fn test_update_uses_record_id() {
        let mut r = record(Operation::Update, Some("id:7"));
        r.new_data = Some(Row::new().with("name", Value::Text("bob".into())));
        r.old_data = Some(Row::new().with("name", Value::Text("al".into())));
        let sql = build_statement(&r, &users(), &columns(), &NullEventSink).unwrap();
        assert_eq!(
            sql,
            "UPDATE \"public\".\"users\" SET \"name\" = 'bob' WHERE \"id\" = '7'"
        );
    }

    #[test]
    fn test_delete_falls_back_to_old_data() {
        let mut r = record(Operation::Delete, None);
        r.old_data = Some(
            Row::new()
                .with("id", Value::Int(3))
                .with("name", Value::Null),
        );
        let sql = build_statement(&r, &users(), &columns(), &NullEventSink).unwrap();
        assert_eq!(
            sql,
            "DELETE FROM \"public\".\"users\" WHERE \"id\" = 3 AND \"name\" IS NULL"
        );
    }

    #[test]
    fn test_null_key_value_matches_is_null() {
        let r = record(Operation::Delete, Some("tenant:NULL,id:4"));
        assert_eq!(
            key_conditions(&r),
            vec![
                ("tenant".to_string(), Value::Null),
                ("id".to_string(), Value::Text("4".into())),
            ]
        );
    }

    #[test]
    fn test_malformed_records() {
        let insert = record(Operation::Insert, Some("id:1"));
        assert!(matches!(
            build_statement(&insert, &users(), &columns(), &NullEventSink),
            Err(SyncError::MalformedRecord { id: 1, .. })
        ));

        let mut delete = record(Operation::Delete, None);
        delete.old_data = Some(Row::new());
        assert!(matches!(
            build_statement(&delete, &users(), &columns(), &NullEventSink),
            Err(SyncError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_resident_memory_is_plausible() {
        if let Some(mb) = resident_memory_mb() {
            assert!(mb < 1024 * 1024);
        }
    }
}
