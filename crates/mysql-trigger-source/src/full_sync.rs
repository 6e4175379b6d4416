//! MySQL full sync (bulk backfill) into PostgreSQL.
//!
//! Each table is copied in offset-ordered batches:
//! MySQL Row → Row (mysql-types) → sanitized Row (postgresql-types) →
//! multi-row INSERT (postgresql-sink).
//!
//! A batch that fails as a whole is retried row by row; rows that still fail
//! after their attempts are quarantined in the error log. Progress is
//! persisted after every batch so an interrupted run can resume.

use std::sync::Arc;

use anyhow::{Context, Result};
use checkpoint::{ErrorSummary, ResumePoint, StateStore};
use postgresql_sink::{extract_failed_columns, PostgresSink};
use postgresql_types::{insert_sql, PostgreSQLDdl, TargetTable, ToDdl, ValueSanitizer};
use sync_core::{
    EventSink, NewErrorEntry, ProgressUpdate, Row, SyncConfig, SyncError, SyncEvent, SyncStatus,
    TableSchema,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::reader::TableReader;
use crate::schema::Discovery;

/// Columns and characters kept in a quarantined row's sample.
const SAMPLE_COLUMNS: usize = 10;
const SAMPLE_CHARS: usize = 200;

/// Options of one backfill run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillOptions {
    /// Only this table, without dependency ordering
    pub table: Option<String>,
    pub create_tables: bool,
    /// Rows per batch; the configured backfill batch size when `None`
    pub batch_size: Option<u64>,
    pub resume: bool,
}

/// How a table's backfill ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOutcome {
    Completed { synced: u64 },
    /// Finished with quarantined rows
    Failed { synced: u64, failed: u64 },
    /// Shutdown requested at a batch boundary
    Interrupted { offset: u64 },
    /// Target table missing and creation disabled
    Skipped { reason: String },
}

/// Result of a retry-errors pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub attempted: usize,
    pub resolved: usize,
    pub still_failing: usize,
}

/// Per-table outcomes of a full backfill.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub tables: Vec<(String, TableOutcome)>,
    pub interrupted: bool,
    /// Unresolved error entries by table after the run
    pub outstanding_errors: Vec<ErrorSummary>,
}

struct Counters {
    offset: u64,
    synced: u64,
    failed: u64,
}

/// Bulk backfill executor.
pub struct FullSync {
    discovery: Arc<Discovery>,
    reader: Arc<dyn TableReader>,
    sink: Arc<dyn PostgresSink>,
    store: Arc<dyn StateStore>,
    events: Arc<dyn EventSink>,
    config: Arc<SyncConfig>,
    cancel: CancellationToken,
}

impl FullSync {
    pub fn new(
        discovery: Arc<Discovery>,
        reader: Arc<dyn TableReader>,
        sink: Arc<dyn PostgresSink>,
        store: Arc<dyn StateStore>,
        events: Arc<dyn EventSink>,
        config: Arc<SyncConfig>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            discovery,
            reader,
            sink,
            store,
            events,
            config,
            cancel,
        }
    }

    /// Backfill the selected tables, referenced tables first.
    pub async fn run(&self, options: &BackfillOptions) -> Result<BackfillReport> {
        let tables = match &options.table {
            Some(table) => vec![table.clone()],
            None => {
                let tables = self.discovery.list_tables().await?;
                self.discovery.topological_order(&tables).await?
            }
        };
        info!("Starting initial sync for {} tables", tables.len());

        let mut report = BackfillReport::default();
        for table in tables {
            let outcome = self.sync_table(&table, options).await?;
            let interrupted = matches!(outcome, TableOutcome::Interrupted { .. });
            report.tables.push((table, outcome));
            if interrupted {
                report.interrupted = true;
                break;
            }
        }

        report.outstanding_errors = self.store.error_summary().await.unwrap_or_else(|e| {
            warn!("Could not read error summary: {e:#}");
            Vec::new()
        });
        Ok(report)
    }

    /// Ensure the target table exists, creating it when allowed.
    ///
    /// Returns false when the table is missing and creation is disabled.
    async fn prepare_target(
        &self,
        target: &TargetTable,
        schema: &TableSchema,
        create: bool,
    ) -> Result<bool> {
        if self.sink.table_exists(target).await? {
            return Ok(true);
        }
        if !create {
            return Ok(false);
        }
        let ddl = PostgreSQLDdl.to_create_table(target, schema);
        self.sink
            .execute(&ddl)
            .await
            .with_context(|| format!("Failed to create target table {target}"))?;
        info!("Created target table {target}");
        Ok(true)
    }

    /// Copy one table. Follows `pending → in_progress → completed | failed`.
    pub async fn sync_table(&self, table: &str, options: &BackfillOptions) -> Result<TableOutcome> {
        info!("Syncing table: {table}");
        let schema = self.discovery.table_schema(table).await?;
        let target = self.sink.target(table);

        if !self
            .prepare_target(&target, &schema, options.create_tables)
            .await?
        {
            let reason = SyncError::MissingTargetTable(table.to_string()).to_string();
            warn!("{reason}; enable table creation to auto-create it");
            return Ok(TableOutcome::Skipped { reason });
        }

        let total = self.reader.count_rows(table).await?;
        let batch_size = options
            .batch_size
            .unwrap_or(self.config.backfill_batch_size)
            .max(1);

        let resume = if options.resume {
            self.store.resume_point(table).await.unwrap_or_else(|e| {
                warn!("Could not read resume point for {table}: {e:#}");
                None
            })
        } else {
            None
        };
        if let Some(point) = resume {
            info!("Resuming {table} from offset {}", point.offset);
        }

        self.start_progress(table, total, batch_size, resume).await;

        let mut counters = Counters {
            offset: resume.map_or(0, |p| p.offset),
            synced: resume.map_or(0, |p| p.synced_rows),
            failed: resume.map_or(0, |p| p.failed_rows),
        };

        while counters.offset < total {
            if self.cancel.is_cancelled() {
                warn!("Shutdown requested; {table} stopped at offset {}", counters.offset);
                self.persist(table, SyncStatus::InProgress, &counters, None)
                    .await;
                return Ok(TableOutcome::Interrupted {
                    offset: counters.offset,
                });
            }

            let rows = match self
                .reader
                .fetch_page(&schema, counters.offset, batch_size)
                .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    let message = format!("{e:#}");
                    self.persist(table, SyncStatus::Failed, &counters, Some(message))
                        .await;
                    return Err(e.context(format!("Backfill of {table} aborted")));
                }
            };
            if rows.is_empty() {
                break;
            }

            self.copy_batch(&schema, &target, rows, &mut counters).await;
            counters.offset += batch_size;
            self.persist(table, SyncStatus::InProgress, &counters, None)
                .await;
        }

        let status = if counters.failed == 0 {
            SyncStatus::Completed
        } else {
            SyncStatus::Failed
        };
        self.persist(table, status, &counters, None).await;
        self.events.emit(SyncEvent::TableFinished {
            table: table.to_string(),
            status,
            synced_rows: counters.synced,
            failed_rows: counters.failed,
        });

        Ok(if counters.failed == 0 {
            TableOutcome::Completed {
                synced: counters.synced,
            }
        } else {
            TableOutcome::Failed {
                synced: counters.synced,
                failed: counters.failed,
            }
        })
    }

    fn sanitize(&self, schema: &TableSchema, rows: Vec<Row>) -> Vec<Row> {
        let sanitizer = ValueSanitizer::new(self.events.as_ref());
        rows.into_iter()
            .map(|row| sanitizer.sanitize_row(&schema.name, &schema.columns, row))
            .collect()
    }

    async fn copy_batch(
        &self,
        schema: &TableSchema,
        target: &TargetTable,
        rows: Vec<Row>,
        counters: &mut Counters,
    ) {
        let table = schema.name.as_str();
        let offset = counters.offset;
        let rows = self.sanitize(schema, rows);
        let columns = schema.column_names();

        match self
            .sink
            .execute(&insert_sql(target, &columns, &rows, false))
            .await
        {
            Ok(()) => {
                counters.synced += rows.len() as u64;
                if let Err(e) = self.store.resolve_errors(table, offset).await {
                    warn!("Could not resolve errors for {table} at {offset}: {e:#}");
                }
                self.events.emit(SyncEvent::BatchInserted {
                    table: table.to_string(),
                    offset,
                    rows: rows.len(),
                });
            }
            Err(e) => {
                self.events.emit(SyncEvent::BatchFailed {
                    table: table.to_string(),
                    offset,
                    error: format!("{e:#}"),
                });
                for (idx, row) in rows.iter().enumerate() {
                    let row_offset = offset + idx as u64;
                    match self.insert_row(target, &columns, row, row_offset).await {
                        Ok(()) => counters.synced += 1,
                        Err(message) => {
                            counters.failed += 1;
                            self.quarantine(table, row_offset, row, message).await;
                        }
                    }
                }
            }
        }
    }

    /// Insert one row, with exponential backoff between attempts.
    async fn insert_row(
        &self,
        target: &TargetTable,
        columns: &[&str],
        row: &Row,
        row_offset: u64,
    ) -> Result<(), String> {
        let attempts = self.config.retry.row_attempts.max(1);
        let sql = insert_sql(target, columns, std::slice::from_ref(row), false);
        let mut delay = self.config.row_backoff();

        for attempt in 1..=attempts {
            let error = match self.sink.execute(&sql).await {
                Ok(()) => return Ok(()),
                Err(e) => format!("{e:#}"),
            };
            if attempt == attempts {
                return Err(error);
            }
            self.events.emit(SyncEvent::RowRetry {
                table: target.name.clone(),
                offset: row_offset,
                attempt,
                error,
            });
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
        Err("no insert attempts made".to_string())
    }

    async fn quarantine(&self, table: &str, row_offset: u64, row: &Row, message: String) {
        self.events.emit(SyncEvent::RowQuarantined {
            table: table.to_string(),
            offset: row_offset,
            error: message.clone(),
        });
        let entry = NewErrorEntry {
            table_name: table.to_string(),
            batch_offset: row_offset,
            batch_size: 1,
            failed_columns: extract_failed_columns(&message),
            error_message: message,
            sample_data: Some(row.sample_json(SAMPLE_COLUMNS, SAMPLE_CHARS)),
        };
        if let Err(e) = self.store.log_error(entry).await {
            warn!("Could not log error for {table} at {row_offset}: {e:#}");
        }
    }

    async fn start_progress(
        &self,
        table: &str,
        total: u64,
        batch_size: u64,
        resume: Option<ResumePoint>,
    ) {
        if let Err(e) = self
            .store
            .start_progress(table, total, batch_size, resume)
            .await
        {
            warn!("Could not record progress start for {table}: {e:#}");
        }
    }

    async fn persist(
        &self,
        table: &str,
        status: SyncStatus,
        counters: &Counters,
        error_message: Option<String>,
    ) {
        let update = ProgressUpdate {
            status,
            synced_rows: counters.synced,
            failed_rows: counters.failed,
            last_synced_offset: counters.offset,
            error_message,
        };
        if let Err(e) = self.store.update_progress(table, &update).await {
            warn!("Could not persist progress for {table}: {e:#}");
        }
    }

    /// Re-attempt every unresolved error entry, ordered by table then offset.
    ///
    /// Only reading the entries can fail the pass; an entry whose outcome
    /// cannot be recorded is logged and counted as still failing.
    pub async fn retry_errors(&self) -> Result<RetryReport> {
        let entries = self.store.unresolved_errors().await?;
        let mut report = RetryReport::default();
        info!("Retrying {} failed batches", entries.len());

        for entry in entries {
            if self.cancel.is_cancelled() {
                warn!("Shutdown requested; stopping error retry");
                break;
            }
            report.attempted += 1;

            let outcome = self
                .retry_entry(&entry.table_name, entry.batch_offset, entry.batch_size)
                .await;
            match outcome {
                Ok(()) => match self
                    .store
                    .resolve_errors(&entry.table_name, entry.batch_offset)
                    .await
                {
                    Ok(_) => report.resolved += 1,
                    Err(e) => {
                        warn!(
                            "Retried {} at offset {} but could not mark it resolved: {e:#}",
                            entry.table_name, entry.batch_offset
                        );
                        report.still_failing += 1;
                    }
                },
                Err(e) => {
                    let message = format!("{e:#}");
                    warn!(
                        "{} at offset {} still failing: {message}",
                        entry.table_name, entry.batch_offset
                    );
                    if let Err(e) = self.store.update_error(entry.id, &message).await {
                        warn!("Could not update error entry {}: {e:#}", entry.id);
                    }
                    report.still_failing += 1;
                }
            }
        }
        Ok(report)
    }

    async fn retry_entry(&self, table: &str, offset: u64, batch_size: u64) -> Result<()> {
        let schema = self.discovery.table_schema(table).await?;
        let rows = self
            .reader
            .fetch_page(&schema, offset, batch_size.max(1))
            .await?;
        if rows.is_empty() {
            info!("No data found for {table} at offset {offset}; marking resolved");
            return Ok(());
        }
        let rows = self.sanitize(&schema, rows);
        let target = self.sink.target(table);
        self.sink
            .execute(&insert_sql(&target, &schema.column_names(), &rows, false))
            .await
    }
}
