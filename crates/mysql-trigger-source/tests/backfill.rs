//! Backfill behaviour against in-memory source and target.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use checkpoint::{ErrorSummary, MemoryStateStore, ResumePoint, StateStore};
use mysql_trigger_source::testing::{FakeCatalog, FakeSink, FakeTableReader};
use mysql_trigger_source::{BackfillOptions, Discovery, FullSync, TableOutcome};
use postgresql_sink::PostgresSink;
use sync_core::{
    ColumnDef, ColumnKind, ErrorLogEntry, NewErrorEntry, ProgressUpdate, RecordingEventSink, Row,
    SyncConfig, SyncEvent, SyncProgress, SyncStatus, TableSchema, Value,
};
use tokio_util::sync::CancellationToken;

struct Harness {
    reader: Arc<FakeTableReader>,
    sink: Arc<FakeSink>,
    store: Arc<MemoryStateStore>,
    events: Arc<RecordingEventSink>,
    discovery: Arc<Discovery>,
    config: Arc<SyncConfig>,
    cancel: CancellationToken,
    sync: FullSync,
}

impl Harness {
    /// A second executor over the same source and target.
    fn full_sync(&self, store: Arc<dyn StateStore>, cancel: CancellationToken) -> FullSync {
        FullSync::new(
            self.discovery.clone(),
            self.reader.clone(),
            self.sink.clone(),
            store,
            self.events.clone(),
            self.config.clone(),
            cancel,
        )
    }
}

/// Memory store whose `resolve_errors` fails a set number of times.
struct FlakyStore {
    inner: Arc<MemoryStateStore>,
    resolve_failures: AtomicUsize,
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn progress(&self, table: &str) -> Result<Option<SyncProgress>> {
        self.inner.progress(table).await
    }

    async fn all_progress(&self) -> Result<Vec<SyncProgress>> {
        self.inner.all_progress().await
    }

    async fn start_progress(
        &self,
        table: &str,
        total_rows: u64,
        batch_size: u64,
        resume: Option<ResumePoint>,
    ) -> Result<()> {
        self.inner
            .start_progress(table, total_rows, batch_size, resume)
            .await
    }

    async fn update_progress(&self, table: &str, update: &ProgressUpdate) -> Result<()> {
        self.inner.update_progress(table, update).await
    }

    async fn reset_progress(&self, table: Option<&str>) -> Result<u64> {
        self.inner.reset_progress(table).await
    }

    async fn log_error(&self, entry: NewErrorEntry) -> Result<()> {
        self.inner.log_error(entry).await
    }

    async fn resolve_errors(&self, table: &str, batch_offset: u64) -> Result<u64> {
        let left = self.resolve_failures.load(Ordering::SeqCst);
        if left > 0 {
            self.resolve_failures.store(left - 1, Ordering::SeqCst);
            return Err(anyhow!("Lock wait timeout exceeded; try restarting transaction"));
        }
        self.inner.resolve_errors(table, batch_offset).await
    }

    async fn unresolved_errors(&self) -> Result<Vec<ErrorLogEntry>> {
        self.inner.unresolved_errors().await
    }

    async fn update_error(&self, id: i64, message: &str) -> Result<()> {
        self.inner.update_error(id, message).await
    }

    async fn error_summary(&self) -> Result<Vec<ErrorSummary>> {
        self.inner.error_summary().await
    }
}

fn users_schema() -> TableSchema {
    TableSchema::new(
        "users",
        vec![
            ColumnDef::new("id", ColumnKind::Int).not_null(),
            ColumnDef::new("email", ColumnKind::VarChar)
                .with_max_length(50)
                .not_null(),
        ],
    )
    .with_primary_key(["id"])
}

fn orders_schema() -> TableSchema {
    TableSchema::new(
        "orders",
        vec![
            ColumnDef::new("id", ColumnKind::Int).not_null(),
            ColumnDef::new("user_id", ColumnKind::Int),
        ],
    )
    .with_primary_key(["id"])
    .with_foreign_key("user_id", "users", "id")
}

fn user_rows(n: i64) -> Vec<Row> {
    (1..=n)
        .map(|i| {
            Row::new()
                .with("id", Value::Int(i))
                .with("email", Value::Text(format!("u{i}@example.com")))
        })
        .collect()
}

fn harness(users: i64) -> Harness {
    let catalog = Arc::new(FakeCatalog::new());
    catalog.add(users_schema());
    catalog.add(orders_schema());

    let reader = Arc::new(FakeTableReader::new());
    reader.set_rows("users", user_rows(users));
    reader.set_rows(
        "orders",
        vec![Row::new()
            .with("id", Value::Int(1))
            .with("user_id", Value::Int(1))],
    );

    let sink = Arc::new(FakeSink::new("public"));
    sink.add_table("users", users_schema().columns);
    sink.add_table("orders", orders_schema().columns);

    let config = Arc::new(SyncConfig::default());
    let store = Arc::new(MemoryStateStore::new());
    let events = Arc::new(RecordingEventSink::new());
    let cancel = CancellationToken::new();
    let discovery = Arc::new(Discovery::new(catalog, &config).unwrap());

    let sync = FullSync::new(
        discovery.clone(),
        reader.clone(),
        sink.clone(),
        store.clone(),
        events.clone(),
        config.clone(),
        cancel.clone(),
    );
    Harness {
        reader,
        sink,
        store,
        events,
        discovery,
        config,
        cancel,
        sync,
    }
}

fn batch_of(size: u64) -> BackfillOptions {
    BackfillOptions {
        batch_size: Some(size),
        ..Default::default()
    }
}

// =============================================================================
// Batches and row fallback
// =============================================================================

#[tokio::test]
async fn test_table_copied_in_batches() {
    let h = harness(250);
    let outcome = h.sync.sync_table("users", &batch_of(100)).await.unwrap();

    assert_eq!(outcome, TableOutcome::Completed { synced: 250 });
    assert_eq!(h.sink.executed_matching("INSERT INTO").len(), 3);

    let progress = h.store.progress("users").await.unwrap().unwrap();
    assert_eq!(progress.status, SyncStatus::Completed);
    assert_eq!(progress.synced_rows, 250);
    assert_eq!(progress.total_rows, 250);
    assert!(progress.completed_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_failed_batch_falls_back_to_rows() {
    let h = harness(250);
    // Second batch starts at id 101; only the multi-row insert fails.
    h.sink.fail_times(
        "VALUES (101, ",
        "SQLSTATE[40P01]: deadlock detected",
        1,
    );

    let outcome = h.sync.sync_table("users", &batch_of(100)).await.unwrap();

    assert_eq!(outcome, TableOutcome::Completed { synced: 250 });
    // 3 batches attempted, 2 accepted, then 100 single-row inserts.
    assert_eq!(h.sink.executed_matching("INSERT INTO").len(), 102);
    assert!(h
        .events
        .events()
        .iter()
        .any(|e| matches!(e, SyncEvent::BatchFailed { offset: 100, .. })));
    assert!(h.store.unresolved_errors().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_persistently_failing_row_is_quarantined_then_retried() {
    let h = harness(250);
    h.sink.fail_when(
        "'u150@example.com'",
        "SQLSTATE[23514]: new row violates check constraint DETAIL: Failing row (column \"email\")",
    );

    let outcome = h.sync.sync_table("users", &batch_of(100)).await.unwrap();
    assert_eq!(
        outcome,
        TableOutcome::Failed {
            synced: 249,
            failed: 1
        }
    );

    let retries = h
        .events
        .events()
        .into_iter()
        .filter(|e| matches!(e, SyncEvent::RowRetry { offset: 149, .. }))
        .count();
    assert_eq!(retries, 2);

    let errors = h.store.unresolved_errors().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].batch_offset, 149);
    assert_eq!(errors[0].batch_size, 1);
    assert_eq!(errors[0].failed_columns, vec!["email".to_string()]);
    assert_eq!(
        errors[0].sample_data.as_ref().unwrap()["email"],
        "u150@example.com"
    );

    let progress = h.store.progress("users").await.unwrap().unwrap();
    assert_eq!(progress.status, SyncStatus::Failed);
    assert_eq!(progress.failed_rows, 1);

    h.sink.clear_failures();
    let report = h.sync.retry_errors().await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(report.resolved, 1);
    assert!(h.store.unresolved_errors().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retry_that_still_fails_updates_the_entry() {
    let h = harness(10);
    h.sink.fail_when("'u3@example.com'", "SQLSTATE[23505]: duplicate key");
    h.sync.sync_table("users", &batch_of(10)).await.unwrap();

    h.sink.clear_failures();
    h.sink.fail_when("'u3@example.com'", "SQLSTATE[22001]: value too long");
    let report = h.sync.retry_errors().await.unwrap();
    assert_eq!(report.still_failing, 1);

    let errors = h.store.unresolved_errors().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].error_message.contains("value too long"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_continues_past_bookkeeping_failure() {
    let h = harness(10);
    h.sink.fail_when("'u3@example.com'", "SQLSTATE[23505]: duplicate key");
    h.sink.fail_when("'u7@example.com'", "SQLSTATE[23505]: duplicate key");
    h.sync.sync_table("users", &batch_of(10)).await.unwrap();
    assert_eq!(h.store.unresolved_errors().await.unwrap().len(), 2);

    h.sink.clear_failures();
    let flaky = Arc::new(FlakyStore {
        inner: h.store.clone(),
        resolve_failures: AtomicUsize::new(1),
    });
    let retry = h.full_sync(flaky, CancellationToken::new());

    let report = retry.retry_errors().await.unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.resolved, 1);
    assert_eq!(report.still_failing, 1);

    let left = h.store.unresolved_errors().await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].batch_offset, 2);

    let report = retry.retry_errors().await.unwrap();
    assert_eq!(report.resolved, 1);
    assert!(h.store.unresolved_errors().await.unwrap().is_empty());
}

// =============================================================================
// Resume, interruption and failures
// =============================================================================

#[tokio::test]
async fn test_interrupted_run_resumes_without_gaps_or_duplicates() {
    let h = harness(250);
    h.reader.cancel_after_pages(2, h.cancel.clone());

    let first = h.sync.sync_table("users", &batch_of(100)).await.unwrap();
    assert_eq!(first, TableOutcome::Interrupted { offset: 200 });
    let progress = h.store.progress("users").await.unwrap().unwrap();
    assert_eq!(progress.status, SyncStatus::InProgress);
    assert_eq!(progress.last_synced_offset, 200);

    let options = BackfillOptions {
        resume: true,
        ..batch_of(100)
    };
    let resumed = h
        .full_sync(h.store.clone(), CancellationToken::new())
        .sync_table("users", &options)
        .await
        .unwrap();
    assert_eq!(resumed, TableOutcome::Completed { synced: 250 });

    let inserts = h.sink.executed_matching("INSERT INTO");
    assert_eq!(inserts.len(), 3);
    for i in 1..=250 {
        let email = format!("'u{i}@example.com'");
        let copies: usize = inserts.iter().map(|sql| sql.matches(&email).count()).sum();
        assert_eq!(copies, 1, "row {i} copied {copies} times");
    }
}

#[tokio::test]
async fn test_resume_continues_from_last_offset() {
    let h = harness(250);
    h.store
        .start_progress("users", 250, 100, None)
        .await
        .unwrap();
    h.store
        .update_progress(
            "users",
            &ProgressUpdate {
                status: SyncStatus::InProgress,
                synced_rows: 200,
                failed_rows: 0,
                last_synced_offset: 200,
                error_message: None,
            },
        )
        .await
        .unwrap();

    let options = BackfillOptions {
        resume: true,
        ..batch_of(100)
    };
    let outcome = h.sync.sync_table("users", &options).await.unwrap();

    assert_eq!(outcome, TableOutcome::Completed { synced: 250 });
    let inserts = h.sink.executed_matching("INSERT INTO");
    assert_eq!(inserts.len(), 1);
    assert!(inserts[0].contains("VALUES (201, "));
}

#[tokio::test]
async fn test_completed_table_is_not_resumed() {
    let h = harness(20);
    h.sync.sync_table("users", &batch_of(10)).await.unwrap();
    assert_eq!(h.store.resume_point("users").await.unwrap(), None::<ResumePoint>);
}

#[tokio::test]
async fn test_cancellation_stops_at_batch_boundary() {
    let h = harness(250);
    h.cancel.cancel();

    let report = h.sync.run(&batch_of(100)).await.unwrap();
    assert!(report.interrupted);
    assert_eq!(
        report.tables,
        vec![("users".to_string(), TableOutcome::Interrupted { offset: 0 })]
    );
    let progress = h.store.progress("users").await.unwrap().unwrap();
    assert_eq!(progress.status, SyncStatus::InProgress);
}

#[tokio::test]
async fn test_read_failure_marks_table_failed() {
    let h = harness(250);
    h.reader.fail_fetch_at("users", 100);

    let err = h.sync.sync_table("users", &batch_of(100)).await.unwrap_err();
    assert!(format!("{err:#}").contains("Lost connection"));

    let progress = h.store.progress("users").await.unwrap().unwrap();
    assert_eq!(progress.status, SyncStatus::Failed);
    assert_eq!(progress.last_synced_offset, 100);
    assert!(progress.error_message.unwrap().contains("Lost connection"));
}

#[tokio::test]
async fn test_empty_table_completes_immediately() {
    let h = harness(0);
    let outcome = h.sync.sync_table("users", &batch_of(100)).await.unwrap();
    assert_eq!(outcome, TableOutcome::Completed { synced: 0 });
    assert!(h.sink.executed_matching("INSERT INTO").is_empty());
}

// =============================================================================
// Target tables and ordering
// =============================================================================

#[tokio::test]
async fn test_missing_target_table() {
    let h = harness(5);
    h.sink.drop_all_tables().await.unwrap();

    let outcome = h.sync.sync_table("users", &batch_of(100)).await.unwrap();
    assert!(matches!(outcome, TableOutcome::Skipped { .. }));
    assert!(h.sink.executed().is_empty());

    let options = BackfillOptions {
        create_tables: true,
        ..batch_of(100)
    };
    let outcome = h.sync.sync_table("users", &options).await.unwrap();
    assert_eq!(outcome, TableOutcome::Completed { synced: 5 });
    assert!(h.sink.executed()[0].starts_with("CREATE TABLE IF NOT EXISTS \"public\".\"users\""));
}

#[tokio::test]
async fn test_referenced_tables_are_copied_first() {
    let h = harness(3);
    let report = h.sync.run(&batch_of(100)).await.unwrap();

    let order: Vec<&str> = report.tables.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(order, vec!["users", "orders"]);
    assert!(!report.interrupted);
    assert!(report.outstanding_errors.is_empty());
}
