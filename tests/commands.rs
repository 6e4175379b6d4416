//! Command handlers driven against the in-memory source and target.

use std::sync::Arc;

use checkpoint::{MemoryStateStore, StateStore};
use mysql_pg_sync::commands::{
    collect_stats, run_cleanup, run_initial, run_sync, InitialOptions, InitialOutcome, SyncOutcome,
};
use mysql_trigger_source::testing::{FakeAuditLog, FakeCatalog, FakeSink, FakeTableReader};
use mysql_trigger_source::{Discovery, FullSync, IncrementalSync, TableOutcome};
use postgresql_sink::PostgresSink;
use sync_core::{
    ColumnDef, ColumnKind, NullEventSink, Operation, Row, SyncConfig, SyncStatus, TableSchema,
    Value,
};
use tokio_util::sync::CancellationToken;

struct Fixture {
    sink: Arc<FakeSink>,
    store: Arc<MemoryStateStore>,
    full: FullSync,
}

fn items_schema() -> TableSchema {
    TableSchema::new(
        "items",
        vec![
            ColumnDef::new("id", ColumnKind::BigInt).not_null(),
            ColumnDef::new("label", ColumnKind::Text),
        ],
    )
    .with_primary_key(["id"])
}

fn fixture(rows: i64) -> Fixture {
    let config = Arc::new(SyncConfig::default());
    let catalog = Arc::new(FakeCatalog::new());
    catalog.add(items_schema());

    let reader = Arc::new(FakeTableReader::new());
    reader.set_rows(
        "items",
        (1..=rows)
            .map(|i| {
                Row::new()
                    .with("id", Value::Int(i))
                    .with("label", Value::Text(format!("item {i}")))
            })
            .collect(),
    );

    let sink = Arc::new(FakeSink::new("public"));
    let store = Arc::new(MemoryStateStore::new());
    let full = FullSync::new(
        Arc::new(Discovery::new(catalog, &config).unwrap()),
        reader,
        sink.clone(),
        store.clone(),
        Arc::new(NullEventSink),
        config,
        CancellationToken::new(),
    );
    Fixture { sink, store, full }
}

#[tokio::test]
async fn test_initial_creates_tables_and_reports_progress() {
    let f = fixture(30);
    let options = InitialOptions {
        create_tables: true,
        batch_size: Some(10),
        ..Default::default()
    };

    let outcome = run_initial(&f.full, f.sink.as_ref(), f.store.as_ref(), &options)
        .await
        .unwrap();
    let InitialOutcome::Backfilled { report, progress } = &outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert_eq!(
        report.tables,
        vec![("items".to_string(), TableOutcome::Completed { synced: 30 })]
    );
    assert_eq!(progress.by_status.get("completed"), Some(&1));
    assert!(progress.incomplete.is_empty());

    let text = outcome.to_string();
    assert!(text.contains("items"));
    assert!(text.contains("No outstanding errors."));
}

#[tokio::test]
async fn test_drop_target_requires_confirmation() {
    let f = fixture(1);
    f.sink.add_table("items", items_schema().columns);
    let options = InitialOptions {
        drop_target: true,
        ..Default::default()
    };

    let err = run_initial(&f.full, f.sink.as_ref(), f.store.as_ref(), &options)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("--yes"));
    assert_eq!(f.sink.list_tables().await.unwrap(), vec!["items"]);

    let confirmed = InitialOptions {
        drop_target: true,
        yes: true,
        create_tables: true,
        ..Default::default()
    };
    run_initial(&f.full, f.sink.as_ref(), f.store.as_ref(), &confirmed)
        .await
        .unwrap();
    assert!(f.sink.executed()[0].starts_with("CREATE TABLE"));
}

#[tokio::test]
async fn test_reset_progress_returns_early() {
    let f = fixture(5);
    f.store.start_progress("items", 5, 10, None).await.unwrap();

    let options = InitialOptions {
        reset_progress: true,
        retry_errors: true,
        create_tables: true,
        ..Default::default()
    };
    let outcome = run_initial(&f.full, f.sink.as_ref(), f.store.as_ref(), &options)
        .await
        .unwrap();

    assert_eq!(outcome, InitialOutcome::ProgressReset { removed: 1 });
    assert!(f.store.progress("items").await.unwrap().is_none());
    assert!(f.sink.executed().is_empty());
}

#[tokio::test]
async fn test_retry_errors_without_entries() {
    let f = fixture(5);
    let options = InitialOptions {
        retry_errors: true,
        ..Default::default()
    };
    let outcome = run_initial(&f.full, f.sink.as_ref(), f.store.as_ref(), &options)
        .await
        .unwrap();
    let InitialOutcome::Retried(report) = outcome else {
        panic!("expected a retry report");
    };
    assert_eq!(report.attempted, 0);
}

#[tokio::test]
async fn test_stats_and_cleanup() {
    let f = fixture(5);
    f.sink.add_table("items", items_schema().columns);
    f.full
        .sync_table("items", &Default::default())
        .await
        .unwrap();

    let audit = FakeAuditLog::new();
    let old = audit.push(Operation::Delete, "items", Some("id:1"), None);
    audit.set_synced(old, chrono::Utc::now() - chrono::Duration::days(10));
    audit.push(Operation::Insert, "items", Some("id:6"), None);

    let stats = collect_stats(&audit, f.store.as_ref(), 3).await.unwrap();
    assert_eq!(stats.audit.total, 2);
    assert_eq!(stats.audit.synced, 1);
    assert_eq!(stats.audit.pending, 1);
    assert_eq!(stats.progress.by_status.get("completed"), Some(&1));
    assert!(stats.to_string().contains("Pending:  1"));

    let dry = run_cleanup(&audit, 7, true).await.unwrap();
    assert_eq!((dry.eligible, dry.deleted), (1, 0));
    let report = run_cleanup(&audit, 7, false).await.unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(audit.len(), 1);

    let progress = f.store.progress("items").await.unwrap().unwrap();
    assert_eq!(progress.status, SyncStatus::Completed);
}

#[tokio::test]
async fn test_sync_once_through_queue() {
    let mut config = SyncConfig::default();
    config.performance.use_queue = true;

    let audit = Arc::new(FakeAuditLog::new());
    let sink = Arc::new(FakeSink::new("public"));
    sink.add_table("items", items_schema().columns);
    for i in 1..=3 {
        audit.push(
            Operation::Insert,
            "items",
            Some(&format!("id:{i}")),
            Some(Row::new().with("id", Value::Int(i))),
        );
    }

    let sync = IncrementalSync::new(
        audit.clone(),
        sink.clone(),
        Arc::new(NullEventSink),
        Arc::new(config.clone()),
    );
    let outcome = run_sync(
        sync,
        &config,
        Arc::new(NullEventSink),
        false,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let SyncOutcome::Once(stats) = &outcome else {
        panic!("expected a single pass");
    };
    assert_eq!(stats.dispatched, 3);
    assert_eq!(sink.executed_matching("INSERT INTO").len(), 3);
    for id in 1..=3 {
        assert!(audit.get(id).unwrap().synced);
    }
    assert!(outcome.to_string().contains("Dispatched: 3"));
}
