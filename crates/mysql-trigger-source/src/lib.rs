//! MySQL trigger-based replication into PostgreSQL
//!
//! Uses an audit table fed by per-table triggers for change capture, and
//! paged reads for the initial backfill:
//!
//! - [`Discovery`] - table listing, catalog snapshots and dependency order
//! - [`ChangeTracking`] - audit table and trigger lifecycle
//! - [`FullSync`] - resumable bulk backfill with row-level fallback
//! - [`IncrementalSync`] - ordered apply of captured changes
//! - [`ApplyQueue`] - optional per-record work queue with delayed retries

mod change_tracking;
mod client;
mod dependency;
mod dispatch;
mod full_sync;
mod incremental_sync;
mod reader;
mod schema;
mod source;
pub mod testing;

pub use change_tracking::{
    audit_table_ddl, quote_mysql_ident, trigger_name, trigger_sql, ChangeTracking, TriggerReport,
};
pub use client::{new_mysql_pool, sanitize_connection_string};
pub use dependency::DependencyGraph;
pub use dispatch::{ApplyQueue, MAX_ATTEMPTS, RETRY_SCHEDULE};
pub use full_sync::{BackfillOptions, BackfillReport, FullSync, RetryReport, TableOutcome};
pub use incremental_sync::{
    build_statement, key_conditions, resident_memory_mb, ApplyFailure, ApplyStats, ColumnCache,
    DaemonSummary, IncrementalSync, RecordApplier,
};
pub use reader::{page_query, MySQLTableReader, TableReader};
pub use schema::{Discovery, MySQLCatalog, SchemaSource, TableFilter};
pub use source::{purge_synced, AuditLog, MySQLAuditLog, PurgeReport, PURGE_CHUNK_SIZE};
