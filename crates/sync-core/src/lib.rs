//! Core types for the MySQL to PostgreSQL replication engine.
//!
//! This crate provides the data model shared by every other crate in the
//! workspace:
//!
//! - [`ColumnKind`] - closed classification of source column types
//! - [`ColumnDef`] / [`TableSchema`] - catalog snapshots
//! - [`Value`] / [`Row`] - tagged values in ordered rows
//! - [`AuditRecord`] - change-capture audit log rows
//! - [`SyncProgress`] / [`ErrorLogEntry`] - persisted backfill bookkeeping
//! - [`SyncConfig`] - the immutable run configuration
//! - [`SyncEvent`] / [`EventSink`] - engine observability
//!
//! # Architecture
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    ├─── mysql-types           (source catalog and wire values)
//!    ├─── postgresql-types      (type mapping, sanitization, SQL rendering)
//!    ├─── checkpoint            (progress and error state store)
//!    ├─── postgresql-sink       (target writes)
//!    └─── mysql-trigger-source  (discovery, triggers, backfill, apply)
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod events;
pub mod schema;
pub mod state;
pub mod types;
pub mod values;

pub use audit::{format_record_id, parse_record_id, AuditRecord, AuditStats, Operation};
pub use config::{
    CleanupConfig, MonitoringConfig, PerformanceConfig, RetryConfig, SyncConfig, TableSelection,
};
pub use error::SyncError;
pub use events::{EventSink, NullEventSink, RecordingEventSink, SyncEvent, TracingEventSink};
pub use schema::{ColumnDef, ForeignKeyRef, TableSchema};
pub use state::{
    ErrorLogEntry, NewErrorEntry, ProgressUpdate, SyncProgress, SyncStatus, MAX_APPLY_ERROR_LEN,
    MAX_BATCH_ERROR_LEN,
};
pub use types::ColumnKind;
pub use values::{truncate_chars, Row, Value};
