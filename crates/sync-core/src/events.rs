//! Engine events and the sinks that observe them.
//!
//! Executors report what they do through an [`EventSink`] instead of
//! writing log lines directly. The binary installs [`TracingEventSink`];
//! tests install [`RecordingEventSink`] and assert on the captured events.

use crate::audit::Operation;
use crate::state::SyncStatus;
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A value was changed to fit the target column
    ValueSanitized {
        table: String,
        column: String,
        data_type: String,
        original: String,
        sanitized: String,
    },
    BatchInserted {
        table: String,
        offset: u64,
        rows: usize,
    },
    /// Batch insert failed; rows are retried one by one
    BatchFailed {
        table: String,
        offset: u64,
        error: String,
    },
    RowRetry {
        table: String,
        offset: u64,
        attempt: u32,
        error: String,
    },
    /// Row exhausted its attempts and was written to the error log
    RowQuarantined {
        table: String,
        offset: u64,
        error: String,
    },
    TableFinished {
        table: String,
        status: SyncStatus,
        synced_rows: u64,
        failed_rows: u64,
    },
    RecordApplied {
        id: i64,
        table: String,
        operation: Operation,
    },
    RecordFailed {
        id: i64,
        table: String,
        operation: Operation,
        error: String,
    },
    /// Queued record failed on its final attempt
    RecordAbandoned {
        id: i64,
        table: String,
        attempts: u32,
        error: String,
    },
}

/// Observer for engine events. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SyncEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy)]
pub struct TracingEventSink {
    /// When false, per-value and per-record events are dropped
    pub verbose: bool,
}

impl TracingEventSink {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Default for TracingEventSink {
    fn default() -> Self {
        Self::new(true)
    }
}

impl EventSink for TracingEventSink {
    fn emit(&self, event: SyncEvent) {
        match event {
            SyncEvent::ValueSanitized {
                table,
                column,
                data_type,
                original,
                sanitized,
            } => {
                if self.verbose {
                    info!(
                        "[SANITIZE] {table}.{column} ({data_type}): '{original}' -> '{sanitized}'"
                    );
                }
            }
            SyncEvent::BatchInserted {
                table,
                offset,
                rows,
            } => {
                info!("Inserted {rows} rows into {table} at offset {offset}");
            }
            SyncEvent::BatchFailed {
                table,
                offset,
                error,
            } => {
                warn!(
                    "Batch insert into {table} at offset {offset} failed, \
                     retrying row by row: {error}"
                );
            }
            SyncEvent::RowRetry {
                table,
                offset,
                attempt,
                error,
            } => {
                warn!("Row {offset} of {table} failed (attempt {attempt}): {error}");
            }
            SyncEvent::RowQuarantined {
                table,
                offset,
                error,
            } => {
                warn!("Row {offset} of {table} quarantined: {error}");
            }
            SyncEvent::TableFinished {
                table,
                status,
                synced_rows,
                failed_rows,
            } => {
                info!(
                    "Table {table} finished as {status}: \
                     {synced_rows} synced, {failed_rows} failed"
                );
            }
            SyncEvent::RecordApplied {
                id,
                table,
                operation,
            } => {
                if self.verbose {
                    info!("Applied audit record {id} ({operation} on {table})");
                }
            }
            SyncEvent::RecordFailed {
                id,
                table,
                operation,
                error,
            } => {
                warn!("Audit record {id} ({operation} on {table}) failed: {error}");
            }
            SyncEvent::RecordAbandoned {
                id,
                table,
                attempts,
                error,
            } => {
                tracing::error!(
                    "Audit record {id} on {table} permanently failed \
                     after {attempts} attempts: {error}"
                );
            }
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: SyncEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Count of events matching `pred`.
    pub fn count(&self, pred: impl Fn(&SyncEvent) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: SyncEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_captures_in_order() {
        let sink = RecordingEventSink::new();
        sink.emit(SyncEvent::BatchInserted {
            table: "t".into(),
            offset: 0,
            rows: 10,
        });
        sink.emit(SyncEvent::BatchFailed {
            table: "t".into(),
            offset: 10,
            error: "boom".into(),
        });
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], SyncEvent::BatchFailed { offset: 10, .. }));
        assert_eq!(
            sink.count(|e| matches!(e, SyncEvent::BatchInserted { .. })),
            1
        );
    }
}
