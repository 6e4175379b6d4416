//! Audit log access
//!
//! The capture triggers append rows to the audit table; this module reads
//! the unsynced ones in `id` order, records the apply outcome on each, and
//! purges old synced rows.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mysql_async::prelude::*;
use mysql_async::{Pool, Row as MySQLRow, Value as MySQLValue};
use sync_core::{truncate_chars, AuditRecord, AuditStats, Row, MAX_APPLY_ERROR_LEN};
use tracing::{debug, info, warn};

use crate::change_tracking::quote_mysql_ident;

/// Rows deleted per purge statement.
pub const PURGE_CHUNK_SIZE: u64 = 1000;

/// Pause between purge statements.
pub const PURGE_PAUSE: Duration = Duration::from_millis(100);

/// Read and bookkeeping access to the audit table.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Up to `limit` unsynced records with `retry_count < max_attempts`,
    /// ascending by id.
    async fn fetch_pending(&self, limit: usize, max_attempts: u32) -> Result<Vec<AuditRecord>>;

    /// `synced = true, synced_at = now, error_message = NULL`.
    async fn mark_synced(&self, id: i64) -> Result<()>;

    /// `retry_count += 1` and store the (truncated) error.
    async fn mark_failed(&self, id: i64, error: &str) -> Result<()>;

    async fn stats(&self, max_attempts: u32) -> Result<AuditStats>;

    /// Synced records created more than `keep_days` days ago.
    async fn count_purgeable(&self, keep_days: u32) -> Result<u64>;

    /// Delete at most `limit` synced records created more than `keep_days`
    /// days ago.
    async fn purge_chunk(&self, keep_days: u32, limit: u64) -> Result<u64>;
}

/// Result of a purge run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub eligible: u64,
    pub deleted: u64,
    pub dry_run: bool,
}

/// Delete synced audit rows older than `keep_days`, in chunks with a short
/// pause in between. A dry run only counts.
pub async fn purge_synced(
    audit: &dyn AuditLog,
    keep_days: u32,
    dry_run: bool,
) -> Result<PurgeReport> {
    let eligible = audit.count_purgeable(keep_days).await?;
    let mut report = PurgeReport {
        eligible,
        deleted: 0,
        dry_run,
    };

    if dry_run {
        info!("DRY RUN: would delete {eligible} synced audit records older than {keep_days} days");
        return Ok(report);
    }

    while report.deleted < eligible {
        let deleted = audit.purge_chunk(keep_days, PURGE_CHUNK_SIZE).await?;
        if deleted == 0 {
            break;
        }
        report.deleted += deleted;
        debug!("Purged {} of {eligible} audit records", report.deleted);
        tokio::time::sleep(PURGE_PAUSE).await;
    }

    info!("Cleanup completed: deleted {} audit records", report.deleted);
    Ok(report)
}

/// `AuditLog` over the MySQL audit table.
pub struct MySQLAuditLog {
    pool: Pool,
    table: String,
}

impl MySQLAuditLog {
    pub fn new(pool: Pool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    fn table(&self) -> String {
        quote_mysql_ident(&self.table)
    }
}

fn column<T: FromValue>(row: &MySQLRow, idx: usize) -> Result<T> {
    row.get_opt::<T, usize>(idx)
        .ok_or_else(|| anyhow!("missing audit column {idx}"))?
        .map_err(|e| anyhow!("audit column {idx}: {e:?}"))
}

fn timestamp(row: &MySQLRow, idx: usize) -> Result<Option<DateTime<Utc>>> {
    let value: MySQLValue = column(row, idx)?;
    if value == MySQLValue::NULL {
        return Ok(None);
    }
    let naive = mysql_types::mysql_datetime(&value)?;
    Ok(Some(Utc.from_utc_datetime(&naive)))
}

/// Parse a `JSON_OBJECT` payload. Anything but an object is treated as
/// absent, which makes the apply step reject the record.
fn payload(id: i64, text: Option<String>) -> Option<Row> {
    let text = text?;
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(serde_json::Value::Object(map)) => Some(Row::from_json_object(&map)),
        _ => {
            warn!("Audit record {id} has an unreadable payload");
            None
        }
    }
}

fn record_from_row(row: &MySQLRow) -> Result<AuditRecord> {
    let id: i64 = column(row, 0)?;
    let operation: String = column(row, 3)?;
    let synced: i64 = column(row, 6)?;
    Ok(AuditRecord {
        id,
        table_name: column(row, 1)?,
        record_id: column(row, 2)?,
        operation: operation.parse().map_err(|e: String| anyhow!(e))?,
        old_data: payload(id, column(row, 4)?),
        new_data: payload(id, column(row, 5)?),
        synced: synced != 0,
        synced_at: timestamp(row, 7)?,
        error_message: column(row, 8)?,
        retry_count: column(row, 9)?,
        created_at: timestamp(row, 10)?.unwrap_or_else(Utc::now),
    })
}

/// Keep the records that parsed. A row that did not is marked failed, so it
/// drops out of the pending set instead of blocking the rows behind it; a
/// row without a readable id fails the whole read.
async fn keep_readable(
    audit: &dyn AuditLog,
    parsed: Vec<(Result<i64>, Result<AuditRecord>)>,
) -> Result<Vec<AuditRecord>> {
    let mut records = Vec::with_capacity(parsed.len());
    for (id, record) in parsed {
        match record {
            Ok(record) => records.push(record),
            Err(e) => {
                let id = id.context("Audit record without a readable id")?;
                let message = format!("Unreadable audit record: {e:#}");
                warn!("Skipping audit record {id}: {message}");
                if let Err(e) = audit.mark_failed(id, &message).await {
                    warn!("Could not record failure of audit record {id}: {e:#}");
                }
            }
        }
    }
    Ok(records)
}

#[async_trait]
impl AuditLog for MySQLAuditLog {
    async fn fetch_pending(&self, limit: usize, max_attempts: u32) -> Result<Vec<AuditRecord>> {
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<MySQLRow> = conn
            .exec(
                format!(
                    "SELECT id, table_name, record_id, operation,
                            CAST(old_data AS CHAR), CAST(new_data AS CHAR),
                            synced, synced_at, error_message, retry_count, created_at
                     FROM {} WHERE synced = 0 AND retry_count < ?
                     ORDER BY id LIMIT ?",
                    self.table()
                ),
                (max_attempts, limit as u64),
            )
            .await
            .context("Failed to read pending audit records")?;
        let parsed = rows
            .iter()
            .map(|row| (column::<i64>(row, 0), record_from_row(row)))
            .collect();
        keep_readable(self, parsed).await
    }

    async fn mark_synced(&self, id: i64) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        conn.exec_drop(
            format!(
                "UPDATE {} SET synced = 1, synced_at = NOW(), error_message = NULL WHERE id = ?",
                self.table()
            ),
            (id,),
        )
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        conn.exec_drop(
            format!(
                "UPDATE {} SET retry_count = retry_count + 1, error_message = ? WHERE id = ?",
                self.table()
            ),
            (truncate_chars(error, MAX_APPLY_ERROR_LEN), id),
        )
        .await?;
        Ok(())
    }

    async fn stats(&self, max_attempts: u32) -> Result<AuditStats> {
        let mut conn = self.pool.get_conn().await?;
        let row: Option<(u64, u64, u64, u64)> = conn
            .exec_first(
                format!(
                    "SELECT COUNT(*),
                            CAST(COALESCE(SUM(synced = 1), 0) AS UNSIGNED),
                            CAST(COALESCE(SUM(synced = 0), 0) AS UNSIGNED),
                            CAST(COALESCE(SUM(synced = 0 AND retry_count >= ?), 0) AS UNSIGNED)
                     FROM {}",
                    self.table()
                ),
                (max_attempts,),
            )
            .await?;
        let (total, synced, pending, failed) = row.unwrap_or_default();
        Ok(AuditStats {
            total,
            synced,
            pending,
            failed,
        })
    }

    async fn count_purgeable(&self, keep_days: u32) -> Result<u64> {
        let mut conn = self.pool.get_conn().await?;
        let count: Option<u64> = conn
            .exec_first(
                format!(
                    "SELECT COUNT(*) FROM {} \
                     WHERE synced = 1 AND created_at < NOW() - INTERVAL ? DAY",
                    self.table()
                ),
                (keep_days,),
            )
            .await?;
        Ok(count.unwrap_or(0))
    }

    async fn purge_chunk(&self, keep_days: u32, limit: u64) -> Result<u64> {
        let mut conn = self.pool.get_conn().await?;
        conn.exec_drop(
            format!(
                "DELETE FROM {} WHERE synced = 1 AND created_at < NOW() - INTERVAL ? DAY \
                 ORDER BY id LIMIT ?",
                self.table()
            ),
            (keep_days, limit),
        )
        .await?;
        Ok(conn.affected_rows())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAuditLog;
    use sync_core::Operation;

    #[test]
    fn test_payload_parsing() {
        let row = payload(1, Some(r#"{"id": 7, "name": "a"}"#.to_string())).unwrap();
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["id", "name"]);
        assert!(payload(1, Some("[1, 2]".to_string())).is_none());
        assert!(payload(1, Some("not json".to_string())).is_none());
        assert!(payload(1, None).is_none());
    }

    #[tokio::test]
    async fn test_unreadable_record_is_marked_failed_and_skipped() {
        let audit = FakeAuditLog::new();
        let first = audit.push(Operation::Insert, "users", Some("id:1"), None);
        let broken = audit.push(Operation::Insert, "users", Some("id:2"), None);
        let last = audit.push(Operation::Insert, "users", Some("id:3"), None);

        let parsed = vec![
            (Ok(first), Ok(audit.get(first).unwrap())),
            (Ok(broken), Err(anyhow!("unknown operation 'MERGE'"))),
            (Ok(last), Ok(audit.get(last).unwrap())),
        ];
        let records = keep_readable(&audit, parsed).await.unwrap();

        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first, last]);
        let skipped = audit.get(broken).unwrap();
        assert_eq!(skipped.retry_count, 1);
        assert!(skipped.error_message.unwrap().contains("MERGE"));
    }

    #[tokio::test]
    async fn test_record_without_id_fails_the_read() {
        let audit = FakeAuditLog::new();
        let parsed = vec![(
            Err(anyhow!("missing audit column 0")),
            Err(anyhow!("missing audit column 0")),
        )];
        assert!(keep_readable(&audit, parsed).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_in_chunks() {
        let audit = FakeAuditLog::new();
        let old = Utc::now() - chrono::Duration::days(30);
        for i in 0..2500 {
            let id = audit.push(Operation::Insert, "users", Some(&format!("id:{i}")), None);
            audit.set_synced(id, old);
        }
        audit.push(Operation::Insert, "users", Some("id:new"), None);

        let report = purge_synced(&audit, 7, false).await.unwrap();
        assert_eq!(report.eligible, 2500);
        assert_eq!(report.deleted, 2500);
        assert_eq!(audit.purge_calls(), 3);
        assert_eq!(audit.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_dry_run_deletes_nothing() {
        let audit = FakeAuditLog::new();
        let id = audit.push(Operation::Insert, "users", Some("id:1"), None);
        audit.set_synced(id, Utc::now() - chrono::Duration::days(8));

        let report = purge_synced(&audit, 7, true).await.unwrap();
        assert_eq!(report.eligible, 1);
        assert_eq!(report.deleted, 0);
        assert!(report.dry_run);
        assert_eq!(audit.len(), 1);
    }
}
