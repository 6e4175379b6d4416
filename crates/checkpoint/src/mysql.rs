//! MySQL-backed state storage implementation.
//!
//! Progress and error rows live in two bookkeeping tables on the source
//! database, next to the change-capture audit table.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mysql_async::prelude::*;
use mysql_async::{Pool, Row, Value};
use sync_core::{
    truncate_chars, ErrorLogEntry, NewErrorEntry, ProgressUpdate, SyncConfig, SyncProgress,
    MAX_BATCH_ERROR_LEN,
};
use tracing::debug;

use crate::store::{ErrorSummary, ResumePoint, StateStore};

/// `CREATE TABLE IF NOT EXISTS` for the progress table.
pub fn progress_table_ddl(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS `{table}` (
            id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
            table_name VARCHAR(64) NOT NULL,
            status ENUM('pending', 'in_progress', 'completed', 'failed') NOT NULL DEFAULT 'pending',
            total_rows BIGINT UNSIGNED NOT NULL DEFAULT 0,
            synced_rows BIGINT UNSIGNED NOT NULL DEFAULT 0,
            failed_rows BIGINT UNSIGNED NOT NULL DEFAULT 0,
            last_synced_offset BIGINT UNSIGNED NOT NULL DEFAULT 0,
            batch_size INT UNSIGNED NOT NULL DEFAULT 500,
            started_at TIMESTAMP NULL,
            completed_at TIMESTAMP NULL,
            error_message TEXT NULL,
            created_at TIMESTAMP NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
            UNIQUE KEY uniq_table_name (table_name),
            INDEX idx_status (status)
        )"
    )
}

/// `CREATE TABLE IF NOT EXISTS` for the error quarantine table.
pub fn error_log_table_ddl(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS `{table}` (
            id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
            table_name VARCHAR(64) NOT NULL,
            batch_offset BIGINT UNSIGNED NOT NULL,
            batch_size INT UNSIGNED NOT NULL,
            error_message TEXT NOT NULL,
            failed_columns TEXT NULL,
            sample_data TEXT NULL,
            resolved TINYINT(1) NOT NULL DEFAULT 0,
            error_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            resolved_at TIMESTAMP NULL,
            INDEX idx_table_resolved (table_name, resolved),
            INDEX idx_table_offset (table_name, batch_offset)
        )"
    )
}

/// MySQL implementation of the `StateStore` trait.
pub struct MySQLStateStore {
    pool: Pool,
    progress_table: String,
    error_log_table: String,
}

impl MySQLStateStore {
    pub fn new(pool: Pool, config: &SyncConfig) -> Self {
        Self {
            pool,
            progress_table: config.progress_table.clone(),
            error_log_table: config.error_log_table.clone(),
        }
    }

    /// Create both bookkeeping tables when missing.
    pub async fn ensure_tables(&self) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        conn.query_drop(progress_table_ddl(&self.progress_table))
            .await
            .with_context(|| format!("Failed to create {}", self.progress_table))?;
        conn.query_drop(error_log_table_ddl(&self.error_log_table))
            .await
            .with_context(|| format!("Failed to create {}", self.error_log_table))?;
        debug!(
            "Ensured bookkeeping tables {} and {}",
            self.progress_table, self.error_log_table
        );
        Ok(())
    }

    fn progress_columns() -> &'static str {
        "table_name, status, total_rows, synced_rows, failed_rows, last_synced_offset, \
         batch_size, started_at, completed_at, error_message, created_at, updated_at"
    }

    fn error_columns() -> &'static str {
        "id, table_name, batch_offset, batch_size, error_message, failed_columns, \
         sample_data, resolved, error_at, resolved_at"
    }
}

fn get<T: FromValue>(row: &Row, idx: usize) -> Result<T> {
    row.get_opt::<T, usize>(idx)
        .ok_or_else(|| anyhow!("missing column {idx}"))?
        .map_err(|e| anyhow!("column {idx}: {e:?}"))
}

fn get_timestamp(row: &Row, idx: usize) -> Result<Option<DateTime<Utc>>> {
    let value: Value = get(row, idx)?;
    if value == Value::NULL {
        return Ok(None);
    }
    let naive = mysql_types::mysql_datetime(&value)?;
    Ok(Some(Utc.from_utc_datetime(&naive)))
}

fn progress_from_row(row: &Row) -> Result<SyncProgress> {
    let status: String = get(row, 1)?;
    let now = Utc::now();
    Ok(SyncProgress {
        table_name: get(row, 0)?,
        status: status.parse().map_err(|e: String| anyhow!(e))?,
        total_rows: get(row, 2)?,
        synced_rows: get(row, 3)?,
        failed_rows: get(row, 4)?,
        last_synced_offset: get(row, 5)?,
        batch_size: get(row, 6)?,
        started_at: get_timestamp(row, 7)?,
        completed_at: get_timestamp(row, 8)?,
        error_message: get(row, 9)?,
        created_at: get_timestamp(row, 10)?.unwrap_or(now),
        updated_at: get_timestamp(row, 11)?.unwrap_or(now),
    })
}

fn error_from_row(row: &Row) -> Result<ErrorLogEntry> {
    let failed_columns: Option<String> = get(row, 5)?;
    let sample_data: Option<String> = get(row, 6)?;
    let resolved: i64 = get(row, 7)?;
    Ok(ErrorLogEntry {
        id: get(row, 0)?,
        table_name: get(row, 1)?,
        batch_offset: get(row, 2)?,
        batch_size: get(row, 3)?,
        error_message: get(row, 4)?,
        failed_columns: failed_columns
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        sample_data: sample_data.and_then(|s| serde_json::from_str(&s).ok()),
        resolved: resolved != 0,
        error_at: get_timestamp(row, 8)?.unwrap_or_else(Utc::now),
        resolved_at: get_timestamp(row, 9)?,
    })
}

#[async_trait]
impl StateStore for MySQLStateStore {
    async fn progress(&self, table: &str) -> Result<Option<SyncProgress>> {
        let mut conn = self.pool.get_conn().await?;
        let row: Option<Row> = conn
            .exec_first(
                format!(
                    "SELECT {} FROM `{}` WHERE table_name = ?",
                    Self::progress_columns(),
                    self.progress_table
                ),
                (table,),
            )
            .await?;
        row.as_ref().map(progress_from_row).transpose()
    }

    async fn all_progress(&self) -> Result<Vec<SyncProgress>> {
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<Row> = conn
            .query(format!(
                "SELECT {} FROM `{}` ORDER BY table_name",
                Self::progress_columns(),
                self.progress_table
            ))
            .await?;
        rows.iter().map(progress_from_row).collect()
    }

    async fn start_progress(
        &self,
        table: &str,
        total_rows: u64,
        batch_size: u64,
        resume: Option<ResumePoint>,
    ) -> Result<()> {
        let resume = resume.unwrap_or_default();
        let mut conn = self.pool.get_conn().await?;
        conn.exec_drop(
            format!(
                "INSERT INTO `{}` (table_name, status, total_rows, synced_rows, failed_rows, \
                 last_synced_offset, batch_size, started_at, completed_at, error_message, \
                 created_at, updated_at) \
                 VALUES (?, 'in_progress', ?, ?, ?, ?, ?, NOW(), NULL, NULL, NOW(), NOW()) \
                 ON DUPLICATE KEY UPDATE status = VALUES(status), total_rows = VALUES(total_rows), \
                 synced_rows = VALUES(synced_rows), failed_rows = VALUES(failed_rows), \
                 last_synced_offset = VALUES(last_synced_offset), batch_size = VALUES(batch_size), \
                 started_at = NOW(), completed_at = NULL, error_message = NULL, updated_at = NOW()",
                self.progress_table
            ),
            (
                table,
                total_rows,
                resume.synced_rows,
                resume.failed_rows,
                resume.offset,
                batch_size,
            ),
        )
        .await?;
        Ok(())
    }

    async fn update_progress(&self, table: &str, update: &ProgressUpdate) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        conn.exec_drop(
            format!(
                "UPDATE `{}` SET status = ?, synced_rows = ?, failed_rows = ?, \
                 last_synced_offset = ?, error_message = ?, \
                 completed_at = IF(?, NOW(), completed_at), updated_at = NOW() \
                 WHERE table_name = ?",
                self.progress_table
            ),
            (
                update.status.as_str(),
                update.synced_rows,
                update.failed_rows,
                update.last_synced_offset,
                update.error_message.as_deref(),
                update.status.is_terminal(),
                table,
            ),
        )
        .await?;
        Ok(())
    }

    async fn reset_progress(&self, table: Option<&str>) -> Result<u64> {
        let mut conn = self.pool.get_conn().await?;
        match table {
            Some(name) => {
                conn.exec_drop(
                    format!("DELETE FROM `{}` WHERE table_name = ?", self.progress_table),
                    (name,),
                )
                .await?
            }
            None => {
                conn.query_drop(format!("DELETE FROM `{}`", self.progress_table))
                    .await?
            }
        }
        Ok(conn.affected_rows())
    }

    async fn log_error(&self, entry: NewErrorEntry) -> Result<()> {
        let message = truncate_chars(&entry.error_message, MAX_BATCH_ERROR_LEN);
        let failed_columns = serde_json::to_string(&entry.failed_columns)?;
        let sample_data = entry
            .sample_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut conn = self.pool.get_conn().await?;
        let existing: Option<i64> = conn
            .exec_first(
                format!(
                    "SELECT id FROM `{}` WHERE table_name = ? AND batch_offset = ? \
                     AND resolved = 0 ORDER BY id LIMIT 1",
                    self.error_log_table
                ),
                (&entry.table_name, entry.batch_offset),
            )
            .await?;

        match existing {
            Some(id) => {
                conn.exec_drop(
                    format!(
                        "UPDATE `{}` SET error_message = ?, batch_size = ?, failed_columns = ?, \
                         sample_data = ?, error_at = NOW() WHERE id = ?",
                        self.error_log_table
                    ),
                    (message, entry.batch_size, failed_columns, sample_data, id),
                )
                .await?;
            }
            None => {
                conn.exec_drop(
                    format!(
                        "INSERT INTO `{}` (table_name, batch_offset, batch_size, error_message, \
                         failed_columns, sample_data, resolved, error_at) \
                         VALUES (?, ?, ?, ?, ?, ?, 0, NOW())",
                        self.error_log_table
                    ),
                    (
                        &entry.table_name,
                        entry.batch_offset,
                        entry.batch_size,
                        message,
                        failed_columns,
                        sample_data,
                    ),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn resolve_errors(&self, table: &str, batch_offset: u64) -> Result<u64> {
        let mut conn = self.pool.get_conn().await?;
        conn.exec_drop(
            format!(
                "UPDATE `{}` SET resolved = 1, resolved_at = NOW() \
                 WHERE table_name = ? AND batch_offset = ? AND resolved = 0",
                self.error_log_table
            ),
            (table, batch_offset),
        )
        .await?;
        Ok(conn.affected_rows())
    }

    async fn unresolved_errors(&self) -> Result<Vec<ErrorLogEntry>> {
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<Row> = conn
            .query(format!(
                "SELECT {} FROM `{}` WHERE resolved = 0 ORDER BY table_name, batch_offset, id",
                Self::error_columns(),
                self.error_log_table
            ))
            .await?;
        rows.iter().map(error_from_row).collect()
    }

    async fn update_error(&self, id: i64, message: &str) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        conn.exec_drop(
            format!(
                "UPDATE `{}` SET error_message = ?, error_at = NOW() WHERE id = ?",
                self.error_log_table
            ),
            (truncate_chars(message, MAX_BATCH_ERROR_LEN), id),
        )
        .await?;
        Ok(())
    }

    async fn error_summary(&self) -> Result<Vec<ErrorSummary>> {
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<(String, u64)> = conn
            .query(format!(
                "SELECT table_name, COUNT(*) FROM `{}` WHERE resolved = 0 \
                 GROUP BY table_name ORDER BY table_name",
                self.error_log_table
            ))
            .await?;
        Ok(rows
            .into_iter()
            .map(|(table_name, unresolved)| ErrorSummary {
                table_name,
                unresolved,
            })
            .collect())
    }
}
