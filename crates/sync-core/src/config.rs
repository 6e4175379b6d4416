//! Immutable replication settings.
//!
//! Built once at startup (defaults, then an optional TOML file, then CLI and
//! environment overrides) and shared read-only by every component.

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Change-capture audit table on the source
    pub audit_table: String,
    /// Backfill error quarantine table on the source
    pub error_log_table: String,
    /// Backfill progress table on the source
    pub progress_table: String,
    /// Target schema holding replicated tables
    pub target_schema: String,
    /// Audit records drained per apply pass
    pub batch_size: usize,
    /// Rows per backfill page
    pub backfill_batch_size: u64,
    /// Seconds between daemon iterations
    pub sync_interval_secs: u64,
    pub retry: RetryConfig,
    pub cleanup: CleanupConfig,
    pub tables: TableSelection,
    pub performance: PerformanceConfig,
    pub monitoring: MonitoringConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            audit_table: "sync_audit_log".to_string(),
            error_log_table: "sync_error_log".to_string(),
            progress_table: "sync_progress".to_string(),
            target_schema: "public".to_string(),
            batch_size: 100,
            backfill_batch_size: 1000,
            sync_interval_secs: 5,
            retry: RetryConfig::default(),
            cleanup: CleanupConfig::default(),
            tables: TableSelection::default(),
            performance: PerformanceConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Apply attempts per audit record before it stops being selected
    pub max_attempts: u32,
    /// Insert attempts per row during backfill fallback
    pub row_attempts: u32,
    /// Base delay of the row fallback backoff, doubled per attempt
    pub row_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            row_attempts: 3,
            row_backoff_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub enabled: bool,
    /// Synced audit rows older than this are purged
    pub keep_days: u32,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keep_days: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableSelection {
    /// `*` for every table, otherwise a regular expression
    pub include: String,
    pub exclude: Vec<String>,
}

impl Default for TableSelection {
    fn default() -> Self {
        Self {
            include: "*".to_string(),
            exclude: [
                "migrations",
                "failed_jobs",
                "password_resets",
                "personal_access_tokens",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Dispatch audit records to the work queue instead of applying inline
    pub use_queue: bool,
    pub queue_name: String,
    /// Resident memory ceiling of the daemon, in MiB
    pub memory_limit_mb: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            use_queue: false,
            queue_name: "database-sync".to_string(),
            memory_limit_mb: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Emit per-value sanitization and per-record events
    pub enabled: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl SyncConfig {
    /// Configured exclusions plus the bookkeeping tables, which are never
    /// replicated.
    pub fn excluded_tables(&self) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = self.tables.exclude.iter().cloned().collect();
        out.insert(self.audit_table.clone());
        out.insert(self.error_log_table.clone());
        out.insert(self.progress_table.clone());
        out
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn row_backoff(&self) -> Duration {
        Duration::from_millis(self.retry.row_backoff_ms)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        let invalid = |msg: &str| Err(SyncError::InvalidConfig(msg.to_string()));
        if self.batch_size == 0 {
            return invalid("batch_size must be greater than zero");
        }
        if self.backfill_batch_size == 0 {
            return invalid("backfill_batch_size must be greater than zero");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be greater than zero");
        }
        if self.retry.row_attempts == 0 {
            return invalid("retry.row_attempts must be greater than zero");
        }
        for name in [&self.audit_table, &self.error_log_table, &self.progress_table] {
            if name.is_empty() || name.contains('`') {
                return Err(SyncError::InvalidConfig(format!(
                    "invalid bookkeeping table name: {name:?}"
                )));
            }
        }
        if self.tables.include.trim().is_empty() {
            return invalid("tables.include must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.audit_table, "sync_audit_log");
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.cleanup.keep_days, 7);
        assert_eq!(config.sync_interval(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bookkeeping_tables_always_excluded() {
        let mut config = SyncConfig::default();
        config.tables.exclude.clear();
        let excluded = config.excluded_tables();
        assert!(excluded.contains("sync_audit_log"));
        assert!(excluded.contains("sync_error_log"));
        assert!(excluded.contains("sync_progress"));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let config = SyncConfig {
            backfill_batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SyncError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"batch_size": 50, "retry": {"max_attempts": 5}}"#).unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.row_attempts, 3);
        assert_eq!(config.audit_table, "sync_audit_log");
    }
}
