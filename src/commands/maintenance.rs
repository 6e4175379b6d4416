//! `cleanup` and `stats`.

use std::fmt;

use anyhow::Result;
use checkpoint::{ErrorSummary, ProgressSummary, StateStore};
use mysql_trigger_source::{purge_synced, AuditLog, PurgeReport};
use sync_core::AuditStats;
use tracing::info;

pub async fn run_cleanup(
    audit: &dyn AuditLog,
    keep_days: u32,
    dry_run: bool,
) -> Result<PurgeReport> {
    info!("Cleaning up audit log records older than {keep_days} days");
    purge_synced(audit, keep_days, dry_run).await
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsReport {
    pub audit: AuditStats,
    pub errors: Vec<ErrorSummary>,
    pub progress: ProgressSummary,
}

pub async fn collect_stats(
    audit: &dyn AuditLog,
    store: &dyn StateStore,
    max_attempts: u32,
) -> Result<StatsReport> {
    Ok(StatsReport {
        audit: audit.stats(max_attempts).await?,
        errors: store.error_summary().await?,
        progress: ProgressSummary::from_progress(&store.all_progress().await?),
    })
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Audit log:")?;
        writeln!(f, "  Total:    {}", self.audit.total)?;
        writeln!(f, "  Synced:   {}", self.audit.synced)?;
        writeln!(f, "  Pending:  {}", self.audit.pending)?;
        writeln!(f, "  Failed:   {}", self.audit.failed)?;

        writeln!(f, "Backfill progress:")?;
        if self.progress.by_status.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for (status, count) in &self.progress.by_status {
            writeln!(f, "  {status:<12} {count}")?;
        }
        for (table, status, percent) in &self.progress.incomplete {
            writeln!(f, "  {table:<32} {status:<12} {percent:.1}%")?;
        }

        writeln!(f, "Unresolved backfill errors:")?;
        if self.errors.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for entry in &self.errors {
            writeln!(f, "  {:<32} {}", entry.table_name, entry.unresolved)?;
        }
        Ok(())
    }
}
