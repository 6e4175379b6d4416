//! `initial`: drop, reset, retry or backfill, in that order of precedence.

use std::fmt;

use anyhow::{bail, Result};
use checkpoint::{ErrorSummary, ProgressSummary, StateStore};
use mysql_trigger_source::{BackfillOptions, BackfillReport, FullSync, RetryReport, TableOutcome};
use postgresql_sink::PostgresSink;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitialOptions {
    pub table: Option<String>,
    pub create_tables: bool,
    pub drop_target: bool,
    /// Confirmation for `drop_target`
    pub yes: bool,
    pub batch_size: Option<u64>,
    pub resume: bool,
    pub retry_errors: bool,
    pub reset_progress: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InitialOutcome {
    ProgressReset {
        removed: u64,
    },
    Retried(RetryReport),
    Backfilled {
        report: BackfillReport,
        progress: ProgressSummary,
    },
}

pub async fn run_initial(
    full: &FullSync,
    sink: &dyn PostgresSink,
    store: &dyn StateStore,
    options: &InitialOptions,
) -> Result<InitialOutcome> {
    if options.drop_target {
        if !options.yes {
            bail!("--drop-target deletes every table in the target schema; pass --yes to confirm");
        }
        warn!("Dropping all tables in target schema {}", sink.schema());
        let dropped = sink.drop_all_tables().await?;
        info!("Dropped {dropped} target tables");
    }

    if options.reset_progress {
        let removed = store.reset_progress(options.table.as_deref()).await?;
        info!("Reset {removed} progress rows");
        return Ok(InitialOutcome::ProgressReset { removed });
    }

    if options.retry_errors {
        return Ok(InitialOutcome::Retried(full.retry_errors().await?));
    }

    let report = full
        .run(&BackfillOptions {
            table: options.table.clone(),
            create_tables: options.create_tables,
            batch_size: options.batch_size,
            resume: options.resume,
        })
        .await?;

    let progress = match store.all_progress().await {
        Ok(rows) => ProgressSummary::from_progress(&rows),
        Err(e) => {
            warn!("Could not read progress summary: {e:#}");
            ProgressSummary::default()
        }
    };
    Ok(InitialOutcome::Backfilled { report, progress })
}

fn write_errors(f: &mut fmt::Formatter<'_>, errors: &[ErrorSummary]) -> fmt::Result {
    if errors.is_empty() {
        return writeln!(f, "No outstanding errors.");
    }
    writeln!(f, "Outstanding errors:")?;
    for entry in errors {
        writeln!(f, "  {:<32} {}", entry.table_name, entry.unresolved)?;
    }
    writeln!(f, "Run `initial --retry-errors` to retry them.")
}

impl fmt::Display for InitialOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitialOutcome::ProgressReset { removed } => {
                writeln!(f, "Progress reset ({removed} rows removed).")
            }
            InitialOutcome::Retried(report) => writeln!(
                f,
                "Retried {} failed batches: {} resolved, {} still failing.",
                report.attempted, report.resolved, report.still_failing
            ),
            InitialOutcome::Backfilled { report, progress } => {
                for (table, outcome) in &report.tables {
                    match outcome {
                        TableOutcome::Completed { synced } => {
                            writeln!(f, "  {table:<32} completed  {synced} rows")?
                        }
                        TableOutcome::Failed { synced, failed } => writeln!(
                            f,
                            "  {table:<32} failed     {synced} rows, {failed} quarantined"
                        )?,
                        TableOutcome::Interrupted { offset } => {
                            writeln!(f, "  {table:<32} stopped    at offset {offset}")?
                        }
                        TableOutcome::Skipped { reason } => {
                            writeln!(f, "  {table:<32} skipped    {reason}")?
                        }
                    }
                }
                if report.interrupted {
                    writeln!(f, "Interrupted; rerun with --resume to continue.")?;
                }
                write_errors(f, &report.outstanding_errors)?;

                if !progress.by_status.is_empty() {
                    writeln!(f, "Progress by status:")?;
                    for (status, count) in &progress.by_status {
                        writeln!(f, "  {status:<12} {count}")?;
                    }
                }
                for (table, status, percent) in &progress.incomplete {
                    writeln!(f, "  {table:<32} {status:<12} {percent:.1}%")?;
                }
                Ok(())
            }
        }
    }
}
