//! Command-line interface for mysql-pg-sync
//!
//! # Usage Examples
//!
//! ## Change capture
//! ```bash
//! # Install triggers for one table, replacing existing ones
//! mysql-pg-sync setup-triggers --table users --drop
//!
//! # Remove every capture trigger
//! mysql-pg-sync drop-triggers
//! ```
//!
//! ## Backfill
//! ```bash
//! # Start over into an empty target schema
//! mysql-pg-sync initial --drop-target --yes --create-tables
//!
//! # Continue an interrupted run, then retry quarantined rows
//! mysql-pg-sync initial --resume
//! mysql-pg-sync initial --retry-errors
//! ```
//!
//! ## Incremental apply and housekeeping
//! ```bash
//! mysql-pg-sync sync --daemon --sync-interval 10s
//! mysql-pg-sync cleanup --days 14 --dry-run
//! mysql-pg-sync stats
//! ```

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use mysql_pg_sync::commands::{self, Context, InitialOptions};
use mysql_pg_sync::config::parse_duration_to_days;
use mysql_pg_sync::GlobalOpts;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "mysql-pg-sync")]
#[command(about = "Replicate a MySQL database into PostgreSQL using audit triggers")]
#[command(long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the audit table and install capture triggers
    SetupTriggers {
        /// Only this table
        #[arg(long)]
        table: Option<String>,

        /// Drop existing triggers before creating new ones
        #[arg(long)]
        drop: bool,
    },

    /// Remove capture triggers
    DropTriggers {
        /// Only this table
        #[arg(long)]
        table: Option<String>,
    },

    /// Copy existing rows from source to target
    Initial {
        /// Only this table (no dependency ordering)
        #[arg(long)]
        table: Option<String>,

        /// Create missing target tables from the source schema
        #[arg(long)]
        create_tables: bool,

        /// Drop every table in the target schema first
        #[arg(long)]
        drop_target: bool,

        /// Confirm --drop-target
        #[arg(long)]
        yes: bool,

        /// Rows per batch
        #[arg(long)]
        batch: Option<u64>,

        /// Continue from the last persisted offset
        #[arg(long)]
        resume: bool,

        /// Retry quarantined batches and rows instead of copying
        #[arg(long)]
        retry_errors: bool,

        /// Delete progress records and exit
        #[arg(long)]
        reset_progress: bool,
    },

    /// Apply captured changes to the target
    Sync {
        /// Keep running until interrupted
        #[arg(long)]
        daemon: bool,
    },

    /// Delete old synced audit records
    Cleanup {
        /// Days to keep (e.g. "14" or "14d"); defaults to the configured value
        #[arg(long)]
        days: Option<String>,

        /// Only report what would be deleted
        #[arg(long)]
        dry_run: bool,
    },

    /// Show audit, progress and error statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

/// Cancel `token` on Ctrl-C or SIGTERM.
fn setup_shutdown_handler(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {e}");
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Received interrupt signal; finishing current work");
                        token.cancel();
                    }
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
        }
        info!("Received shutdown signal; finishing current work");
        token.cancel();
    });
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let app = cli.global.load().context("Invalid configuration")?;

    let cancel = CancellationToken::new();
    setup_shutdown_handler(cancel.clone());
    let ctx = Context::new(app, cancel.clone())?;

    match cli.command {
        Commands::SetupTriggers { table, drop } => {
            let report =
                commands::setup_triggers(&*ctx.discovery()?, &ctx.change_tracking(), table, drop)
                    .await?;
            println!(
                "Triggers: {} created, {} already present, {} failed",
                report.created,
                report.already_present,
                report.failed.len()
            );
        }
        Commands::DropTriggers { table } => {
            let dropped =
                commands::drop_triggers(&*ctx.discovery()?, &ctx.change_tracking(), table).await?;
            println!("Dropped triggers for {dropped} tables");
        }
        Commands::Initial {
            table,
            create_tables,
            drop_target,
            yes,
            batch,
            resume,
            retry_errors,
            reset_progress,
        } => {
            let options = InitialOptions {
                table,
                create_tables,
                drop_target,
                yes,
                batch_size: batch,
                resume,
                retry_errors,
                reset_progress,
            };
            let target = ctx.target().await?;
            let store = ctx.state_store().await?;
            let full = ctx.full_sync(target.clone(), store.clone())?;
            let outcome =
                commands::run_initial(&full, target.as_ref(), store.as_ref(), &options).await?;
            print!("{outcome}");
        }
        Commands::Sync { daemon } => {
            let target = ctx.target().await?;
            let sync = ctx.incremental_sync(target).await?;
            let outcome = commands::run_sync(
                sync,
                &ctx.config,
                ctx.events.clone(),
                daemon,
                cancel.clone(),
            )
            .await?;
            print!("{outcome}");
        }
        Commands::Cleanup { days, dry_run } => {
            let keep_days = match days {
                Some(days) => parse_duration_to_days(&days)?,
                None if !ctx.config.cleanup.enabled => {
                    warn!(
                        "Audit log cleanup is disabled in the configuration; \
                         pass --days to run it anyway"
                    );
                    return ctx.close().await;
                }
                None => ctx.config.cleanup.keep_days,
            };
            let report = commands::run_cleanup(ctx.audit_log().as_ref(), keep_days, dry_run).await?;
            if report.dry_run {
                println!("DRY RUN: would delete {} records.", report.eligible);
            } else if report.eligible == 0 {
                println!("No records to clean up.");
            } else {
                println!("Deleted {} of {} records.", report.deleted, report.eligible);
            }
        }
        Commands::Stats => {
            let store = ctx.state_store().await?;
            let report = commands::collect_stats(
                ctx.audit_log().as_ref(),
                store.as_ref(),
                ctx.config.retry.max_attempts,
            )
            .await?;
            print!("{report}");
        }
    }

    ctx.close().await
}
