//! mysql-pg-sync library
//!
//! Replicates a MySQL schema into PostgreSQL: a resumable bulk backfill
//! followed by continuous change capture through audit triggers.
//!
//! # Workspace Crates
//!
//! - `sync_core` - shared data model, configuration and events
//! - `mysql_types` / `postgresql_types` - type mapping, sanitization, SQL rendering
//! - `checkpoint` - backfill progress and error quarantine
//! - `postgresql_sink` - target writes
//! - `mysql_trigger_source` - discovery, triggers, backfill and apply
//!
//! # CLI Usage
//!
//! ```bash
//! # Install capture triggers on every replicated table
//! mysql-pg-sync setup-triggers
//!
//! # Copy existing rows, creating missing target tables
//! mysql-pg-sync initial --create-tables
//!
//! # Apply captured changes continuously
//! mysql-pg-sync sync --daemon
//! ```

use clap::Args;
use std::path::PathBuf;

pub mod commands;
pub mod config;

use config::{AppConfig, ConfigError, Overrides};

/// Connection and tuning options shared by every subcommand.
#[derive(Args, Clone, Debug, Default)]
pub struct GlobalOpts {
    /// TOML config file
    #[arg(long, global = true, env = "SYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// MySQL source connection URL
    #[arg(long, global = true, env = "MYSQL_URL")]
    pub mysql_url: Option<String>,

    /// PostgreSQL target connection string
    #[arg(long, global = true, env = "POSTGRES_URL")]
    pub postgres_url: Option<String>,

    /// Target schema holding replicated tables
    #[arg(long, global = true, env = "SYNC_TARGET_SCHEMA")]
    pub target_schema: Option<String>,

    /// Audit records applied per pass
    #[arg(long, global = true, env = "SYNC_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Pause between daemon iterations (e.g. "5s", "1m")
    #[arg(long, global = true, env = "SYNC_INTERVAL")]
    pub sync_interval: Option<String>,

    /// Regular expression selecting replicated tables ("*" for all)
    #[arg(long, global = true, env = "SYNC_TABLES")]
    pub tables: Option<String>,

    /// Hand audit records to the in-process work queue
    #[arg(long, global = true, env = "SYNC_USE_QUEUE")]
    pub use_queue: bool,

    /// Resident memory ceiling of the daemon, in MiB
    #[arg(long, global = true, env = "SYNC_MEMORY_LIMIT_MB")]
    pub memory_limit_mb: Option<u64>,

    /// Suppress per-value and per-record event logging
    #[arg(long, global = true)]
    pub quiet: bool,
}

impl GlobalOpts {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            mysql_url: self.mysql_url.clone(),
            postgres_url: self.postgres_url.clone(),
            target_schema: self.target_schema.clone(),
            batch_size: self.batch_size,
            sync_interval: self.sync_interval.clone(),
            use_queue: self.use_queue.then_some(true),
            memory_limit_mb: self.memory_limit_mb,
            include_tables: self.tables.clone(),
            verbose: self.quiet.then_some(false),
        }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        AppConfig::load(self.config.as_deref(), &self.overrides())
    }
}
