//! Command handlers behind the CLI.
//!
//! Each handler takes the engine components it drives as trait objects so
//! it can run against the in-memory fakes as well as live databases.
//! [`Context`] wires up the live ones.

mod initial;
mod maintenance;
mod sync;
mod triggers;

pub use initial::{run_initial, InitialOptions, InitialOutcome};
pub use maintenance::{collect_stats, run_cleanup, StatsReport};
pub use sync::{run_sync, SyncOutcome};
pub use triggers::{drop_triggers, setup_triggers};

use std::sync::Arc;

use anyhow::{Context as _, Result};
use checkpoint::MySQLStateStore;
use mysql_async::Pool;
use mysql_trigger_source::{
    new_mysql_pool, ChangeTracking, Discovery, FullSync, IncrementalSync, MySQLAuditLog,
    MySQLCatalog, MySQLTableReader,
};
use postgresql_sink::PostgresTarget;
use sync_core::{EventSink, SyncConfig, TracingEventSink};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::AppConfig;

/// Live connections and shared settings for one CLI invocation.
pub struct Context {
    pub config: Arc<SyncConfig>,
    pub events: Arc<dyn EventSink>,
    pub cancel: CancellationToken,
    pool: Pool,
    postgres_url: String,
}

impl Context {
    pub fn new(app: AppConfig, cancel: CancellationToken) -> Result<Self> {
        let pool = new_mysql_pool(&app.mysql_url)?;
        let events: Arc<dyn EventSink> =
            Arc::new(TracingEventSink::new(app.sync.monitoring.enabled));
        Ok(Self {
            config: Arc::new(app.sync),
            events,
            cancel,
            pool,
            postgres_url: app.postgres_url,
        })
    }

    pub fn discovery(&self) -> Result<Arc<Discovery>> {
        let catalog = Arc::new(MySQLCatalog::new(self.pool.clone()));
        Ok(Arc::new(Discovery::new(catalog, &self.config)?))
    }

    pub fn change_tracking(&self) -> ChangeTracking {
        ChangeTracking::new(self.pool.clone(), self.config.audit_table.clone())
    }

    pub fn audit_log(&self) -> Arc<MySQLAuditLog> {
        Arc::new(MySQLAuditLog::new(
            self.pool.clone(),
            self.config.audit_table.clone(),
        ))
    }

    /// State store with its bookkeeping tables in place.
    pub async fn state_store(&self) -> Result<Arc<MySQLStateStore>> {
        let store = MySQLStateStore::new(self.pool.clone(), &self.config);
        store.ensure_tables().await?;
        Ok(Arc::new(store))
    }

    pub async fn target(&self) -> Result<Arc<PostgresTarget>> {
        let target = PostgresTarget::connect(&self.postgres_url, self.config.target_schema.clone())
            .await
            .context("Failed to connect to PostgreSQL")?;
        debug!("Connected to PostgreSQL schema {}", self.config.target_schema);
        Ok(Arc::new(target))
    }

    pub fn full_sync(
        &self,
        target: Arc<PostgresTarget>,
        store: Arc<MySQLStateStore>,
    ) -> Result<FullSync> {
        Ok(FullSync::new(
            self.discovery()?,
            Arc::new(MySQLTableReader::new(self.pool.clone())),
            target,
            store,
            self.events.clone(),
            self.config.clone(),
            self.cancel.clone(),
        ))
    }

    pub async fn incremental_sync(&self, target: Arc<PostgresTarget>) -> Result<IncrementalSync> {
        self.change_tracking().ensure_audit_table().await?;
        Ok(IncrementalSync::new(
            self.audit_log(),
            target,
            self.events.clone(),
            self.config.clone(),
        ))
    }

    /// Close the source pool.
    pub async fn close(self) -> Result<()> {
        self.pool
            .disconnect()
            .await
            .context("Failed to close MySQL pool")
    }
}
