use anyhow::Result;
use mysql_trigger_source::{ChangeTracking, Discovery, TriggerReport};
use tracing::{info, warn};

async fn selected_tables(discovery: &Discovery, table: Option<String>) -> Result<Vec<String>> {
    match table {
        Some(table) => Ok(vec![table]),
        None => discovery.list_tables().await,
    }
}

/// Install capture triggers for one table or every replicated table.
///
/// With `drop`, existing triggers are replaced.
pub async fn setup_triggers(
    discovery: &Discovery,
    tracking: &ChangeTracking,
    table: Option<String>,
    drop: bool,
) -> Result<TriggerReport> {
    tracking.ensure_audit_table().await?;
    let tables = selected_tables(discovery, table).await?;
    info!("Setting up triggers for {} tables", tables.len());

    let mut schemas = Vec::with_capacity(tables.len());
    for table in &tables {
        schemas.push(discovery.table_schema(table).await?);
    }
    let report = tracking.setup_triggers(&schemas, drop).await?;
    for (trigger, error) in &report.failed {
        warn!("Trigger {trigger} was not created: {error}");
    }
    Ok(report)
}

pub async fn drop_triggers(
    discovery: &Discovery,
    tracking: &ChangeTracking,
    table: Option<String>,
) -> Result<usize> {
    let tables = selected_tables(discovery, table).await?;
    tracking.drop_triggers(&tables).await?;
    Ok(tables.len())
}
