//! `tokio-postgres` implementation of [`PostgresSink`].

use anyhow::{anyhow, Context, Result};
use postgresql_types::{PgCatalogColumn, TargetTable};
use std::sync::Arc;
use sync_core::ColumnDef;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

use crate::errors::describe_pg_error;
use crate::traits::PostgresSink;

/// PostgreSQL target behind a single client connection.
///
/// The client sits behind an async mutex so that transactions (which need
/// `&mut Client`) and session settings apply to one connection at a time.
#[derive(Clone)]
pub struct PostgresTarget {
    client: Arc<Mutex<Client>>,
    schema: String,
}

impl PostgresTarget {
    /// Connect and spawn the connection driver task.
    pub async fn connect(connection_string: &str, schema: impl Into<String>) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to PostgreSQL: {}", describe_pg_error(&e)))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {e}");
            }
        });

        info!("Connected to PostgreSQL target");
        Ok(Self::from_client(client, schema))
    }

    pub fn from_client(client: Client, schema: impl Into<String>) -> Self {
        Self {
            client: Arc::new(Mutex::new(client)),
            schema: schema.into(),
        }
    }
}

fn pg_err(e: tokio_postgres::Error) -> anyhow::Error {
    anyhow!(describe_pg_error(&e))
}

async fn schema_tables(client: &Client, schema: &str) -> Result<Vec<String>> {
    let rows = client
        .query(
            "SELECT tablename::text FROM pg_tables WHERE schemaname = $1 ORDER BY tablename",
            &[&schema],
        )
        .await
        .map_err(pg_err)?;
    rows.iter()
        .map(|r| r.try_get::<_, String>(0).map_err(pg_err))
        .collect()
}

#[async_trait::async_trait]
impl PostgresSink for PostgresTarget {
    fn schema(&self) -> &str {
        &self.schema
    }

    async fn table_exists(&self, table: &TargetTable) -> Result<bool> {
        let client = self.client.lock().await;
        let row = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_name = $2 AND table_type = 'BASE TABLE')",
                &[&table.schema, &table.name],
            )
            .await
            .map_err(pg_err)?;
        row.try_get(0).map_err(pg_err)
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        let client = self.client.lock().await;
        client.batch_execute(sql).await.map_err(pg_err)
    }

    async fn execute_in_transaction(&self, statements: &[String]) -> Result<()> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(pg_err)?;
        for sql in statements {
            debug!("{sql}");
            // Dropping `tx` on error rolls back.
            tx.batch_execute(sql).await.map_err(pg_err)?;
        }
        tx.commit().await.map_err(pg_err)
    }

    async fn live_columns(&self, table: &TargetTable) -> Result<Vec<ColumnDef>> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT column_name::text, data_type::text, is_nullable::text, \
                 column_default::text, character_maximum_length::int4, \
                 numeric_precision::int4, numeric_scale::int4 \
                 FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2 \
                 ORDER BY ordinal_position",
                &[&table.schema, &table.name],
            )
            .await
            .map_err(pg_err)
            .with_context(|| format!("Failed to read columns of {table}"))?;

        rows.iter()
            .map(|r| -> Result<ColumnDef> {
                Ok(PgCatalogColumn {
                    name: r.try_get(0).map_err(pg_err)?,
                    data_type: r.try_get(1).map_err(pg_err)?,
                    is_nullable: r.try_get(2).map_err(pg_err)?,
                    default: r.try_get(3).map_err(pg_err)?,
                    max_length: r.try_get(4).map_err(pg_err)?,
                    precision: r.try_get(5).map_err(pg_err)?,
                    scale: r.try_get(6).map_err(pg_err)?,
                }
                .into_column_def())
            })
            .collect()
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let client = self.client.lock().await;
        schema_tables(&client, &self.schema).await
    }

    async fn drop_all_tables(&self) -> Result<usize> {
        let client = self.client.lock().await;
        let tables = schema_tables(&client, &self.schema).await?;

        client
            .batch_execute("SET session_replication_role = replica")
            .await
            .map_err(pg_err)?;

        let mut dropped = 0;
        for name in &tables {
            let sql = format!(
                "DROP TABLE IF EXISTS {} CASCADE",
                TargetTable::new(self.schema.as_str(), name.as_str())
            );
            match client.batch_execute(&sql).await {
                Ok(()) => {
                    debug!("Dropped target table {name}");
                    dropped += 1;
                }
                Err(e) => error!("Failed to drop {name}: {}", describe_pg_error(&e)),
            }
        }

        client
            .batch_execute("SET session_replication_role = DEFAULT")
            .await
            .map_err(pg_err)?;
        Ok(dropped)
    }
}
