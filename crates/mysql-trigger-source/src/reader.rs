//! Paged reads of source tables for the backfill.

use anyhow::{Context, Result};
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::Pool;
use mysql_types::row_from_mysql;
use sync_core::{Row, TableSchema};

use crate::change_tracking::quote_mysql_ident;

#[async_trait]
pub trait TableReader: Send + Sync {
    async fn count_rows(&self, table: &str) -> Result<u64>;

    /// Up to `limit` rows starting at `offset`, ordered by primary key when
    /// the table has one.
    async fn fetch_page(&self, schema: &TableSchema, offset: u64, limit: u64) -> Result<Vec<Row>>;
}

pub struct MySQLTableReader {
    pool: Pool,
}

impl MySQLTableReader {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

/// `SELECT` for one page, with the column list in schema order.
pub fn page_query(schema: &TableSchema) -> String {
    let columns: Vec<String> = schema
        .columns
        .iter()
        .map(|c| quote_mysql_ident(&c.name))
        .collect();
    let mut sql = format!(
        "SELECT {} FROM {}",
        columns.join(", "),
        quote_mysql_ident(&schema.name)
    );
    if schema.has_primary_key() {
        let keys: Vec<String> = schema
            .primary_key
            .iter()
            .map(|k| quote_mysql_ident(k))
            .collect();
        sql.push_str(&format!(" ORDER BY {}", keys.join(", ")));
    }
    sql.push_str(" LIMIT ? OFFSET ?");
    sql
}

#[async_trait]
impl TableReader for MySQLTableReader {
    async fn count_rows(&self, table: &str) -> Result<u64> {
        let mut conn = self.pool.get_conn().await?;
        let count: Option<u64> = conn
            .query_first(format!("SELECT COUNT(*) FROM {}", quote_mysql_ident(table)))
            .await
            .with_context(|| format!("Failed to count rows of {table}"))?;
        Ok(count.unwrap_or(0))
    }

    async fn fetch_page(&self, schema: &TableSchema, offset: u64, limit: u64) -> Result<Vec<Row>> {
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<mysql_async::Row> = conn
            .exec(page_query(schema), (limit, offset))
            .await
            .with_context(|| format!("Failed to read {} at offset {offset}", schema.name))?;
        rows.into_iter()
            .map(|row| row_from_mysql(row, schema).map_err(anyhow::Error::from))
            .collect()
    }
}
