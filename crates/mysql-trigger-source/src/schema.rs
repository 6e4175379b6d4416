//! MySQL schema discovery
//!
//! This module lists the replicated tables, reads their catalog metadata
//! (columns, primary key, foreign keys) and caches the resulting
//! [`TableSchema`] snapshots for the duration of one run.

use anyhow::{Context, Result};
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::Pool;
use mysql_types::CatalogColumn;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use sync_core::{ColumnDef, ForeignKeyRef, SyncConfig, SyncError, TableSchema};
use tracing::debug;

use crate::dependency::DependencyGraph;

/// Catalog queries against the source schema.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Base tables of the source schema, unfiltered.
    async fn base_tables(&self) -> Result<Vec<String>>;

    /// Columns in ordinal order.
    async fn columns(&self, table: &str) -> Result<Vec<ColumnDef>>;

    /// Primary key columns in key order.
    async fn primary_key(&self, table: &str) -> Result<Vec<String>>;

    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyRef>>;
}

/// `information_schema` access scoped to the connection's current database.
pub struct MySQLCatalog {
    pool: Pool,
}

impl MySQLCatalog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

type ColumnRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    Option<u64>,
    Option<u64>,
    Option<u64>,
);

#[async_trait]
impl SchemaSource for MySQLCatalog {
    async fn base_tables(&self) -> Result<Vec<String>> {
        let mut conn = self.pool.get_conn().await?;
        let tables: Vec<String> = conn
            .query(
                "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'
                 ORDER BY TABLE_NAME",
            )
            .await
            .context("Failed to list source tables")?;
        Ok(tables)
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnDef>> {
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<ColumnRow> = conn
            .exec(
                "SELECT COLUMN_NAME, DATA_TYPE, COLUMN_TYPE, IS_NULLABLE, COLUMN_DEFAULT, EXTRA,
                        CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION, NUMERIC_SCALE
                 FROM INFORMATION_SCHEMA.COLUMNS
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
                 ORDER BY ORDINAL_POSITION",
                (table,),
            )
            .await
            .with_context(|| format!("Failed to read columns of {table}"))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                CatalogColumn {
                    name: row.0,
                    data_type: row.1,
                    column_type: row.2,
                    is_nullable: row.3,
                    default: row.4,
                    extra: row.5,
                    max_length: row.6,
                    precision: row.7,
                    scale: row.8,
                }
                .into_column_def()
            })
            .collect())
    }

    async fn primary_key(&self, table: &str) -> Result<Vec<String>> {
        let mut conn = self.pool.get_conn().await?;
        let columns: Vec<String> = conn
            .exec(
                "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
                   AND CONSTRAINT_NAME = 'PRIMARY'
                 ORDER BY ORDINAL_POSITION",
                (table,),
            )
            .await
            .with_context(|| format!("Failed to read primary key of {table}"))?;
        Ok(columns)
    }

    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyRef>> {
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<(String, String, String)> = conn
            .exec(
                "SELECT COLUMN_NAME, REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME
                 FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
                   AND REFERENCED_TABLE_NAME IS NOT NULL
                 ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION",
                (table,),
            )
            .await
            .with_context(|| format!("Failed to read foreign keys of {table}"))?;
        Ok(rows
            .into_iter()
            .map(|(column, referenced_table, referenced_column)| ForeignKeyRef {
                column,
                referenced_table,
                referenced_column,
            })
            .collect())
    }
}

/// Include/exclude rules for table names.
#[derive(Debug, Clone)]
pub struct TableFilter {
    /// `None` includes everything
    include: Option<Regex>,
    excluded: BTreeSet<String>,
}

impl TableFilter {
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        let pattern = config.tables.include.trim();
        let include = if pattern == "*" {
            None
        } else {
            Some(Regex::new(pattern).map_err(|e| {
                SyncError::InvalidConfig(format!("invalid table include pattern {pattern:?}: {e}"))
            })?)
        };
        Ok(Self {
            include,
            excluded: config.excluded_tables(),
        })
    }

    pub fn matches(&self, table: &str) -> bool {
        if self.excluded.contains(table) {
            return false;
        }
        self.include.as_ref().map_or(true, |re| re.is_match(table))
    }
}

/// Table listing plus a per-run schema cache.
pub struct Discovery {
    source: Arc<dyn SchemaSource>,
    filter: TableFilter,
    cache: Mutex<HashMap<String, TableSchema>>,
}

impl Discovery {
    pub fn new(source: Arc<dyn SchemaSource>, config: &SyncConfig) -> Result<Self, SyncError> {
        Ok(Self {
            source,
            filter: TableFilter::from_config(config)?,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Replicated tables, sorted by name.
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let mut tables: Vec<String> = self
            .source
            .base_tables()
            .await?
            .into_iter()
            .filter(|t| self.filter.matches(t))
            .collect();
        tables.sort();
        Ok(tables)
    }

    /// Full snapshot of `table`, read from the catalog once per run.
    pub async fn table_schema(&self, table: &str) -> Result<TableSchema> {
        if let Some(cached) = self.cached(table) {
            return Ok(cached);
        }

        let columns = self.source.columns(table).await?;
        if columns.is_empty() {
            return Err(SyncError::TableNotFound(table.to_string()).into());
        }
        let schema = TableSchema {
            name: table.to_string(),
            columns,
            primary_key: self.source.primary_key(table).await?,
            foreign_keys: self.source.foreign_keys(table).await?,
        };
        debug!(
            "Discovered {table}: {} columns, primary key {:?}",
            schema.columns.len(),
            schema.primary_key
        );

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(table.to_string(), schema.clone());
        }
        Ok(schema)
    }

    fn cached(&self, table: &str) -> Option<TableSchema> {
        self.cache.lock().ok()?.get(table).cloned()
    }

    pub async fn dependency_graph(&self, tables: &[String]) -> Result<DependencyGraph> {
        let mut schemas = Vec::with_capacity(tables.len());
        for table in tables {
            schemas.push(self.table_schema(table).await?);
        }
        Ok(DependencyGraph::build(&schemas))
    }

    /// `tables` reordered so referenced tables load first.
    pub async fn topological_order(&self, tables: &[String]) -> Result<Vec<String>> {
        Ok(self.dependency_graph(tables).await?.topological_order()?)
    }

    /// Forget every cached snapshot.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCatalog;
    use sync_core::ColumnKind;

    fn config(include: &str) -> SyncConfig {
        let mut config = SyncConfig::default();
        config.tables.include = include.to_string();
        config
    }

    fn catalog() -> Arc<FakeCatalog> {
        let catalog = FakeCatalog::new();
        for name in [
            "users",
            "orders",
            "migrations",
            "sync_audit_log",
            "sync_progress",
            "user_roles",
        ] {
            catalog.add(
                TableSchema::new(name, vec![ColumnDef::new("id", ColumnKind::Int).not_null()])
                    .with_primary_key(["id"]),
            );
        }
        Arc::new(catalog)
    }

    #[tokio::test]
    async fn test_list_tables_excludes_bookkeeping_and_configured() {
        let discovery = Discovery::new(catalog(), &config("*")).unwrap();
        assert_eq!(
            discovery.list_tables().await.unwrap(),
            vec!["orders", "user_roles", "users"]
        );
    }

    #[tokio::test]
    async fn test_include_pattern_matches_anywhere() {
        let discovery = Discovery::new(catalog(), &config("user")).unwrap();
        assert_eq!(
            discovery.list_tables().await.unwrap(),
            vec!["user_roles", "users"]
        );
    }

    #[test]
    fn test_invalid_include_pattern() {
        assert!(matches!(
            TableFilter::from_config(&config("(")),
            Err(SyncError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_schema_is_cached_per_run() {
        let source = catalog();
        let discovery = Discovery::new(source.clone(), &config("*")).unwrap();
        discovery.table_schema("users").await.unwrap();
        discovery.table_schema("users").await.unwrap();
        assert_eq!(source.column_queries(), 1);

        discovery.clear_cache();
        discovery.table_schema("users").await.unwrap();
        assert_eq!(source.column_queries(), 2);
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let discovery = Discovery::new(catalog(), &config("*")).unwrap();
        let err = discovery.table_schema("ghost").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::TableNotFound(_))
        ));
    }
}
