//! PostgresSink trait definition.

use anyhow::Result;
use postgresql_types::TargetTable;
use sync_core::ColumnDef;

/// Trait for writing to the PostgreSQL target.
///
/// Errors returned from `execute` and `execute_in_transaction` carry the
/// server's SQLSTATE, message and detail in their display text, which is what
/// `extract_failed_columns` parses.
#[async_trait::async_trait]
pub trait PostgresSink: Send + Sync {
    /// Schema every target table lives in.
    fn schema(&self) -> &str;

    /// Whether `table` exists as a base table.
    async fn table_exists(&self, table: &TargetTable) -> Result<bool>;

    /// Run one or more statements through the simple query protocol.
    async fn execute(&self, sql: &str) -> Result<()>;

    /// Run `statements` in order inside one transaction.
    ///
    /// Any failure rolls the whole transaction back.
    async fn execute_in_transaction(&self, statements: &[String]) -> Result<()>;

    /// Current column definitions of `table`, in ordinal order.
    async fn live_columns(&self, table: &TargetTable) -> Result<Vec<ColumnDef>>;

    /// Base tables of the target schema, sorted by name.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Drop every table of the target schema with foreign-key enforcement
    /// suspended. A table that fails to drop is logged and skipped; returns
    /// the number of tables dropped.
    async fn drop_all_tables(&self) -> Result<usize>;

    /// Qualify a bare table name with the target schema.
    fn target(&self, table: &str) -> TargetTable {
        TargetTable::new(self.schema(), table)
    }
}
