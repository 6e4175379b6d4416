//! MySQL trigger-based change capture
//!
//! Each replicated table gets three `AFTER INSERT/UPDATE/DELETE` row triggers
//! that append one row per change to the audit table. The audit rows carry
//! the primary key as `col:value[,col:value...]` plus `JSON_OBJECT` snapshots
//! of the row images.

use anyhow::{Context, Result};
use mysql_async::prelude::*;
use mysql_async::Pool;
use sync_core::{Operation, TableSchema};
use tracing::{info, warn};

/// `CREATE TABLE IF NOT EXISTS` for the audit table.
pub fn audit_table_ddl(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
            table_name VARCHAR(64) NOT NULL,
            record_id VARCHAR(255) NULL,
            operation ENUM('INSERT', 'UPDATE', 'DELETE') NOT NULL,
            old_data JSON NULL,
            new_data JSON NULL,
            synced TINYINT(1) NOT NULL DEFAULT 0,
            synced_at TIMESTAMP NULL,
            error_message TEXT NULL,
            retry_count INT NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            INDEX idx_table_name (table_name),
            INDEX idx_operation (operation),
            INDEX idx_created_at (created_at),
            INDEX idx_sync_status (synced, created_at),
            INDEX idx_table_sync (table_name, synced)
        )",
        quote_mysql_ident(table)
    )
}

/// Backtick-quoted identifier.
pub fn quote_mysql_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn mysql_string(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
}

pub fn trigger_name(table: &str, operation: Operation) -> String {
    format!("{table}_after_{}_trigger", operation.as_str())
}

/// `CONCAT('a:', COALESCE(NEW.`a`, 'NULL'), ',', 'b:', ...)`, or `NULL`
/// when the table has no primary key.
pub fn record_id_expr(primary_key: &[String], alias: &str) -> String {
    if primary_key.is_empty() {
        return "NULL".to_string();
    }
    let parts: Vec<String> = primary_key
        .iter()
        .map(|pk| {
            format!(
                "{}, COALESCE({alias}.{}, 'NULL')",
                mysql_string(&format!("{pk}:")),
                quote_mysql_ident(pk)
            )
        })
        .collect();
    format!("CONCAT({})", parts.join(", ',', "))
}

/// `JSON_OBJECT('a', NEW.`a`, ...)` over every column.
pub fn json_object_expr(columns: &[&str], alias: &str) -> String {
    let pairs: Vec<String> = columns
        .iter()
        .map(|c| format!("{}, {alias}.{}", mysql_string(c), quote_mysql_ident(c)))
        .collect();
    format!("JSON_OBJECT({})", pairs.join(", "))
}

/// `CREATE TRIGGER` statement for one table and operation.
pub fn trigger_sql(audit_table: &str, schema: &TableSchema, operation: Operation) -> String {
    let columns = schema.column_names();
    let (key_alias, old_data, new_data) = match operation {
        Operation::Insert => ("NEW", "NULL".to_string(), json_object_expr(&columns, "NEW")),
        Operation::Update => (
            "NEW",
            json_object_expr(&columns, "OLD"),
            json_object_expr(&columns, "NEW"),
        ),
        Operation::Delete => ("OLD", json_object_expr(&columns, "OLD"), "NULL".to_string()),
    };

    format!(
        "CREATE TRIGGER {trigger}
AFTER {op} ON {table}
FOR EACH ROW
BEGIN
    INSERT INTO {audit} (
        table_name, record_id, operation, old_data, new_data, synced, retry_count, created_at
    ) VALUES (
        {table_literal},
        {record_id},
        '{op}',
        {old_data},
        {new_data},
        FALSE,
        0,
        NOW()
    );
END",
        trigger = quote_mysql_ident(&trigger_name(&schema.name, operation)),
        op = operation.as_str(),
        table = quote_mysql_ident(&schema.name),
        audit = quote_mysql_ident(audit_table),
        table_literal = mysql_string(&schema.name),
        record_id = record_id_expr(&schema.primary_key, key_alias),
    )
}

/// Outcome of a trigger installation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerReport {
    pub created: usize,
    pub already_present: usize,
    pub failed: Vec<(String, String)>,
}

/// Installs and removes capture triggers on the source.
pub struct ChangeTracking {
    pool: Pool,
    audit_table: String,
}

impl ChangeTracking {
    pub fn new(pool: Pool, audit_table: impl Into<String>) -> Self {
        Self {
            pool,
            audit_table: audit_table.into(),
        }
    }

    pub async fn ensure_audit_table(&self) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        conn.query_drop(audit_table_ddl(&self.audit_table))
            .await
            .with_context(|| format!("Failed to create audit table {}", self.audit_table))?;
        Ok(())
    }

    /// Create the three triggers for every table.
    ///
    /// With `replace`, existing triggers are dropped first; otherwise an
    /// already existing trigger is logged and left alone.
    pub async fn setup_triggers(
        &self,
        schemas: &[TableSchema],
        replace: bool,
    ) -> Result<TriggerReport> {
        let mut conn = self.pool.get_conn().await?;
        let mut report = TriggerReport::default();

        for schema in schemas {
            if replace {
                drop_table_triggers(&mut conn, &schema.name).await?;
            }
            for operation in Operation::ALL {
                let name = trigger_name(&schema.name, operation);
                match conn
                    .query_drop(trigger_sql(&self.audit_table, schema, operation))
                    .await
                {
                    Ok(()) => {
                        info!("Created {operation} trigger for table: {}", schema.name);
                        report.created += 1;
                    }
                    Err(e) if e.to_string().contains("already exists") => {
                        info!("{operation} trigger already exists for table: {}", schema.name);
                        report.already_present += 1;
                    }
                    Err(e) => {
                        warn!("Failed to create {operation} trigger for {}: {e}", schema.name);
                        report.failed.push((name, e.to_string()));
                    }
                }
            }
        }

        info!(
            "MySQL trigger-based change tracking setup completed: {} \
             created, {} already present, {} failed",
            report.created,
            report.already_present,
            report.failed.len()
        );
        Ok(report)
    }

    pub async fn drop_triggers(&self, tables: &[String]) -> Result<()> {
        let mut conn = self.pool.get_conn().await?;
        for table in tables {
            drop_table_triggers(&mut conn, table).await?;
            info!("Dropped triggers for table: {table}");
        }
        Ok(())
    }
}

async fn drop_table_triggers(conn: &mut mysql_async::Conn, table: &str) -> Result<()> {
    for operation in Operation::ALL {
        let name = trigger_name(table, operation);
        conn.query_drop(format!("DROP TRIGGER IF EXISTS {}", quote_mysql_ident(&name)))
            .await
            .with_context(|| format!("Failed to drop trigger {name}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::{ColumnDef, ColumnKind};

    fn users() -> TableSchema {
        TableSchema::new(
            "users",
            vec![
                ColumnDef::new("id", ColumnKind::Int).not_null(),
                ColumnDef::new("email", ColumnKind::VarChar),
            ],
        )
        .with_primary_key(["id"])
    }

    #[test]
    fn test_trigger_names() {
        assert_eq!(trigger_name("users", Operation::Insert), "users_after_INSERT_trigger");
        assert_eq!(trigger_name("users", Operation::Delete), "users_after_DELETE_trigger");
    }

    #[test]
    fn test_record_id_expr() {
        assert_eq!(
            record_id_expr(&["id".to_string()], "NEW"),
            "CONCAT('id:', COALESCE(NEW.`id`, 'NULL'))"
        );
        assert_eq!(
            record_id_expr(&["tenant".to_string(), "id".to_string()], "OLD"),
            "CONCAT('tenant:', COALESCE(OLD.`tenant`, 'NULL'), \
             ',', 'id:', COALESCE(OLD.`id`, 'NULL'))"
        );
        assert_eq!(record_id_expr(&[], "NEW"), "NULL");
    }

    #[test]
    fn test_update_trigger_uses_post_image_key_and_both_images() {
        let sql = trigger_sql("sync_audit_log", &users(), Operation::Update);
        assert!(sql.starts_with("CREATE TRIGGER `users_after_UPDATE_trigger`"));
        assert!(sql.contains("AFTER UPDATE ON `users`"));
        assert!(sql.contains("INSERT INTO `sync_audit_log`"));
        assert!(sql.contains("CONCAT('id:', COALESCE(NEW.`id`, 'NULL'))"));
        assert!(sql.contains("JSON_OBJECT('id', OLD.`id`, 'email', OLD.`email`)"));
        assert!(sql.contains("JSON_OBJECT('id', NEW.`id`, 'email', NEW.`email`)"));
    }

    #[test]
    fn test_insert_and_delete_images() {
        let insert = trigger_sql("audit", &users(), Operation::Insert);
        assert!(insert.contains("'INSERT',\n        NULL,\n        JSON_OBJECT("));

        let delete = trigger_sql("audit", &users(), Operation::Delete);
        assert!(delete.contains("COALESCE(OLD.`id`, 'NULL')"));
        assert!(delete.contains("'DELETE',\n        JSON_OBJECT("));
        assert!(delete.contains("),\n        NULL,\n        FALSE"));
    }

    #[test]
    fn test_table_without_primary_key() {
        let log = TableSchema::new("log", vec![ColumnDef::new("msg", ColumnKind::Text)]);
        let sql = trigger_sql("audit", &log, Operation::Insert);
        assert!(sql.contains("'log',\n        NULL,\n        'INSERT'"));
    }

    #[test]
    fn test_audit_table_ddl() {
        let ddl = audit_table_ddl("sync_audit_log");
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS `sync_audit_log`"));
        assert!(ddl.contains("operation ENUM('INSERT', 'UPDATE', 'DELETE') NOT NULL"));
        assert!(ddl.contains("retry_count INT NOT NULL DEFAULT 0"));
    }
}
