//! PostgreSQL type handling for the replication engine.
//!
//! # Modules
//!
//! - [`ddl`] - source column → PostgreSQL type, `DEFAULT` and `CREATE TABLE`
//! - [`sanitize`] - runtime values → values the target column accepts
//! - [`sql`] - literal and statement rendering
//! - [`catalog`] - target `information_schema` rows → column definitions
//!
//! # Example
//!
//! ```
//! use postgresql_types::{sanitize_value, PostgreSQLDdl, ToDdl};
//! use sync_core::{ColumnDef, ColumnKind, Value};
//!
//! let column = ColumnDef::new("qty", ColumnKind::SmallInt).not_null();
//! assert_eq!(PostgreSQLDdl.to_ddl(&column), "SMALLINT");
//! assert_eq!(sanitize_value(Value::Int(99_999), &column), Value::Int(0));
//! ```

pub mod catalog;
pub mod ddl;
pub mod sanitize;
pub mod sql;

pub use catalog::{pg_column_kind, PgCatalogColumn};
pub use ddl::{
    column_default, is_nullable, is_zero_date, should_force_nullable, PostgreSQLDdl, ToDdl,
};
pub use sanitize::{safe_default, sanitize_checked, sanitize_value, type_default, ValueSanitizer};
pub use sql::{
    delete_sql, insert_sql, literal, quote_ident, quote_literal, update_sql, where_clause,
    TargetTable,
};
