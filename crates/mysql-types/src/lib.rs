//! MySQL type conversions for sync-core types.
//!
//! # Structure
//!
//! - `schema`: `INFORMATION_SCHEMA` column metadata → `ColumnKind` / `ColumnDef`
//! - `reverse`: MySQL wire values → `sync_core::Value` (for reading rows)
//!
//! # Example
//!
//! ```rust
//! use mysql_types::{from_mysql_value, mysql_column_kind};
//! use sync_core::{ColumnKind, Value};
//!
//! let kind = mysql_column_kind("tinyint", "tinyint(1)");
//! assert_eq!(kind, ColumnKind::Bool);
//!
//! let value = from_mysql_value(mysql_async::Value::Int(1), &kind);
//! assert_eq!(value, Value::Int(1));
//! ```

pub mod reverse;
pub mod schema;

pub use reverse::{from_mysql_value, mysql_datetime, row_from_mysql, ConversionError};
pub use schema::{mysql_column_kind, CatalogColumn};
