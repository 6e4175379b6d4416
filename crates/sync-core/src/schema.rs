//! Table and column metadata discovered from a database catalog.
//!
//! A [`TableSchema`] is a read-only snapshot: it is fetched on demand, may be
//! memoized for the duration of one run, and is never persisted.

use crate::types::ColumnKind;
use serde::{Deserialize, Serialize};

// ============================================================================
// Columns
// ============================================================================

/// Column definition as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name
    pub name: String,

    /// Lowercase catalog data type (`DATA_TYPE`), e.g. `varchar`
    pub data_type: String,

    /// Full type string (`COLUMN_TYPE`), e.g. `varchar(255)` or `enum('a','b')`
    pub column_type: String,

    /// Classified kind
    pub kind: ColumnKind,

    /// Whether the source declares the column nullable
    pub nullable: bool,

    /// Raw declared default expression, `None` when the catalog reports NULL
    pub default: Option<String>,

    /// Character length for string columns
    pub max_length: Option<u64>,

    /// Numeric precision
    pub precision: Option<u32>,

    /// Numeric scale
    pub scale: Option<u32>,

    pub is_auto_increment: bool,
}

impl ColumnDef {
    /// Create a nullable column without a default.
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        let data_type = kind.source_name().to_string();
        let column_type = kind.to_string();
        Self {
            name: name.into(),
            data_type,
            column_type,
            kind,
            nullable: true,
            default: None,
            max_length: None,
            precision: None,
            scale: None,
            is_auto_increment: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_max_length(mut self, max_length: u64) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn with_precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.is_auto_increment = true;
        self
    }
}

// ============================================================================
// Tables
// ============================================================================

/// One foreign key column and the column it references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// Snapshot of one table's structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    /// Columns in ordinal order
    pub columns: Vec<ColumnDef>,
    /// Primary key column names in key order; empty when the table has none
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyRef>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_foreign_key(
        mut self,
        column: impl Into<String>,
        referenced_table: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        self.foreign_keys.push(ForeignKeyRef {
            column: column.into(),
            referenced_table: referenced_table.into(),
            referenced_column: referenced_column.into(),
        });
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Tables this table references, in declaration order, without duplicates.
    pub fn referenced_tables(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for fk in &self.foreign_keys {
            if !out.contains(&fk.referenced_table.as_str()) {
                out.push(fk.referenced_table.as_str());
            }
        }
        out
    }
}
