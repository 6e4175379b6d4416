//! Closed classification of source column types.
//!
//! Every column discovered in the source catalog is classified into one
//! [`ColumnKind`]. Type mapping, default translation and value sanitization
//! all dispatch on this enum, so adding a source type means adding a variant
//! and letting the compiler point at every match that needs a new arm.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Source column classification.
///
/// Lengths, precision and scale live on [`crate::ColumnDef`]; only enum and
/// set columns carry data because their legal values are part of the type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum ColumnKind {
    /// `tinyint(1)`
    Bool,
    TinyInt,
    SmallInt,
    MediumInt,
    Int,
    BigInt,
    Float,
    Double,
    /// `decimal` / `numeric`
    Decimal,
    Char,
    VarChar,
    /// `tinytext` / `text` / `mediumtext` / `longtext`
    Text,
    /// `tinyblob` / `blob` / `mediumblob` / `longblob`
    Blob,
    /// `binary` / `varbinary`
    Binary,
    Date,
    DateTime,
    Timestamp,
    Time,
    Year,
    Enum(Vec<String>),
    Set(Vec<String>),
    Json,
    /// Anything the classifier does not recognise (spatial types, bit, ...).
    Other,
}

impl ColumnKind {
    /// Integer-valued kinds, including `year` and `tinyint(1)` booleans.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ColumnKind::Bool
                | ColumnKind::TinyInt
                | ColumnKind::SmallInt
                | ColumnKind::MediumInt
                | ColumnKind::Int
                | ColumnKind::BigInt
                | ColumnKind::Year
        )
    }

    /// Kinds stored in a 16-bit target column.
    pub fn is_small_integer(&self) -> bool {
        matches!(
            self,
            ColumnKind::TinyInt | ColumnKind::SmallInt | ColumnKind::Year
        )
    }

    pub fn is_floating(&self) -> bool {
        matches!(
            self,
            ColumnKind::Float | ColumnKind::Double | ColumnKind::Decimal
        )
    }

    /// Date, date-time and time-of-day kinds.
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            ColumnKind::Date | ColumnKind::DateTime | ColumnKind::Timestamp | ColumnKind::Time
        )
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, ColumnKind::Blob | ColumnKind::Binary)
    }

    /// Kinds whose values are carried as text.
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            ColumnKind::Char
                | ColumnKind::VarChar
                | ColumnKind::Text
                | ColumnKind::Enum(_)
                | ColumnKind::Set(_)
                | ColumnKind::Other
        )
    }

    /// Lowercase source type name used when a column definition is built
    /// without catalog metadata.
    pub fn source_name(&self) -> &'static str {
        match self {
            ColumnKind::Bool | ColumnKind::TinyInt => "tinyint",
            ColumnKind::SmallInt => "smallint",
            ColumnKind::MediumInt => "mediumint",
            ColumnKind::Int => "int",
            ColumnKind::BigInt => "bigint",
            ColumnKind::Float => "float",
            ColumnKind::Double => "double",
            ColumnKind::Decimal => "decimal",
            ColumnKind::Char => "char",
            ColumnKind::VarChar => "varchar",
            ColumnKind::Text => "text",
            ColumnKind::Blob => "blob",
            ColumnKind::Binary => "varbinary",
            ColumnKind::Date => "date",
            ColumnKind::DateTime => "datetime",
            ColumnKind::Timestamp => "timestamp",
            ColumnKind::Time => "time",
            ColumnKind::Year => "year",
            ColumnKind::Enum(_) => "enum",
            ColumnKind::Set(_) => "set",
            ColumnKind::Json => "json",
            ColumnKind::Other => "other",
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKind::Bool => write!(f, "tinyint(1)"),
            ColumnKind::Enum(values) | ColumnKind::Set(values) => {
                let quoted: Vec<String> = values.iter().map(|v| format!("'{v}'")).collect();
                write!(f, "{}({})", self.source_name(), quoted.join(","))
            }
            other => write!(f, "{}", other.source_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_predicates() {
        assert!(ColumnKind::Bool.is_integer());
        assert!(ColumnKind::Year.is_small_integer());
        assert!(!ColumnKind::Int.is_small_integer());
        assert!(ColumnKind::Decimal.is_floating());
        assert!(ColumnKind::Timestamp.is_temporal());
        assert!(ColumnKind::Blob.is_binary());
        assert!(ColumnKind::Enum(vec!["a".into()]).is_textual());
        assert!(!ColumnKind::Json.is_textual());
    }

    #[test]
    fn test_display() {
        assert_eq!(ColumnKind::Bool.to_string(), "tinyint(1)");
        assert_eq!(
            ColumnKind::Enum(vec!["draft".into(), "live".into()]).to_string(),
            "enum('draft','live')"
        );
        assert_eq!(ColumnKind::BigInt.to_string(), "bigint");
    }
}
