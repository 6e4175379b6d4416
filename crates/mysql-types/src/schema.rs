//! MySQL catalog type classification.
//!
//! Maps `INFORMATION_SCHEMA.COLUMNS` rows onto [`ColumnKind`] and
//! [`ColumnDef`].

use sync_core::{ColumnDef, ColumnKind};

/// Classify a column from its `DATA_TYPE` and `COLUMN_TYPE`.
///
/// ```
/// use mysql_types::mysql_column_kind;
/// use sync_core::ColumnKind;
///
/// assert_eq!(mysql_column_kind("INT", "int(11)"), ColumnKind::Int);
/// // TINYINT(1) is the MySQL boolean convention
/// assert_eq!(mysql_column_kind("tinyint", "tinyint(1)"), ColumnKind::Bool);
/// ```
pub fn mysql_column_kind(data_type: &str, column_type: &str) -> ColumnKind {
    match data_type.to_lowercase().as_str() {
        "tinyint" => {
            if column_type.to_lowercase().starts_with("tinyint(1)") {
                ColumnKind::Bool
            } else {
                ColumnKind::TinyInt
            }
        }
        "bool" | "boolean" => ColumnKind::Bool,
        "smallint" => ColumnKind::SmallInt,
        "mediumint" => ColumnKind::MediumInt,
        "int" | "integer" => ColumnKind::Int,
        "bigint" => ColumnKind::BigInt,
        "float" => ColumnKind::Float,
        "double" | "real" => ColumnKind::Double,
        "decimal" | "numeric" => ColumnKind::Decimal,

        "char" => ColumnKind::Char,
        "varchar" => ColumnKind::VarChar,
        "tinytext" | "text" | "mediumtext" | "longtext" => ColumnKind::Text,

        "tinyblob" | "blob" | "mediumblob" | "longblob" => ColumnKind::Blob,
        "binary" | "varbinary" => ColumnKind::Binary,

        "date" => ColumnKind::Date,
        "datetime" => ColumnKind::DateTime,
        "timestamp" => ColumnKind::Timestamp,
        "time" => ColumnKind::Time,
        "year" => ColumnKind::Year,

        "enum" => ColumnKind::Enum(extract_set_or_enum_values(column_type)),
        "set" => ColumnKind::Set(extract_set_or_enum_values(column_type)),
        "json" => ColumnKind::Json,

        _ => ColumnKind::Other,
    }
}

/// One `INFORMATION_SCHEMA.COLUMNS` row.
#[derive(Debug, Clone, Default)]
pub struct CatalogColumn {
    pub name: String,
    pub data_type: String,
    pub column_type: String,
    pub is_nullable: String,
    pub default: Option<String>,
    pub extra: String,
    pub max_length: Option<u64>,
    pub precision: Option<u64>,
    pub scale: Option<u64>,
}

impl CatalogColumn {
    pub fn into_column_def(self) -> ColumnDef {
        let kind = mysql_column_kind(&self.data_type, &self.column_type);
        let sized = matches!(
            kind,
            ColumnKind::Char | ColumnKind::VarChar | ColumnKind::Binary
        );
        let max_length = self.max_length.or_else(|| {
            sized
                .then(|| extract_length_from_column_type(&self.column_type))
                .flatten()
        });
        ColumnDef {
            nullable: self.is_nullable.eq_ignore_ascii_case("YES"),
            is_auto_increment: self.extra.to_lowercase().contains("auto_increment"),
            data_type: self.data_type.to_lowercase(),
            column_type: self.column_type,
            name: self.name,
            kind,
            default: self.default,
            max_length,
            precision: self.precision.map(|p| p.min(u32::MAX as u64) as u32),
            scale: self.scale.map(|s| s.min(u32::MAX as u64) as u32),
        }
    }
}

/// Extract the first parenthesised number from a type string.
///
/// E.g., "varchar(255)" -> Some(255), "decimal(10,2)" -> Some(10)
fn extract_length_from_column_type(column_type: &str) -> Option<u64> {
    let start = column_type.find('(')?;
    let end = column_type[start..].find(')')? + start;
    let inner = &column_type[start + 1..end];
    inner.split(',').next()?.trim().parse().ok()
}

/// Extract the legal values of an `enum(...)` or `set(...)` type string.
///
/// Quoted values may contain commas and doubled quotes:
/// `enum('a,b','it''s')` -> `["a,b", "it's"]`
fn extract_set_or_enum_values(column_type: &str) -> Vec<String> {
    let (Some(start), Some(end)) = (column_type.find('('), column_type.rfind(')')) else {
        return Vec::new();
    };
    if start >= end {
        return Vec::new();
    }

    let mut values = Vec::new();
    let mut chars = column_type[start + 1..end].chars().peekable();
    let mut current = String::new();
    let mut in_quote = false;
    while let Some(c) = chars.next() {
        match (c, in_quote) {
            ('\'', false) => in_quote = true,
            ('\'', true) => {
                if chars.peek() == Some(&'\'') {
                    current.push('\'');
                    chars.next();
                } else {
                    in_quote = false;
                    values.push(std::mem::take(&mut current));
                }
            }
            ('\\', true) => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            (c, true) => current.push(c),
            _ => {}
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_int_types() {
        assert_eq!(mysql_column_kind("TINYINT", "tinyint(4)"), ColumnKind::TinyInt);
        assert_eq!(mysql_column_kind("SMALLINT", "smallint(6)"), ColumnKind::SmallInt);
        assert_eq!(mysql_column_kind("mediumint", "mediumint"), ColumnKind::MediumInt);
        assert_eq!(mysql_column_kind("INTEGER", "int(11)"), ColumnKind::Int);
        assert_eq!(mysql_column_kind("bigint", "bigint unsigned"), ColumnKind::BigInt);
    }

    #[test]
    fn test_mysql_tinyint1_bool() {
        assert_eq!(mysql_column_kind("tinyint", "tinyint(1)"), ColumnKind::Bool);
        assert_eq!(
            mysql_column_kind("tinyint", "tinyint(1) unsigned"),
            ColumnKind::Bool
        );
    }

    #[test]
    fn test_enum_values_with_commas_and_quotes() {
        assert_eq!(
            mysql_column_kind("enum", "enum('small','a,b','it''s')"),
            ColumnKind::Enum(vec!["small".into(), "a,b".into(), "it's".into()])
        );
        assert_eq!(
            mysql_column_kind("set", "set('x','y')"),
            ColumnKind::Set(vec!["x".into(), "y".into()])
        );
    }

    #[test]
    fn test_unknown_type_is_other() {
        assert_eq!(mysql_column_kind("geometry", "geometry"), ColumnKind::Other);
        assert_eq!(mysql_column_kind("bit", "bit(8)"), ColumnKind::Other);
    }

    #[test]
    fn test_catalog_column_into_def() {
        let def = CatalogColumn {
            name: "id".into(),
            data_type: "INT".into(),
            column_type: "int(10) unsigned".into(),
            is_nullable: "NO".into(),
            default: None,
            extra: "auto_increment".into(),
            max_length: None,
            precision: Some(10),
            scale: Some(0),
        }
        .into_column_def();
        assert_eq!(def.kind, ColumnKind::Int);
        assert_eq!(def.data_type, "int");
        assert!(!def.nullable);
        assert!(def.is_auto_increment);
        assert_eq!(def.precision, Some(10));
    }

    #[test]
    fn test_varchar_length_falls_back_to_column_type() {
        let def = CatalogColumn {
            name: "code".into(),
            data_type: "varchar".into(),
            column_type: "varchar(32)".into(),
            is_nullable: "YES".into(),
            ..Default::default()
        }
        .into_column_def();
        assert_eq!(def.max_length, Some(32));
        assert!(def.nullable);
    }
}
