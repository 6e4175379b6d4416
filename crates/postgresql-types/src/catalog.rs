//! PostgreSQL `information_schema.columns` → [`ColumnDef`].
//!
//! The apply path sanitizes audit payloads against the live target columns
//! rather than the source definitions, so target catalog rows are mapped onto
//! the same column model.

use sync_core::{ColumnDef, ColumnKind};

/// Classify a PostgreSQL `data_type` as reported by `information_schema`.
pub fn pg_column_kind(data_type: &str) -> ColumnKind {
    match data_type.to_lowercase().as_str() {
        "boolean" => ColumnKind::Bool,
        "smallint" => ColumnKind::SmallInt,
        "integer" => ColumnKind::Int,
        "bigint" => ColumnKind::BigInt,
        "real" => ColumnKind::Float,
        "double precision" => ColumnKind::Double,
        "numeric" => ColumnKind::Decimal,
        "character" => ColumnKind::Char,
        "character varying" => ColumnKind::VarChar,
        "text" => ColumnKind::Text,
        "bytea" => ColumnKind::Binary,
        "date" => ColumnKind::Date,
        "timestamp without time zone" | "timestamp with time zone" => ColumnKind::Timestamp,
        "time without time zone" | "time with time zone" => ColumnKind::Time,
        "json" | "jsonb" => ColumnKind::Json,
        _ => ColumnKind::Other,
    }
}

/// One `information_schema.columns` row of the target.
#[derive(Debug, Clone, Default)]
pub struct PgCatalogColumn {
    pub name: String,
    pub data_type: String,
    pub is_nullable: String,
    pub default: Option<String>,
    pub max_length: Option<i32>,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
}

impl PgCatalogColumn {
    pub fn into_column_def(self) -> ColumnDef {
        let kind = pg_column_kind(&self.data_type);
        let is_serial = self
            .default
            .as_deref()
            .is_some_and(|d| d.starts_with("nextval("));
        let default = if is_serial {
            None
        } else {
            self.default.as_deref().map(strip_cast)
        };
        ColumnDef {
            column_type: self.data_type.clone(),
            data_type: self.data_type,
            kind,
            nullable: self.is_nullable.eq_ignore_ascii_case("YES"),
            default,
            max_length: self.max_length.and_then(|l| u64::try_from(l).ok()),
            precision: self.precision.and_then(|p| u32::try_from(p).ok()),
            scale: self.scale.and_then(|s| u32::try_from(s).ok()),
            is_auto_increment: is_serial,
            name: self.name,
        }
    }
}

/// `'abc'::character varying` → `'abc'`, `NULL::text` → `NULL`.
fn strip_cast(default: &str) -> String {
    let default = default.trim();
    // The cast follows the closing quote of a literal, or the bare token.
    let search_from = if default.starts_with('\'') {
        default.rfind('\'').unwrap_or(0)
    } else {
        0
    };
    let stripped = match default[search_from..].find("::") {
        Some(idx) => default[..search_from + idx].trim(),
        None => default,
    };
    stripped
        .trim_start_matches('(')
        .trim_end_matches(')')
        .to_string()
}
