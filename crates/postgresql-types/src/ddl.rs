//! PostgreSQL DDL generation from source column definitions.
//!
//! Converts [`ColumnDef`]s discovered on the MySQL side into PostgreSQL
//! column types, `DEFAULT` clauses and `CREATE TABLE` statements.

use crate::sanitize::coerce;
use crate::sql::{quote_ident, quote_literal, TargetTable};
use sync_core::{ColumnDef, ColumnKind, TableSchema, Value};

/// VARCHAR lengths above this become TEXT.
pub const MAX_VARCHAR_LENGTH: u64 = 10_000;

/// Trait for generating DDL strings.
pub trait ToDdl {
    /// Target column type for a source column.
    fn to_ddl(&self, column: &ColumnDef) -> String;

    /// `CREATE TABLE IF NOT EXISTS` for a whole table.
    fn to_create_table(&self, table: &TargetTable, schema: &TableSchema) -> String;
}

/// PostgreSQL DDL generator.
pub struct PostgreSQLDdl;

impl ToDdl for PostgreSQLDdl {
    fn to_ddl(&self, column: &ColumnDef) -> String {
        // Auto-increment takes precedence over the base type.
        if column.is_auto_increment && column.kind.is_integer() {
            return match column.kind {
                ColumnKind::BigInt => "BIGSERIAL".to_string(),
                ColumnKind::Bool | ColumnKind::TinyInt | ColumnKind::SmallInt => {
                    "SMALLSERIAL".to_string()
                }
                _ => "SERIAL".to_string(),
            };
        }

        match &column.kind {
            ColumnKind::Bool => "BOOLEAN".to_string(),

            // PostgreSQL has no TINYINT
            ColumnKind::TinyInt | ColumnKind::SmallInt | ColumnKind::Year => "SMALLINT".to_string(),
            ColumnKind::MediumInt | ColumnKind::Int => "INTEGER".to_string(),
            ColumnKind::BigInt => "BIGINT".to_string(),

            ColumnKind::Float => "REAL".to_string(),
            ColumnKind::Double | ColumnKind::Decimal => format!(
                "NUMERIC({},{})",
                column.precision.unwrap_or(10),
                column.scale.unwrap_or(0)
            ),

            ColumnKind::Char => format!("CHAR({})", column.max_length.unwrap_or(1)),
            ColumnKind::VarChar => match column.max_length {
                Some(len) if len > MAX_VARCHAR_LENGTH => "TEXT".to_string(),
                Some(len) => format!("VARCHAR({len})"),
                None => "VARCHAR(255)".to_string(),
            },
            ColumnKind::Text => "TEXT".to_string(),

            ColumnKind::Blob | ColumnKind::Binary => "BYTEA".to_string(),

            ColumnKind::Date => "DATE".to_string(),
            ColumnKind::DateTime | ColumnKind::Timestamp => "TIMESTAMP".to_string(),
            ColumnKind::Time => "TIME".to_string(),

            // Legal values are enforced when sanitizing, not by the column type
            ColumnKind::Enum(_) => "VARCHAR(50)".to_string(),
            ColumnKind::Set(_) => "TEXT".to_string(),

            ColumnKind::Json => "JSONB".to_string(),

            ColumnKind::Other => "TEXT".to_string(),
        }
    }

    fn to_create_table(&self, table: &TargetTable, schema: &TableSchema) -> String {
        let mut parts: Vec<String> = schema
            .columns
            .iter()
            .map(|column| self.column_definition(column))
            .collect();

        if schema.has_primary_key() {
            let pk: Vec<String> = schema.primary_key.iter().map(|c| quote_ident(c)).collect();
            parts.push(format!("PRIMARY KEY ({})", pk.join(", ")));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n    {}\n)",
            parts.join(",\n    ")
        )
    }
}

impl PostgreSQLDdl {
    /// One column line of a `CREATE TABLE` body.
    pub fn column_definition(&self, column: &ColumnDef) -> String {
        let ty = self.to_ddl(column);
        let mut def = format!("{} {ty}", quote_ident(&column.name));
        if !is_nullable(column) {
            def.push_str(" NOT NULL");
        }
        // SERIAL columns own their default
        if !ty.ends_with("SERIAL") {
            if let Some(default) = column_default(column) {
                def.push_str(" DEFAULT ");
                def.push_str(&default);
            }
        }
        def
    }
}

// ============================================================================
// Defaults and nullability
// ============================================================================

/// Declared default with MySQL/MariaDB quoting removed; `None` for no
/// default or an explicit `NULL`.
pub fn declared_default(column: &ColumnDef) -> Option<String> {
    let raw = column.default.as_deref()?.trim();
    if raw.eq_ignore_ascii_case("null") {
        return None;
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return Some(raw[1..raw.len() - 1].replace("''", "'"));
    }
    Some(raw.to_string())
}

/// `0000-00-00` style dates MySQL accepts and PostgreSQL rejects.
pub fn is_zero_date(s: &str) -> bool {
    s.trim().starts_with("0000-00-00")
}

fn is_current_timestamp(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    lower.contains("current_timestamp") || lower.starts_with("now(")
}

/// Optional sign, digits, optional fraction, optional exponent.
pub fn is_numeric_literal(s: &str) -> bool {
    let s = s.strip_prefix(['-', '+']).unwrap_or(s);
    let (mantissa, exponent) = match s.find(['e', 'E']) {
        Some(idx) => (&s[..idx], Some(&s[idx + 1..])),
        None => (s, None),
    };
    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };
    let digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    if int_part.is_empty() && frac_part.is_empty() {
        return false;
    }
    if !digits(int_part) || !digits(frac_part) {
        return false;
    }
    match exponent {
        None => true,
        Some(e) => {
            let e = e.strip_prefix(['-', '+']).unwrap_or(e);
            !e.is_empty() && digits(e)
        }
    }
}

/// Translate the declared default into a PostgreSQL `DEFAULT` expression.
pub fn column_default(column: &ColumnDef) -> Option<String> {
    let raw = declared_default(column)?;

    if column.kind == ColumnKind::Bool {
        match raw.as_str() {
            "0" => return Some("false".to_string()),
            "1" => return Some("true".to_string()),
            _ => {}
        }
    }
    if is_zero_date(&raw) {
        return None;
    }
    if is_current_timestamp(&raw) {
        return Some("CURRENT_TIMESTAMP".to_string());
    }
    if is_numeric_literal(&raw) {
        return Some(raw);
    }
    Some(quote_literal(&raw))
}

/// Declared default converted to a value of the column's kind, when the
/// default is a literal the target can store.
pub fn usable_default(column: &ColumnDef) -> Option<Value> {
    let raw = declared_default(column)?;
    if is_zero_date(&raw) || is_current_timestamp(&raw) {
        return None;
    }
    coerce(&Value::Text(raw), column).map(|(value, _)| value)
}

/// NOT NULL columns without a usable default are created nullable: no
/// declared default at all, zero-dates, and literals that are invalid for
/// the kind (such as `''` on a number).
pub fn should_force_nullable(column: &ColumnDef) -> bool {
    if column.nullable {
        return false;
    }
    let Some(raw) = declared_default(column) else {
        return true;
    };
    if is_zero_date(&raw) {
        return true;
    }
    if is_current_timestamp(&raw) {
        return false;
    }
    coerce(&Value::Text(raw), column).is_none()
}

/// Effective target nullability.
pub fn is_nullable(column: &ColumnDef) -> bool {
    column.nullable || should_force_nullable(column)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ddl(column: ColumnDef) -> String {
        PostgreSQLDdl.to_ddl(&column)
    }

    #[test]
    fn test_integer_ddl() {
        assert_eq!(ddl(ColumnDef::new("a", ColumnKind::TinyInt)), "SMALLINT");
        assert_eq!(ddl(ColumnDef::new("a", ColumnKind::SmallInt)), "SMALLINT");
        assert_eq!(ddl(ColumnDef::new("a", ColumnKind::MediumInt)), "INTEGER");
        assert_eq!(ddl(ColumnDef::new("a", ColumnKind::Int)), "INTEGER");
        assert_eq!(ddl(ColumnDef::new("a", ColumnKind::BigInt)), "BIGINT");
        assert_eq!(ddl(ColumnDef::new("a", ColumnKind::Year)), "SMALLINT");
        assert_eq!(ddl(ColumnDef::new("a", ColumnKind::Bool)), "BOOLEAN");
    }

    #[test]
    fn test_auto_increment_takes_precedence() {
        assert_eq!(
            ddl(ColumnDef::new("id", ColumnKind::BigInt).auto_increment()),
            "BIGSERIAL"
        );
        assert_eq!(
            ddl(ColumnDef::new("id", ColumnKind::TinyInt).auto_increment()),
            "SMALLSERIAL"
        );
        assert_eq!(
            ddl(ColumnDef::new("id", ColumnKind::SmallInt).auto_increment()),
            "SMALLSERIAL"
        );
        assert_eq!(
            ddl(ColumnDef::new("id", ColumnKind::MediumInt).auto_increment()),
            "SERIAL"
        );
        assert_eq!(
            ddl(ColumnDef::new("id", ColumnKind::Int).auto_increment()),
            "SERIAL"
        );
    }

    #[test]
    fn test_numeric_ddl() {
        assert_eq!(ddl(ColumnDef::new("a", ColumnKind::Float)), "REAL");
        assert_eq!(
            ddl(ColumnDef::new("a", ColumnKind::Decimal).with_precision(12, 4)),
            "NUMERIC(12,4)"
        );
        assert_eq!(ddl(ColumnDef::new("a", ColumnKind::Decimal)), "NUMERIC(10,0)");
        assert_eq!(ddl(ColumnDef::new("a", ColumnKind::Double)), "NUMERIC(10,0)");
    }

    #[test]
    fn test_string_ddl() {
        assert_eq!(
            ddl(ColumnDef::new("a", ColumnKind::Char).with_max_length(2)),
            "CHAR(2)"
        );
        assert_eq!(
            ddl(ColumnDef::new("a", ColumnKind::VarChar).with_max_length(255)),
            "VARCHAR(255)"
        );
        assert_eq!(
            ddl(ColumnDef::new("a", ColumnKind::VarChar).with_max_length(10_000)),
            "VARCHAR(10000)"
        );
        assert_eq!(
            ddl(ColumnDef::new("a", ColumnKind::VarChar).with_max_length(10_001)),
            "TEXT"
        );
        assert_eq!(ddl(ColumnDef::new("a", ColumnKind::Text)), "TEXT");
        assert_eq!(
            ddl(ColumnDef::new("a", ColumnKind::Enum(vec!["x".into()]))),
            "VARCHAR(50)"
        );
        assert_eq!(ddl(ColumnDef::new("a", ColumnKind::Set(vec![]))), "TEXT");
        assert_eq!(ddl(ColumnDef::new("a", ColumnKind::Other)), "TEXT");
    }

    #[test]
    fn test_binary_temporal_json_ddl() {
        assert_eq!(ddl(ColumnDef::new("a", ColumnKind::Blob)), "BYTEA");
        assert_eq!(ddl(ColumnDef::new("a", ColumnKind::Binary)), "BYTEA");
        assert_eq!(ddl(ColumnDef::new("a", ColumnKind::Date)), "DATE");
        assert_eq!(ddl(ColumnDef::new("a", ColumnKind::DateTime)), "TIMESTAMP");
        assert_eq!(ddl(ColumnDef::new("a", ColumnKind::Timestamp)), "TIMESTAMP");
        assert_eq!(ddl(ColumnDef::new("a", ColumnKind::Time)), "TIME");
        assert_eq!(ddl(ColumnDef::new("a", ColumnKind::Json)), "JSONB");
    }

    #[test]
    fn test_column_default_translation() {
        let bool_col = ColumnDef::new("active", ColumnKind::Bool).with_default("1");
        assert_eq!(column_default(&bool_col).as_deref(), Some("true"));

        let ts = ColumnDef::new("created", ColumnKind::Timestamp)
            .with_default("current_timestamp()");
        assert_eq!(column_default(&ts).as_deref(), Some("CURRENT_TIMESTAMP"));

        let num = ColumnDef::new("qty", ColumnKind::Int).with_default("-5");
        assert_eq!(column_default(&num).as_deref(), Some("-5"));

        let text = ColumnDef::new("name", ColumnKind::VarChar).with_default("it's");
        assert_eq!(column_default(&text).as_deref(), Some("'it''s'"));

        let quoted = ColumnDef::new("name", ColumnKind::VarChar).with_default("'draft'");
        assert_eq!(column_default(&quoted).as_deref(), Some("'draft'"));

        let zero = ColumnDef::new("d", ColumnKind::Date).with_default("0000-00-00");
        assert_eq!(column_default(&zero), None);

        let null = ColumnDef::new("d", ColumnKind::Date).with_default("NULL");
        assert_eq!(column_default(&null), None);
    }

    #[test]
    fn test_zero_date_default_forces_nullable() {
        let col = ColumnDef::new("shipped_on", ColumnKind::Date)
            .not_null()
            .with_default("0000-00-00");
        assert!(should_force_nullable(&col));
        assert!(is_nullable(&col));
        assert_eq!(
            PostgreSQLDdl.column_definition(&col),
            "\"shipped_on\" DATE"
        );
    }

    #[test]
    fn test_unusable_default_forces_nullable() {
        let col = ColumnDef::new("qty", ColumnKind::Int)
            .not_null()
            .with_default("");
        assert!(should_force_nullable(&col));

        let ok = ColumnDef::new("qty", ColumnKind::Int)
            .not_null()
            .with_default("0");
        assert!(!should_force_nullable(&ok));

        let ts = ColumnDef::new("created", ColumnKind::Timestamp)
            .not_null()
            .with_default("CURRENT_TIMESTAMP");
        assert!(!should_force_nullable(&ts));
    }

    #[test]
    fn test_missing_default_forces_nullable() {
        let absent = ColumnDef::new("qty", ColumnKind::Int).not_null();
        assert!(should_force_nullable(&absent));
        assert_eq!(PostgreSQLDdl.column_definition(&absent), "\"qty\" INTEGER");

        let explicit_null = ColumnDef::new("qty", ColumnKind::Int)
            .not_null()
            .with_default("NULL");
        assert!(should_force_nullable(&explicit_null));

        let nullable = ColumnDef::new("qty", ColumnKind::Int);
        assert!(!should_force_nullable(&nullable));
    }

    #[test]
    fn test_numeric_literal() {
        for ok in ["0", "-1", "+2.5", ".5", "1e10", "1.5E-3"] {
            assert!(is_numeric_literal(ok), "{ok}");
        }
        for bad in ["", "-", "1.2.3", "abc", "1e", "NaN", "inf", "0x10"] {
            assert!(!is_numeric_literal(bad), "{bad}");
        }
    }

    #[test]
    fn test_create_table() {
        let schema = TableSchema::new(
            "orders",
            vec![
                ColumnDef::new("org_id", ColumnKind::Int).not_null(),
                ColumnDef::new("id", ColumnKind::BigInt).not_null().auto_increment(),
                ColumnDef::new("status", ColumnKind::VarChar)
                    .with_max_length(20)
                    .not_null()
                    .with_default("new"),
                ColumnDef::new("note", ColumnKind::Text),
            ],
        )
        .with_primary_key(["org_id", "id"]);

        let sql = PostgreSQLDdl.to_create_table(&TargetTable::new("public", "orders"), &schema);
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"public\".\"orders\" (\n    \
             \"org_id\" INTEGER,\n    \
             \"id\" BIGSERIAL,\n    \
             \"status\" VARCHAR(20) NOT NULL DEFAULT 'new',\n    \
             \"note\" TEXT,\n    \
             PRIMARY KEY (\"org_id\", \"id\")\n)"
        );
    }
}
