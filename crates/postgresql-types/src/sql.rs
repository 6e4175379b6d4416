//! PostgreSQL statement rendering.
//!
//! Statements are rendered as plain SQL text with every value inlined as a
//! literal, so a whole batch can be sent through the simple query protocol in
//! one round trip.

use std::fmt;
use sync_core::{Row, Value};

/// Schema-qualified target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTable {
    pub schema: String,
    pub name: String,
}

impl TargetTable {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TargetTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

/// Double-quoted identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quoted string literal.
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Render a value as a SQL literal.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_nan() => "'NaN'".to_string(),
        Value::Float(f) if f.is_infinite() => {
            if *f > 0.0 {
                "'Infinity'".to_string()
            } else {
                "'-Infinity'".to_string()
            }
        }
        Value::Float(f) => f.to_string(),
        Value::Bytes(b) => format!("'\\x{}'::bytea", hex::encode(b)),
        Value::Json(j) => quote_literal(&j.to_string()),
        other => quote_literal(&other.to_text()),
    }
}

/// Multi-row `INSERT` listing `columns` in order; missing columns are NULL.
pub fn insert_sql(
    table: &TargetTable,
    columns: &[&str],
    rows: &[Row],
    ignore_conflicts: bool,
) -> String {
    let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let values: Vec<String> = rows
        .iter()
        .map(|row| {
            let literals: Vec<String> = columns
                .iter()
                .map(|c| row.get(c).map(literal).unwrap_or_else(|| "NULL".to_string()))
                .collect();
            format!("({})", literals.join(", "))
        })
        .collect();

    let mut sql = format!(
        "INSERT INTO {table} ({}) VALUES {}",
        column_list.join(", "),
        values.join(", ")
    );
    if ignore_conflicts {
        sql.push_str(" ON CONFLICT DO NOTHING");
    }
    sql
}

/// `col = literal` / `col IS NULL` conjunction.
pub fn where_clause(conditions: &[(String, Value)]) -> String {
    conditions
        .iter()
        .map(|(col, value)| match value {
            Value::Null => format!("{} IS NULL", quote_ident(col)),
            v => format!("{} = {}", quote_ident(col), literal(v)),
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

pub fn update_sql(table: &TargetTable, set: &Row, conditions: &[(String, Value)]) -> String {
    let assignments: Vec<String> = set
        .iter()
        .map(|(col, v)| format!("{} = {}", quote_ident(col), literal(v)))
        .collect();
    format!(
        "UPDATE {table} SET {} WHERE {}",
        assignments.join(", "),
        where_clause(conditions)
    )
}

pub fn delete_sql(table: &TargetTable, conditions: &[(String, Value)]) -> String {
    format!("DELETE FROM {table} WHERE {}", where_clause(conditions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn users() -> TargetTable {
        TargetTable::new("public", "users")
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
        assert_eq!(users().to_string(), "\"public\".\"users\"");
    }

    #[test]
    fn test_literals() {
        assert_eq!(literal(&Value::Null), "NULL");
        assert_eq!(literal(&Value::Bool(true)), "TRUE");
        assert_eq!(literal(&Value::Int(-4)), "-4");
        assert_eq!(literal(&Value::Float(1.5)), "1.5");
        assert_eq!(literal(&Value::Float(f64::NAN)), "'NaN'");
        assert_eq!(literal(&Value::Decimal("12.50".into())), "'12.50'");
        assert_eq!(literal(&Value::Bytes(vec![0xca, 0xfe])), "'\\xcafe'::bytea");
        assert_eq!(
            literal(&Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())),
            "'2024-03-01'"
        );
        assert_eq!(
            literal(&Value::Json(serde_json::json!({"q": "it's"}))),
            "'{\"q\":\"it''s\"}'"
        );
    }

    #[test]
    fn test_insert_sql() {
        let rows = vec![
            Row::new()
                .with("id", Value::Int(1))
                .with("name", Value::Text("a".into())),
            Row::new().with("id", Value::Int(2)),
        ];
        assert_eq!(
            insert_sql(&users(), &["id", "name"], &rows, false),
            "INSERT INTO \"public\".\"users\" (\"id\", \"name\") VALUES (1, 'a'), (2, NULL)"
        );
        let ignoring = insert_sql(&users(), &["id"], &rows[..1], true);
        assert!(ignoring.ends_with(" ON CONFLICT DO NOTHING"));
    }

    #[test]
    fn test_update_and_delete_sql() {
        let set = Row::new().with("name", Value::Text("b".into()));
        let cond = vec![
            ("id".to_string(), Value::Text("7".into())),
            ("deleted_at".to_string(), Value::Null),
        ];
        assert_eq!(
            update_sql(&users(), &set, &cond),
            "UPDATE \"public\".\"users\" SET \"name\" = 'b' WHERE \
             \"id\" = '7' AND \"deleted_at\" IS NULL"
        );
        assert_eq!(
            delete_sql(&users(), &cond[..1]),
            "DELETE FROM \"public\".\"users\" WHERE \"id\" = '7'"
        );
    }
}
