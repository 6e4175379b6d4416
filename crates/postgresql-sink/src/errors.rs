//! Target error rendering and constraint-violation parsing.

/// Render a `tokio_postgres` error with SQLSTATE, message and detail.
///
/// Non-database errors (I/O, protocol) fall back to their display text.
pub fn describe_pg_error(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => {
            let mut out = format!("SQLSTATE[{}]: {}", db.code().code(), db.message());
            if let Some(detail) = db.detail() {
                out.push_str(" DETAIL: ");
                out.push_str(detail);
            }
            if let Some(column) = db.column() {
                out.push_str(&format!(" (column \"{column}\")"));
            }
            out
        }
        None => err.to_string(),
    }
}

/// Column names mentioned by a constraint-violation message.
///
/// Recognises `column "x"` and `Key (a, b)=(...)`. Names are returned in
/// order of first appearance without duplicates.
pub fn extract_failed_columns(message: &str) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        let name = name.trim();
        if !name.is_empty() && !columns.iter().any(|c| c == name) {
            columns.push(name.to_string());
        }
    };

    let mut rest = message;
    while let Some(pos) = rest.find("column \"") {
        rest = &rest[pos + "column \"".len()..];
        if let Some(end) = rest.find('"') {
            push(&rest[..end]);
            rest = &rest[end..];
        }
    }
    let mut rest = message;
    while let Some(pos) = rest.find("Key (") {
        rest = &rest[pos + "Key (".len()..];
        if let Some(end) = rest.find(')') {
            for name in rest[..end].split(", ") {
                push(name);
            }
            rest = &rest[end..];
        }
    }
    columns
}
