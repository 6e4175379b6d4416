//! PostgreSQL sink for mysql-pg-sync.
//!
//! This crate defines the `PostgresSink` trait that the backfill and apply
//! executors write through, and `PostgresTarget`, its `tokio-postgres`
//! implementation. Statements arrive fully rendered (see
//! `postgresql_types::sql`), so the sink only needs simple-query execution,
//! transactions and a little catalog access.

mod errors;
mod target;
mod traits;

pub use errors::{describe_pg_error, extract_failed_columns};
pub use target::PostgresTarget;
pub use traits::PostgresSink;
