//! Backfill state storage for mysql-pg-sync
//!
//! Tracks one progress row per table and a quarantine log of batches (or
//! single rows) that could not be written to the target.
//!
//! # Architecture
//!
//! - `StateStore` - backend-agnostic trait used by the backfill engine
//! - `MySQLStateStore` - bookkeeping tables on the source database
//! - `MemoryStateStore` - in-process store for tests
//!
//! A failed state-store write never aborts a sync; callers log and continue.

mod memory;
mod mysql;
pub mod store;


pub use memory::MemoryStateStore;
pub use mysql::{error_log_table_ddl, progress_table_ddl, MySQLStateStore};
pub use store::{ErrorSummary, ProgressSummary, ResumePoint, StateStore};
