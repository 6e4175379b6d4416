//! In-memory stand-ins for the source catalog, source tables, audit log and
//! target database, used by the unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use postgresql_sink::PostgresSink;
use postgresql_types::TargetTable;
use sync_core::{
    truncate_chars, AuditRecord, AuditStats, ColumnDef, ForeignKeyRef, Operation, Row,
    TableSchema, MAX_APPLY_ERROR_LEN,
};
use tokio_util::sync::CancellationToken;

use crate::reader::TableReader;
use crate::schema::SchemaSource;
use crate::source::AuditLog;

/// Catalog backed by a set of [`TableSchema`]s.
#[derive(Default)]
pub struct FakeCatalog {
    tables: Mutex<BTreeMap<String, TableSchema>>,
    column_queries: AtomicUsize,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, schema: TableSchema) {
        self.tables
            .lock()
            .unwrap()
            .insert(schema.name.clone(), schema);
    }

    /// Number of `columns` lookups served.
    pub fn column_queries(&self) -> usize {
        self.column_queries.load(Ordering::SeqCst)
    }

    fn get(&self, table: &str) -> Option<TableSchema> {
        self.tables.lock().unwrap().get(table).cloned()
    }
}

#[async_trait]
impl SchemaSource for FakeCatalog {
    async fn base_tables(&self) -> Result<Vec<String>> {
        Ok(self.tables.lock().unwrap().keys().cloned().collect())
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnDef>> {
        self.column_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.get(table).map(|s| s.columns).unwrap_or_default())
    }

    async fn primary_key(&self, table: &str) -> Result<Vec<String>> {
        Ok(self.get(table).map(|s| s.primary_key).unwrap_or_default())
    }

    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyRef>> {
        Ok(self.get(table).map(|s| s.foreign_keys).unwrap_or_default())
    }
}

/// Source tables held as row vectors in primary key order.
#[derive(Default)]
pub struct FakeTableReader {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    failing_offsets: Mutex<HashMap<String, u64>>,
    pages_served: AtomicUsize,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
}

impl FakeTableReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rows(&self, table: &str, rows: Vec<Row>) {
        self.tables.lock().unwrap().insert(table.to_string(), rows);
    }

    /// Make reads of `table` at `offset` fail.
    pub fn fail_fetch_at(&self, table: &str, offset: u64) {
        self.failing_offsets
            .lock()
            .unwrap()
            .insert(table.to_string(), offset);
    }

    /// Cancel `token` once `pages` pages have been served.
    pub fn cancel_after_pages(&self, pages: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((pages, token));
    }
}

#[async_trait]
impl TableReader for FakeTableReader {
    async fn count_rows(&self, table: &str) -> Result<u64> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .map_or(0, |rows| rows.len() as u64))
    }

    async fn fetch_page(&self, schema: &TableSchema, offset: u64, limit: u64) -> Result<Vec<Row>> {
        if self.failing_offsets.lock().unwrap().get(&schema.name) == Some(&offset) {
            return Err(anyhow!("Lost connection to MySQL server during query"));
        }
        let page: Vec<Row> = {
            let tables = self.tables.lock().unwrap();
            let rows = tables.get(&schema.name).map(Vec::as_slice).unwrap_or(&[]);
            rows.iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect()
        };
        let served = self.pages_served.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((pages, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if served >= *pages {
                token.cancel();
            }
        }
        Ok(page)
    }
}

struct FailRule {
    needle: String,
    message: String,
    /// Failures left; `None` fails forever
    remaining: Option<u32>,
}

/// Target database that records every statement it accepts.
pub struct FakeSink {
    schema: String,
    tables: Mutex<BTreeSet<String>>,
    columns: Mutex<HashMap<String, Vec<ColumnDef>>>,
    executed: Mutex<Vec<String>>,
    rules: Mutex<Vec<FailRule>>,
}

impl FakeSink {
    pub fn new(schema: &str) -> Self {
        Self {
            schema: schema.to_string(),
            tables: Mutex::new(BTreeSet::new()),
            columns: Mutex::new(HashMap::new()),
            executed: Mutex::new(Vec::new()),
            rules: Mutex::new(Vec::new()),
        }
    }

    /// Register an existing target table.
    pub fn add_table(&self, table: &str, columns: Vec<ColumnDef>) {
        self.tables.lock().unwrap().insert(table.to_string());
        self.columns
            .lock()
            .unwrap()
            .insert(table.to_string(), columns);
    }

    /// Reject every statement containing `needle` with `message`.
    pub fn fail_when(&self, needle: &str, message: &str) {
        self.push_rule(needle, message, None);
    }

    /// Reject the next `times` statements containing `needle`.
    pub fn fail_times(&self, needle: &str, message: &str, times: u32) {
        self.push_rule(needle, message, Some(times));
    }

    pub fn clear_failures(&self) {
        self.rules.lock().unwrap().clear();
    }

    fn push_rule(&self, needle: &str, message: &str, remaining: Option<u32>) {
        self.rules.lock().unwrap().push(FailRule {
            needle: needle.to_string(),
            message: message.to_string(),
            remaining,
        });
    }

    /// Statements accepted so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// Accepted statements containing `needle`.
    pub fn executed_matching(&self, needle: &str) -> Vec<String> {
        self.executed()
            .into_iter()
            .filter(|sql| sql.contains(needle))
            .collect()
    }

    fn check(&self, sql: &str) -> Result<()> {
        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            if !sql.contains(&rule.needle) {
                continue;
            }
            match rule.remaining {
                None => return Err(anyhow!(rule.message.clone())),
                Some(0) => continue,
                Some(ref mut n) => {
                    *n -= 1;
                    return Err(anyhow!(rule.message.clone()));
                }
            }
        }
        Ok(())
    }

    fn record(&self, sql: &str) {
        if sql.starts_with("CREATE TABLE") {
            if let Some(name) = created_table_name(sql) {
                self.tables.lock().unwrap().insert(name);
            }
        }
        self.executed.lock().unwrap().push(sql.to_string());
    }
}

/// Bare table name of a `CREATE TABLE ... "schema"."name" (` statement.
fn created_table_name(sql: &str) -> Option<String> {
    let head = sql.split('(').next()?;
    let qualified = head.split_whitespace().last()?;
    let name = qualified.rsplit('.').next()?;
    Some(name.trim_matches('"').to_string())
}

#[async_trait]
impl PostgresSink for FakeSink {
    fn schema(&self) -> &str {
        &self.schema
    }

    async fn table_exists(&self, table: &TargetTable) -> Result<bool> {
        Ok(self.tables.lock().unwrap().contains(&table.name))
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        self.check(sql)?;
        self.record(sql);
        Ok(())
    }

    async fn execute_in_transaction(&self, statements: &[String]) -> Result<()> {
        for sql in statements {
            self.check(sql)?;
        }
        for sql in statements {
            self.record(sql);
        }
        Ok(())
    }

    async fn live_columns(&self, table: &TargetTable) -> Result<Vec<ColumnDef>> {
        Ok(self
            .columns
            .lock()
            .unwrap()
            .get(&table.name)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.tables.lock().unwrap().iter().cloned().collect())
    }

    async fn drop_all_tables(&self) -> Result<usize> {
        let mut tables = self.tables.lock().unwrap();
        let dropped = tables.len();
        tables.clear();
        self.columns.lock().unwrap().clear();
        Ok(dropped)
    }
}

/// Audit log kept in memory, keyed by id.
#[derive(Default)]
pub struct FakeAuditLog {
    records: Mutex<BTreeMap<i64, AuditRecord>>,
    next_id: Mutex<i64>,
    purge_calls: AtomicUsize,
}

impl FakeAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a change the way a capture trigger would. Returns its id.
    pub fn push(
        &self,
        operation: Operation,
        table: &str,
        record_id: Option<&str>,
        new_data: Option<Row>,
    ) -> i64 {
        self.push_change(operation, table, record_id, None, new_data)
    }

    pub fn push_change(
        &self,
        operation: Operation,
        table: &str,
        record_id: Option<&str>,
        old_data: Option<Row>,
        new_data: Option<Row>,
    ) -> i64 {
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let id = *next_id;
        self.records.lock().unwrap().insert(
            id,
            AuditRecord {
                id,
                table_name: table.to_string(),
                record_id: record_id.map(str::to_string),
                operation,
                old_data,
                new_data,
                synced: false,
                synced_at: None,
                error_message: None,
                retry_count: 0,
                created_at: Utc::now(),
            },
        );
        id
    }

    /// Mark `id` synced and backdate its creation.
    pub fn set_synced(&self, id: i64, created_at: DateTime<Utc>) {
        if let Some(record) = self.records.lock().unwrap().get_mut(&id) {
            record.synced = true;
            record.synced_at = Some(created_at);
            record.created_at = created_at;
        }
    }

    pub fn get(&self, id: i64) -> Option<AuditRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `purge_chunk` calls made.
    pub fn purge_calls(&self) -> usize {
        self.purge_calls.load(Ordering::SeqCst)
    }

    fn purgeable(record: &AuditRecord, keep_days: u32) -> bool {
        record.synced && record.created_at < Utc::now() - chrono::Duration::days(keep_days.into())
    }
}

#[async_trait]
impl AuditLog for FakeAuditLog {
    async fn fetch_pending(&self, limit: usize, max_attempts: u32) -> Result<Vec<AuditRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| !r.synced && r.retry_count < max_attempts)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_synced(&self, id: i64) -> Result<()> {
        if let Some(record) = self.records.lock().unwrap().get_mut(&id) {
            record.synced = true;
            record.synced_at = Some(Utc::now());
            record.error_message = None;
        }
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        if let Some(record) = self.records.lock().unwrap().get_mut(&id) {
            record.retry_count += 1;
            record.error_message = Some(truncate_chars(error, MAX_APPLY_ERROR_LEN));
        }
        Ok(())
    }

    async fn stats(&self, max_attempts: u32) -> Result<AuditStats> {
        let records = self.records.lock().unwrap();
        let mut stats = AuditStats::default();
        for record in records.values() {
            stats.total += 1;
            if record.synced {
                stats.synced += 1;
            } else {
                stats.pending += 1;
                if record.retry_count >= max_attempts {
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn count_purgeable(&self, keep_days: u32) -> Result<u64> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| Self::purgeable(r, keep_days))
            .count() as u64)
    }

    async fn purge_chunk(&self, keep_days: u32, limit: u64) -> Result<u64> {
        self.purge_calls.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().unwrap();
        let ids: Vec<i64> = records
            .values()
            .filter(|r| Self::purgeable(r, keep_days))
            .take(limit as usize)
            .map(|r| r.id)
            .collect();
        for id in &ids {
            records.remove(id);
        }
        Ok(ids.len() as u64)
    }
}
